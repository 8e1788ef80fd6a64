use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::bbox::{BBox, Ltrb};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EntityClass {
    Player,
    Ball,
}

/// One box reported by the upstream detector for a single frame.
#[derive(Serialize, Deserialize, Debug, Clone, Copy)]
pub struct Detection {
    pub bbox: BBox<Ltrb>,
    #[serde(rename = "c")]
    pub class: EntityClass,
    #[serde(rename = "p", default = "default_confidence")]
    pub confidence: f32,
    /// Identity assigned by an upstream tracker, when there is one.
    #[serde(default)]
    pub track_id: Option<u32>,
}

fn default_confidence() -> f32 {
    1.0
}

impl Detection {
    pub fn new(class: EntityClass, bbox: BBox<Ltrb>) -> Self {
        Self {
            bbox,
            class,
            confidence: 1.0,
            track_id: None,
        }
    }

    #[inline]
    pub fn with_track_id(mut self, id: u32) -> Self {
        self.track_id = Some(id);
        self
    }

    #[inline]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    /// Image-space anchor: players stand on their feet, the ball is its centre.
    #[inline]
    pub fn position(&self) -> na::Point2<f32> {
        match self.class {
            EntityClass::Player => self.bbox.foot(),
            EntityClass::Ball => self.bbox.center(),
        }
    }

    #[inline]
    pub fn iou(&self, other: &Detection) -> f32 {
        self.bbox.iou(&other.bbox)
    }
}
