use nalgebra as na;
use serde_derive::Serialize;

use crate::bbox::{BBox, Ltrb};
use crate::detection::EntityClass;
use crate::kinematics::KinematicState;
use crate::team::Team;

/// State shared by every tracked entity for one frame.
#[derive(Serialize, Debug, Clone)]
pub struct EntityState {
    pub id: u32,
    /// Box reported in this frame; `None` when the entity is extrapolated.
    pub bbox: Option<BBox<Ltrb>>,
    pub raw_position: Option<na::Point2<f32>>,
    /// Raw position with this frame's camera motion removed.
    pub adjusted_position: Option<na::Point2<f32>>,
    /// Pitch metres, `None` outside the calibrated field.
    pub world_position: Option<na::Point2<f32>>,
    pub kinematics: KinematicState,
}

impl EntityState {
    #[inline]
    pub fn is_observed(&self) -> bool {
        self.raw_position.is_some()
    }
}

#[derive(Serialize, Debug, Clone)]
pub struct PlayerState {
    #[serde(flatten)]
    pub state: EntityState,
    pub team: Option<Team>,
    pub has_possession: bool,
}

#[derive(Serialize, Debug, Clone)]
#[serde(tag = "class", rename_all = "lowercase")]
pub enum TrackedEntity {
    Player(PlayerState),
    Ball(EntityState),
}

impl TrackedEntity {
    #[inline]
    pub fn class(&self) -> EntityClass {
        match self {
            TrackedEntity::Player(_) => EntityClass::Player,
            TrackedEntity::Ball(_) => EntityClass::Ball,
        }
    }

    #[inline]
    pub fn state(&self) -> &EntityState {
        match self {
            TrackedEntity::Player(p) => &p.state,
            TrackedEntity::Ball(b) => b,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.state().id
    }

    #[inline]
    pub fn kinematics(&self) -> &KinematicState {
        &self.state().kinematics
    }

    #[inline]
    pub fn team(&self) -> Option<Team> {
        match self {
            TrackedEntity::Player(p) => p.team,
            TrackedEntity::Ball(_) => None,
        }
    }

    #[inline]
    pub fn has_possession(&self) -> bool {
        matches!(self, TrackedEntity::Player(p) if p.has_possession)
    }

    #[inline]
    pub fn as_player(&self) -> Option<&PlayerState> {
        match self {
            TrackedEntity::Player(p) => Some(p),
            TrackedEntity::Ball(_) => None,
        }
    }
}
