use image::RgbImage;

use crate::detection::{Detection, EntityClass};

pub struct Frame {
    pub image: RgbImage,
    pub detections: Vec<Detection>,
    pub timestamp: f32, // in seconds
}

impl Frame {
    pub fn new(image: RgbImage, detections: Vec<Detection>, timestamp: f32) -> Self {
        Self {
            image,
            detections,
            timestamp,
        }
    }

    #[inline]
    pub fn dims(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.detections.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }

    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Detection> {
        self.detections.iter()
    }

    #[inline]
    pub fn of_class(&self, class: EntityClass) -> impl Iterator<Item = &Detection> {
        self.detections.iter().filter(move |d| d.class == class)
    }
}
