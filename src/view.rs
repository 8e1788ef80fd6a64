use nalgebra as na;
use tracing::debug;

use crate::config::FieldCalibration;
use crate::error::{Error, Result};
use crate::math;

/// Fixed projective map from image pixels onto pitch metres.
#[derive(Debug, Clone)]
pub struct CoordinateMapper {
    bounds: [na::Point2<f32>; 4],
    homography: na::Matrix3<f64>,
    length: f32,
    width: f32,
}

impl CoordinateMapper {
    pub fn new(calibration: &FieldCalibration) -> Result<Self> {
        calibration.validate()?;

        let bounds = calibration.corners();
        let src = bounds.map(|p| na::Point2::new(p.x as f64, p.y as f64));
        let dst = calibration
            .world_corners()
            .map(|p| na::Point2::new(p.x as f64, p.y as f64));

        let homography = math::perspective_transform(&src, &dst).ok_or_else(|| {
            Error::InvalidCalibration("perspective transform is singular".into())
        })?;

        debug!(
            length = calibration.length,
            width = calibration.width,
            "field calibration loaded"
        );

        Ok(Self {
            bounds,
            homography,
            length: calibration.length,
            width: calibration.width,
        })
    }

    /// Pitch coordinates of `point`, or `None` when it lies outside the
    /// calibrated quadrilateral.
    pub fn transform(&self, point: na::Point2<f32>) -> Option<na::Point2<f32>> {
        if !point.x.is_finite() || !point.y.is_finite() {
            return None;
        }

        if !math::in_polygon(point, &self.bounds) {
            return None;
        }

        let p = self.homography * na::Vector3::new(point.x as f64, point.y as f64, 1.0);
        if p.z.abs() < f64::EPSILON {
            return None;
        }

        Some(na::Point2::new((p.x / p.z) as f32, (p.y / p.z) as f32))
    }

    #[inline]
    pub fn contains(&self, point: na::Point2<f32>) -> bool {
        math::in_polygon(point, &self.bounds)
    }

    #[inline]
    pub fn field_size(&self) -> (f32, f32) {
        (self.length, self.width)
    }
}
