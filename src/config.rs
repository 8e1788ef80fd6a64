//! Tunables for every stage of the per-frame pipeline.
//!
//! Every struct carries the defaults the pipeline was calibrated with and
//! deserializes from partial JSON documents. `validate` is run by each
//! component constructor, so a bad value is rejected before the first frame.

use std::path::Path;

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Upper bound on tracked motion features.
pub const MAX_CORNERS: usize = 10_000;

/// Upper bound on pyramid levels above the base image.
pub const MAX_PYRAMID_LEVELS: u32 = 8;

fn check_finite(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(Error::InvalidParameter { name, value })
    }
}

fn check_positive(name: &'static str, value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter { name, value })
    }
}

/// Camera ego-motion estimation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct MotionConfig {
    /// EMA factor applied to the raw per-frame displacement.
    pub alpha: f32,
    /// Displacement (px) above which the feature set is re-seeded.
    pub minimum_distance: f32,
    pub max_corners: usize,
    /// Fraction of the strongest corner response a feature must reach.
    pub quality_level: f32,
    /// Minimum spacing between selected features (px).
    pub min_feature_distance: f32,
    pub block_size: u32,
    /// Width of the left feature strip (px).
    pub left_strip: u32,
    /// Width of the right feature strip (px).
    pub right_strip: u32,
    /// Lucas-Kanade patch side (px).
    pub window_size: u32,
    /// Pyramid levels above the full-resolution image.
    pub pyramid_levels: u32,
    pub max_iterations: u32,
    pub epsilon: f32,
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            alpha: 0.35,
            minimum_distance: 5.0,
            max_corners: 100,
            quality_level: 0.3,
            min_feature_distance: 3.0,
            block_size: 7,
            left_strip: 20,
            right_strip: 150,
            window_size: 15,
            pyramid_levels: 2,
            max_iterations: 10,
            epsilon: 0.03,
        }
    }
}

impl MotionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(Error::InvalidParameter {
                name: "alpha",
                value: self.alpha,
            });
        }

        check_positive("minimum_distance", self.minimum_distance)?;
        check_positive("quality_level", self.quality_level)?;
        check_finite("min_feature_distance", self.min_feature_distance)?;
        check_positive("epsilon", self.epsilon)?;

        if self.window_size < 3 {
            return Err(Error::InvalidParameter {
                name: "window_size",
                value: self.window_size as f32,
            });
        }

        if self.block_size < 3 {
            return Err(Error::InvalidParameter {
                name: "block_size",
                value: self.block_size as f32,
            });
        }

        if self.max_corners == 0 || self.max_corners > MAX_CORNERS {
            return Err(Error::InvalidParameter {
                name: "max_corners",
                value: self.max_corners as f32,
            });
        }

        if self.pyramid_levels > MAX_PYRAMID_LEVELS {
            return Err(Error::InvalidParameter {
                name: "pyramid_levels",
                value: self.pyramid_levels as f32,
            });
        }

        Ok(())
    }
}

/// Image-space pitch corners and the real-world rectangle they bound.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct FieldCalibration {
    /// Bottom-left, top-left, top-right, bottom-right, in pixels.
    pub pixel_corners: [[f32; 2]; 4],
    /// Metres along the x axis of the pitch.
    pub length: f32,
    /// Metres along the y axis of the pitch.
    pub width: f32,
}

impl Default for FieldCalibration {
    fn default() -> Self {
        Self {
            pixel_corners: [
                [110.0, 1035.0],
                [265.0, 275.0],
                [910.0, 260.0],
                [1640.0, 915.0],
            ],
            length: 105.0,
            width: 68.0,
        }
    }
}

impl FieldCalibration {
    pub fn corners(&self) -> [na::Point2<f32>; 4] {
        self.pixel_corners.map(|[x, y]| na::Point2::new(x, y))
    }

    /// World corners matching `pixel_corners` one for one.
    pub fn world_corners(&self) -> [na::Point2<f32>; 4] {
        [
            na::Point2::new(0.0, self.width),
            na::Point2::new(0.0, 0.0),
            na::Point2::new(self.length, 0.0),
            na::Point2::new(self.length, self.width),
        ]
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.length.is_finite() && self.length > 0.0)
            || !(self.width.is_finite() && self.width > 0.0)
        {
            return Err(Error::InvalidCalibration(format!(
                "field dimensions must be positive, got {} x {}",
                self.length, self.width
            )));
        }

        if self.pixel_corners.iter().flatten().any(|c| !c.is_finite()) {
            return Err(Error::InvalidCalibration(
                "corner coordinates must be finite".into(),
            ));
        }

        if !crate::math::is_convex_quad(&self.corners()) {
            return Err(Error::InvalidCalibration(
                "pixel corners must form a convex quadrilateral".into(),
            ));
        }

        Ok(())
    }
}

/// Fallback frame-to-frame identity assignment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct AssociationConfig {
    /// Frames a track may go unmatched before eviction.
    pub max_age: u32,
    /// A pairing is accepted only when its score is strictly above this.
    pub match_threshold: f32,
    /// Weight of IoU in the score; the proximity term gets the rest.
    pub iou_weight: f32,
    /// Scale of the pixel distance in `1 / (1 + scale * distance)`.
    pub distance_scale: f32,
}

impl Default for AssociationConfig {
    fn default() -> Self {
        Self {
            max_age: 30,
            match_threshold: 0.3,
            iou_weight: 0.7,
            distance_scale: 0.01,
        }
    }
}

impl AssociationConfig {
    pub fn validate(&self) -> Result<()> {
        check_finite("match_threshold", self.match_threshold)?;
        check_positive("distance_scale", self.distance_scale)?;

        if !(0.0..=1.0).contains(&self.iou_weight) {
            return Err(Error::InvalidParameter {
                name: "iou_weight",
                value: self.iou_weight,
            });
        }

        Ok(())
    }
}

/// Smoothing and derived motion quantities.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct KinematicsConfig {
    pub history_size: usize,
    pub smoothing_window: usize,
    pub poly_order: usize,
    pub sprint_threshold_kmh: f32,
    /// Frames per second of the source video.
    pub frame_rate: f32,
}

impl Default for KinematicsConfig {
    fn default() -> Self {
        Self {
            history_size: 60,
            smoothing_window: 7,
            poly_order: 2,
            sprint_threshold_kmh: 25.0,
            frame_rate: 24.0,
        }
    }
}

impl KinematicsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_size == 0 {
            return Err(Error::InvalidHistorySize);
        }

        if self.smoothing_window % 2 == 0 || self.smoothing_window <= self.poly_order {
            return Err(Error::InvalidSmoothingWindow {
                window: self.smoothing_window,
                order: self.poly_order,
            });
        }

        if !(self.frame_rate.is_finite() && self.frame_rate > 0.0) {
            return Err(Error::InvalidFrameRate(self.frame_rate));
        }

        check_finite("sprint_threshold_kmh", self.sprint_threshold_kmh)
    }
}

/// Team colour bootstrap and per-player vote smoothing.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct TeamConfig {
    /// Length of each player's label vote window.
    pub smoothing_window: usize,
    pub min_bootstrap_players: usize,
    /// Height of the torso band as a fraction of the box, clamped to [0.2, 0.6].
    pub torso_fraction: f32,
    /// Fraction of the box skipped at the top (head and background).
    pub head_fraction: f32,
    /// Inclusive HSV range treated as grass, hue on the 0..180 scale.
    pub green_lower: [u8; 3],
    pub green_upper: [u8; 3],
    /// Below this many non-grass pixels the whole torso is averaged.
    pub min_non_green_pixels: usize,
    /// Below this many usable pixels no colour is extracted.
    pub min_pixels: usize,
    pub kmeans_iterations: usize,
}

impl Default for TeamConfig {
    fn default() -> Self {
        Self {
            smoothing_window: 11,
            min_bootstrap_players: 8,
            torso_fraction: 0.4,
            head_fraction: 0.2,
            green_lower: [30, 40, 30],
            green_upper: [90, 255, 255],
            min_non_green_pixels: 30,
            min_pixels: 20,
            kmeans_iterations: 100,
        }
    }
}

impl TeamConfig {
    #[inline]
    pub fn effective_torso_fraction(&self) -> f32 {
        self.torso_fraction.clamp(0.2, 0.6)
    }

    pub fn validate(&self) -> Result<()> {
        if self.smoothing_window == 0 {
            return Err(Error::InvalidParameter {
                name: "smoothing_window",
                value: 0.0,
            });
        }

        if self.min_bootstrap_players < 2 {
            return Err(Error::InvalidParameter {
                name: "min_bootstrap_players",
                value: self.min_bootstrap_players as f32,
            });
        }

        check_finite("torso_fraction", self.torso_fraction)?;

        if !(0.0..1.0).contains(&self.head_fraction) {
            return Err(Error::InvalidParameter {
                name: "head_fraction",
                value: self.head_fraction,
            });
        }

        Ok(())
    }
}

/// Ball-to-player assignment.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PossessionConfig {
    /// Inclusive limit, in image pixels, between a foot point and the ball.
    pub max_player_ball_distance: f32,
}

impl Default for PossessionConfig {
    fn default() -> Self {
        Self {
            max_player_ball_distance: 70.0,
        }
    }
}

impl PossessionConfig {
    pub fn validate(&self) -> Result<()> {
        check_positive("max_player_ball_distance", self.max_player_ball_distance)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub motion: MotionConfig,
    pub field: FieldCalibration,
    pub association: AssociationConfig,
    pub kinematics: KinematicsConfig,
    pub team: TeamConfig,
    pub possession: PossessionConfig,
    /// Consecutive frames an absent entity keeps being extrapolated.
    pub max_missing_frames: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            motion: MotionConfig::default(),
            field: FieldCalibration::default(),
            association: AssociationConfig::default(),
            kinematics: KinematicsConfig::default(),
            team: TeamConfig::default(),
            possession: PossessionConfig::default(),
            max_missing_frames: AssociationConfig::default().max_age,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(src: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(src)?;
        config.validate()?;

        Ok(config)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let src = std::fs::read_to_string(path)?;
        Self::from_json_str(&src)
    }

    pub fn validate(&self) -> Result<()> {
        self.motion.validate()?;
        self.field.validate()?;
        self.association.validate()?;
        self.kinematics.validate()?;
        self.team.validate()?;
        self.possession.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        PipelineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{"kinematics": {"frame_rate": 30.0}, "possession": {"max_player_ball_distance": 2.5}}"#,
        )
        .unwrap();

        assert_eq!(config.kinematics.frame_rate, 30.0);
        assert_eq!(config.kinematics.history_size, 60);
        assert_eq!(config.possession.max_player_ball_distance, 2.5);
        assert_eq!(config.motion, MotionConfig::default());
    }

    #[test]
    fn rejects_bad_values_eagerly() {
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"kinematics": {"history_size": 0}}"#),
            Err(Error::InvalidHistorySize)
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"kinematics": {"smoothing_window": 6}}"#),
            Err(Error::InvalidSmoothingWindow { .. })
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"field": {"length": -1.0}}"#),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(
                r#"{"field": {"pixel_corners": [[0,0],[10,10],[10,0],[0,10]]}}"#
            ),
            Err(Error::InvalidCalibration(_))
        ));
        assert!(matches!(
            PipelineConfig::from_json_str(r#"{"motion": {"alpha": 1.5}}"#),
            Err(Error::InvalidParameter { name: "alpha", .. })
        ));
        assert!(matches!(
            PipelineConfig::from_json_str("{not json"),
            Err(Error::ConfigParseError(_))
        ));
    }

    #[test]
    fn feature_budget_is_bounded() {
        let huge = MotionConfig {
            max_corners: usize::MAX,
            ..Default::default()
        };
        assert!(matches!(
            huge.validate(),
            Err(Error::InvalidParameter { name: "max_corners", .. })
        ));

        let none = MotionConfig {
            max_corners: 0,
            ..Default::default()
        };
        assert!(none.validate().is_err());

        let deep = MotionConfig {
            pyramid_levels: u32::MAX,
            ..Default::default()
        };
        assert!(matches!(
            deep.validate(),
            Err(Error::InvalidParameter { name: "pyramid_levels", .. })
        ));

        let at_limit = MotionConfig {
            max_corners: MAX_CORNERS,
            pyramid_levels: MAX_PYRAMID_LEVELS,
            ..Default::default()
        };
        at_limit.validate().unwrap();
    }

    #[test]
    fn torso_fraction_is_clamped() {
        let team = TeamConfig {
            torso_fraction: 0.9,
            ..Default::default()
        };
        assert_eq!(team.effective_torso_fraction(), 0.6);
    }
}
