use image::RgbImage;
use nalgebra as na;
use tracing::{debug, info, trace};

use crate::config::MotionConfig;
use crate::error::Result;
use crate::flow::{self, FeatureParams, LucasKanade, Pyramid};
use crate::rolling_avg::RollingAvg;

/// Latest camera displacement estimate, in pixels per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraMotionSample {
    pub raw: na::Vector2<f32>,
    pub smoothed: na::Vector2<f32>,
}

impl Default for CameraMotionSample {
    fn default() -> Self {
        Self {
            raw: na::Vector2::zeros(),
            smoothed: na::Vector2::zeros(),
        }
    }
}

/// Estimates camera pan between consecutive frames from features sampled
/// in the left and right margins of the image, where players rarely are.
#[derive(Debug)]
pub struct MotionCompensator {
    config: MotionConfig,
    features: FeatureParams,
    lk: LucasKanade,
    prev: Option<Pyramid>,
    points: Vec<na::Point2<f32>>,
    ema: RollingAvg,
    last: CameraMotionSample,
}

impl MotionCompensator {
    pub fn new(config: MotionConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            features: FeatureParams {
                max_corners: config.max_corners,
                quality_level: config.quality_level,
                min_distance: config.min_feature_distance,
                block_size: config.block_size,
            },
            lk: LucasKanade {
                window_size: config.window_size,
                max_iterations: config.max_iterations,
                epsilon: config.epsilon,
            },
            ema: RollingAvg::new(config.alpha),
            prev: None,
            points: Vec::new(),
            last: CameraMotionSample::default(),
            config,
        })
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.prev.is_some()
    }

    #[inline]
    pub fn last_sample(&self) -> CameraMotionSample {
        self.last
    }

    #[inline]
    pub fn feature_count(&self) -> usize {
        self.points.len()
    }

    /// Seeds the reference frame and the feature set.
    pub fn initialize(&mut self, first_frame: &RgbImage) {
        let pyramid = self.pyramid(first_frame);
        self.points = self.select_features(&pyramid);
        self.prev = Some(pyramid);
        self.ema.clear();
        self.last = CameraMotionSample::default();

        debug!(features = self.points.len(), "motion compensator initialised");
    }

    /// Smoothed camera displacement between the previous frame and `frame`.
    /// Subtract it from raw positions to cancel the pan.
    pub fn update(&mut self, frame: &RgbImage) -> na::Vector2<f32> {
        let pyramid = self.pyramid(frame);

        let prev = match self.prev.take() {
            Some(prev) if prev.dimensions() == pyramid.dimensions() && !self.points.is_empty() => {
                prev
            }
            _ => {
                self.reseed(pyramid);
                return na::Vector2::zeros();
            }
        };

        let tracked = self.lk.track(&prev, &pyramid, &self.points);

        let pairs: Vec<(na::Point2<f32>, na::Point2<f32>)> = self
            .points
            .iter()
            .zip(tracked)
            .filter_map(|(old, new)| new.map(|new| (*old, new)))
            .collect();

        if pairs.is_empty() {
            debug!("optical flow lost every feature");
            self.reseed(pyramid);
            return na::Vector2::zeros();
        }

        let mut max_distance = 0.0f32;
        let mut raw = na::Vector2::zeros();

        for (old, new) in &pairs {
            let diff = new - old;
            let distance = diff.norm();

            if distance > max_distance {
                max_distance = distance;
                raw = diff;
            }
        }

        if max_distance > self.config.minimum_distance {
            info!(distance = max_distance, "large camera jump, re-seeding features");
            self.points = self.select_features(&pyramid);
        } else {
            self.points = pairs.into_iter().map(|(_, new)| new).collect();
        }

        let smoothed = self.ema.push(raw);
        self.last = CameraMotionSample { raw, smoothed };
        self.prev = Some(pyramid);

        trace!(dx = smoothed.x, dy = smoothed.y, tracked = self.points.len(), "camera motion");

        smoothed
    }

    fn reseed(&mut self, pyramid: Pyramid) {
        self.points = self.select_features(&pyramid);
        self.prev = Some(pyramid);
        self.last = CameraMotionSample {
            raw: na::Vector2::zeros(),
            smoothed: self.ema.value(),
        };

        debug!(features = self.points.len(), "feature set re-seeded");
    }

    fn pyramid(&self, frame: &RgbImage) -> Pyramid {
        Pyramid::build(
            flow::to_gray(frame),
            self.config.pyramid_levels,
            self.config.window_size,
        )
    }

    fn select_features(&self, pyramid: &Pyramid) -> Vec<na::Point2<f32>> {
        let width = pyramid.dimensions().0;
        let left = self.config.left_strip;
        let right = width.saturating_sub(self.config.right_strip);

        flow::good_features(pyramid.base(), &self.features, |x| x < left || x >= right)
    }
}
