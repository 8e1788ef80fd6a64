//! Per-entity motion history in pitch coordinates.
//!
//! Each entity keeps two bounded buffers, positions and raw speeds. Gaps are
//! filled by linear extrapolation, both buffers are smoothed with a
//! Savitzky-Golay filter once they are at least one window long, and the
//! latest sample of the smoothed series yields speed, acceleration and
//! distance figures.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use nalgebra as na;
use serde_derive::Serialize;
use tracing::{trace, warn};

use crate::circular_queue::CircularQueue;
use crate::config::KinematicsConfig;
use crate::error::{Error, Result};
use crate::math;

const MS_TO_KMH: f32 = 3.6;

#[derive(Serialize, Debug, Clone, Copy, PartialEq)]
pub struct KinematicState {
    /// Position pushed into the history, observed or extrapolated.
    pub position: na::Point2<f32>,
    pub smoothed_position: na::Point2<f32>,
    /// km/h
    pub speed: f32,
    /// km/h per second
    pub acceleration: f32,
    /// Metres between the two latest smoothed positions.
    pub incremental_distance: f32,
    /// Metres travelled within the retained history.
    pub cumulative_distance: f32,
    /// Metres travelled since the entity first appeared.
    pub total_distance: f32,
    pub is_sprinting: bool,
    pub interpolated: bool,
}

impl Default for KinematicState {
    fn default() -> Self {
        Self {
            position: na::Point2::origin(),
            smoothed_position: na::Point2::origin(),
            speed: 0.0,
            acceleration: 0.0,
            incremental_distance: 0.0,
            cumulative_distance: 0.0,
            total_distance: 0.0,
            is_sprinting: false,
            interpolated: false,
        }
    }
}

#[derive(Debug)]
struct History {
    positions: CircularQueue<na::Point2<f32>>,
    speeds: CircularQueue<f32>,
    total_distance: f32,
}

impl History {
    fn new(size: usize) -> Self {
        Self {
            positions: CircularQueue::with_capacity(size),
            speeds: CircularQueue::with_capacity(size),
            total_distance: 0.0,
        }
    }

    /// `v1 + (v1 - v2)` over the two latest positions, once three exist.
    fn extrapolate(&self) -> na::Point2<f32> {
        if self.positions.len() < 3 {
            return na::Point2::origin();
        }

        match (self.positions.nth_latest(0), self.positions.nth_latest(1)) {
            (Some(v1), Some(v2)) => v1 + (v1 - v2),
            _ => na::Point2::origin(),
        }
    }
}

pub struct KinematicEstimator<K = u32> {
    config: KinematicsConfig,
    coeffs: na::DVector<f32>,
    histories: HashMap<K, History>,
}

impl<K: Copy + Eq + Hash + fmt::Debug> KinematicEstimator<K> {
    pub fn new(config: KinematicsConfig) -> Result<Self> {
        config.validate()?;

        let coeffs = math::savgol_coefficients(config.smoothing_window, config.poly_order)
            .ok_or(Error::InvalidSmoothingWindow {
                window: config.smoothing_window,
                order: config.poly_order,
            })?;

        Ok(Self {
            config,
            coeffs,
            histories: HashMap::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &KinematicsConfig {
        &self.config
    }

    #[inline]
    pub fn contains(&self, id: K) -> bool {
        self.histories.contains_key(&id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.histories.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = K> + '_ {
        self.histories.keys().copied()
    }

    pub fn forget(&mut self, id: K) -> bool {
        self.histories.remove(&id).is_some()
    }

    /// Records `position` for `id` (extrapolating when it is `None`) and
    /// returns the kinematics after this step. A non-positive `frame_rate`
    /// falls back to the configured one.
    pub fn update(
        &mut self,
        id: K,
        position: Option<na::Point2<f32>>,
        frame_rate: f32,
    ) -> KinematicState {
        let frame_rate = if frame_rate.is_finite() && frame_rate > 0.0 {
            frame_rate
        } else {
            warn!(frame_rate, "invalid frame rate, using the configured one");
            self.config.frame_rate
        };

        let size = self.config.history_size;
        let history = self
            .histories
            .entry(id)
            .or_insert_with(|| History::new(size));

        let observed = position.filter(|p| p.x.is_finite() && p.y.is_finite());
        let interpolated = observed.is_none();
        let position = observed.unwrap_or_else(|| history.extrapolate());

        history.positions.push(position);

        let smoothed = smooth_points(history.positions.as_slice(), &self.coeffs);

        let incremental_distance = match smoothed.as_slice() {
            [.., prev, last] => na::distance(prev, last),
            _ => 0.0,
        };

        let cumulative_distance: f32 = smoothed
            .windows(2)
            .map(|w| na::distance(&w[0], &w[1]))
            .sum();

        history.total_distance += incremental_distance;
        history.speeds.push(incremental_distance * frame_rate * MS_TO_KMH);

        let speeds = history.speeds.as_slice();
        let acceleration = match speeds {
            [.., prev, last] => (last - prev) / (1.0 / frame_rate),
            _ => 0.0,
        };

        let speed = smooth_values(speeds, &self.coeffs)
            .last()
            .copied()
            .unwrap_or(0.0)
            .max(0.0);

        let state = KinematicState {
            position,
            smoothed_position: smoothed.last().copied().unwrap_or(position),
            speed,
            acceleration,
            incremental_distance,
            cumulative_distance,
            total_distance: history.total_distance,
            is_sprinting: speed >= self.config.sprint_threshold_kmh,
            interpolated,
        };

        trace!(?id, speed, distance = state.total_distance, interpolated, "kinematics");

        state
    }
}

fn smooth_values(values: &[f32], coeffs: &na::DVector<f32>) -> Vec<f32> {
    if values.len() < coeffs.len() {
        return values.to_vec();
    }

    math::savgol_filter(values, coeffs)
}

fn smooth_points(points: &[na::Point2<f32>], coeffs: &na::DVector<f32>) -> Vec<na::Point2<f32>> {
    if points.len() < coeffs.len() {
        return points.to_vec();
    }

    let xs: Vec<f32> = points.iter().map(|p| p.x).collect();
    let ys: Vec<f32> = points.iter().map(|p| p.y).collect();

    math::savgol_filter(&xs, coeffs)
        .into_iter()
        .zip(math::savgol_filter(&ys, coeffs))
        .map(|(x, y)| na::Point2::new(x, y))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn estimator(config: KinematicsConfig) -> KinematicEstimator {
        KinematicEstimator::new(config).unwrap()
    }

    #[test]
    fn straight_line_at_one_metre_per_frame() {
        let mut est = estimator(KinematicsConfig::default());
        let mut state = KinematicState::default();

        for x in 0..5 {
            state = est.update(7, Some(na::Point2::new(x as f32, 0.0)), 1.0);
        }

        assert!((state.speed - 3.6).abs() < 1e-5);
        assert!((state.cumulative_distance - 4.0).abs() < 1e-5);
        assert!((state.total_distance - 4.0).abs() < 1e-5);
        assert!((state.incremental_distance - 1.0).abs() < 1e-6);
        assert_eq!(state.acceleration, 0.0);
        assert!(!state.is_sprinting);
    }

    #[test]
    fn sprint_threshold_is_inclusive() {
        let speed = 1.0f32 * 24.0 * 3.6;

        let mut at = estimator(KinematicsConfig {
            sprint_threshold_kmh: speed,
            ..Default::default()
        });
        at.update(1, Some(na::Point2::new(0.0, 0.0)), 24.0);
        let state = at.update(1, Some(na::Point2::new(1.0, 0.0)), 24.0);
        assert_eq!(state.speed, speed);
        assert!(state.is_sprinting);

        let mut below = estimator(KinematicsConfig {
            sprint_threshold_kmh: speed + 1.0,
            ..Default::default()
        });
        below.update(1, Some(na::Point2::new(0.0, 0.0)), 24.0);
        let state = below.update(1, Some(na::Point2::new(1.0, 0.0)), 24.0);
        assert!(!state.is_sprinting);
    }

    #[test]
    fn extrapolates_missing_positions() {
        let mut est = estimator(KinematicsConfig::default());

        for x in [0.0, 1.0, 2.0] {
            est.update(3, Some(na::Point2::new(x, 5.0)), 24.0);
        }

        let state = est.update(3, None, 24.0);
        assert!(state.interpolated);
        assert_eq!(state.position, na::Point2::new(3.0, 5.0));
    }

    #[test]
    fn non_finite_positions_count_as_gaps() {
        let mut est = estimator(KinematicsConfig::default());

        for x in [0.0, 1.0, 2.0] {
            est.update(3, Some(na::Point2::new(x, 5.0)), 24.0);
        }

        let state = est.update(3, Some(na::Point2::new(f32::NAN, 5.0)), 24.0);
        assert!(state.interpolated);
        assert_eq!(state.position, na::Point2::new(3.0, 5.0));

        let state = est.update(3, Some(na::Point2::new(4.0, f32::INFINITY)), 24.0);
        assert!(state.interpolated);
        assert!(state.speed.is_finite());

        let state = est.update(3, Some(na::Point2::new(5.0, 5.0)), 24.0);
        assert!(!state.interpolated);
    }

    #[test]
    fn short_history_extrapolates_to_origin() {
        let mut est = estimator(KinematicsConfig::default());

        est.update(3, Some(na::Point2::new(10.0, 5.0)), 24.0);
        let state = est.update(3, None, 24.0);

        assert_eq!(state.position, na::Point2::origin());
    }

    #[test]
    fn distances_and_speed_are_never_negative() {
        let mut est = estimator(KinematicsConfig {
            history_size: 20,
            ..Default::default()
        });

        let mut prev_total = 0.0;

        for i in 0..80 {
            let t = i as f32;
            let p = if i % 9 == 4 {
                None
            } else {
                Some(na::Point2::new(50.0 + 10.0 * (t * 0.7).sin(), 30.0 + (t * 1.3).cos() * 4.0))
            };

            let s = est.update(11, p, 25.0);

            assert!(s.speed >= 0.0);
            assert!(s.incremental_distance >= 0.0);
            assert!(s.cumulative_distance >= 0.0);
            assert!(s.total_distance >= prev_total);

            prev_total = s.total_distance;
        }
    }

    #[test]
    fn cumulative_distance_grows_within_window() {
        let mut est = estimator(KinematicsConfig {
            history_size: 12,
            smoothing_window: 13,
            ..Default::default()
        });

        let mut prev = 0.0;
        for i in 0..12 {
            let t = i as f32;
            let s = est.update(4, Some(na::Point2::new(t * 0.5, (t * 0.9).sin())), 24.0);
            assert!(s.cumulative_distance >= prev);
            prev = s.cumulative_distance;
        }

        // window full: the oldest segment drops out, the lifetime total does not
        let s = est.update(4, Some(na::Point2::new(6.0, 0.0)), 24.0);
        assert!(s.total_distance > s.cumulative_distance);
    }

    #[test]
    fn smoothing_flattens_jitter() {
        let mut est = estimator(KinematicsConfig::default());
        let mut state = KinematicState::default();

        for i in 0..30 {
            let jitter = if i % 2 == 0 { 0.05 } else { -0.05 };
            state = est.update(1, Some(na::Point2::new(i as f32 * 0.2, jitter)), 24.0);
        }

        assert!(state.smoothed_position.y.abs() < 0.05);
    }

    #[test]
    fn entities_are_independent() {
        let mut est = estimator(KinematicsConfig::default());

        est.update(1, Some(na::Point2::new(0.0, 0.0)), 1.0);
        est.update(2, Some(na::Point2::new(50.0, 0.0)), 1.0);
        let a = est.update(1, Some(na::Point2::new(1.0, 0.0)), 1.0);

        assert!((a.incremental_distance - 1.0).abs() < 1e-6);
        assert_eq!(est.len(), 2);
        assert!(est.forget(2));
        assert!(!est.contains(2));
    }

    #[test]
    fn rejects_even_window() {
        let config = KinematicsConfig {
            smoothing_window: 4,
            ..Default::default()
        };
        assert!(matches!(
            KinematicEstimator::<u32>::new(config),
            Err(Error::InvalidSmoothingWindow { .. })
        ));
    }
}
