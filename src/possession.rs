use std::collections::HashMap;

use nalgebra as na;
use serde_derive::Serialize;
use tracing::trace;

use crate::bbox::{BBox, Ltrb};
use crate::config::PossessionConfig;
use crate::error::Result;
use crate::team::Team;

/// Hands the ball to the closest player whose feet are within reach.
#[derive(Debug, Clone)]
pub struct PossessionAssigner {
    max_distance: f32,
}

impl PossessionAssigner {
    pub fn new(config: &PossessionConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            max_distance: config.max_player_ball_distance,
        })
    }

    /// Distance from the nearer of the two bottom corners of `bbox` to `ball`.
    #[inline]
    pub fn reach(bbox: &BBox<Ltrb>, ball: &na::Point2<f32>) -> f32 {
        na::distance(&bbox.bottom_left(), ball).min(na::distance(&bbox.bottom_right(), ball))
    }

    /// The id of the closest player within `max_player_ball_distance`
    /// (inclusive). On equal distances the first player wins.
    pub fn assign<'a, I>(&self, ball: na::Point2<f32>, players: I) -> Option<u32>
    where
        I: IntoIterator<Item = (u32, &'a BBox<Ltrb>)>,
    {
        let mut best: Option<(u32, f32)> = None;

        for (id, bbox) in players {
            let distance = Self::reach(bbox, &ball);

            if distance <= self.max_distance && best.map_or(true, |(_, d)| distance < d) {
                best = Some((id, distance));
            }
        }

        if let Some((id, distance)) = best {
            trace!(id, distance, "ball assigned");
        }

        best.map(|(id, _)| id)
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct ControlShare {
    pub team_one: f32,
    pub team_two: f32,
}

/// Per-frame team-in-control timeline plus per-player time on the ball.
#[derive(Debug, Clone, Default)]
pub struct BallControl {
    timeline: Vec<Option<Team>>,
    held_frames: HashMap<u32, u32>,
}

impl BallControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one frame. Without an owner of known team the previous
    /// frame's team keeps control.
    pub fn push(&mut self, owner: Option<u32>, team: Option<Team>) -> Option<Team> {
        if let Some(id) = owner {
            *self.held_frames.entry(id).or_insert(0) += 1;
        }

        let previous = self.timeline.last().copied().flatten();
        let current = match (owner, team) {
            (Some(_), Some(team)) => Some(team),
            _ => previous,
        };

        self.timeline.push(current);
        current
    }

    #[inline]
    pub fn timeline(&self) -> &[Option<Team>] {
        &self.timeline
    }

    #[inline]
    pub fn current(&self) -> Option<Team> {
        self.timeline.last().copied().flatten()
    }

    /// Fraction of controlled frames per team; zero for both before anyone
    /// had the ball.
    pub fn shares(&self) -> ControlShare {
        let ones = self.timeline.iter().filter(|t| **t == Some(Team::One)).count();
        let twos = self.timeline.iter().filter(|t| **t == Some(Team::Two)).count();
        let total = ones + twos;

        if total == 0 {
            return ControlShare::default();
        }

        ControlShare {
            team_one: ones as f32 / total as f32,
            team_two: twos as f32 / total as f32,
        }
    }

    #[inline]
    pub fn frames_held(&self, id: u32) -> u32 {
        self.held_frames.get(&id).copied().unwrap_or(0)
    }

    /// Seconds player `id` has held the ball.
    #[inline]
    pub fn seconds_held(&self, id: u32, frame_rate: f32) -> f32 {
        if frame_rate > 0.0 {
            self.frames_held(id) as f32 / frame_rate
        } else {
            0.0
        }
    }

    pub fn holders(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.held_frames.iter().map(|(id, frames)| (*id, *frames))
    }
}
