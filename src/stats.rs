use std::collections::HashMap;

use serde_derive::Serialize;

use crate::entity::TrackedEntity;
use crate::pipeline::FrameReport;
use crate::team::Team;

/// Speed change between consecutive frames (km/h) counted as implausible.
pub const SPEED_JUMP_KMH: f32 = 15.0;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Default)]
pub struct TeamStats {
    pub players: usize,
    /// Mean over players of their average speed, km/h.
    pub avg_speed: f32,
    pub max_speed: f32,
    /// Mean lifetime distance per player, metres.
    pub avg_distance: f32,
    pub max_distance: f32,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct MatchSummary {
    pub frames: u64,
    pub ball_detected_frames: u64,
    pub ball_interpolated_frames: u64,
    /// Share of frames with a detected ball.
    pub ball_detection_rate: f32,
    pub speed_jumps: u64,
    pub team_one: TeamStats,
    pub team_two: TeamStats,
}

#[derive(Debug, Clone, Default)]
struct PlayerTotals {
    team: Option<Team>,
    speed_sum: f32,
    samples: u32,
    max_speed: f32,
    distance: f32,
}

/// Running match figures fed one frame report at a time.
#[derive(Debug, Clone, Default)]
pub struct MatchStats {
    frames: u64,
    ball_detected: u64,
    ball_interpolated: u64,
    speed_jumps: u64,
    last_speeds: HashMap<(bool, u32), f32>,
    players: HashMap<u32, PlayerTotals>,
}

impl MatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, report: &FrameReport) {
        self.frames += 1;

        let mut seen = Vec::with_capacity(report.entities.len());

        for entity in &report.entities {
            let state = entity.state();
            let speed = state.kinematics.speed;
            let key = (matches!(entity, TrackedEntity::Ball(_)), state.id);
            seen.push(key);

            if let Some(prev) = self.last_speeds.insert(key, speed) {
                if (speed - prev).abs() > SPEED_JUMP_KMH {
                    self.speed_jumps += 1;
                }
            }

            match entity {
                TrackedEntity::Ball(ball) => {
                    if ball.is_observed() {
                        self.ball_detected += 1;
                    } else {
                        self.ball_interpolated += 1;
                    }
                }
                TrackedEntity::Player(player) => {
                    let totals = self.players.entry(state.id).or_default();

                    if player.team.is_some() {
                        totals.team = player.team;
                    }

                    totals.speed_sum += speed;
                    totals.samples += 1;
                    totals.max_speed = totals.max_speed.max(speed);
                    totals.distance = state.kinematics.total_distance;
                }
            }
        }

        self.last_speeds.retain(|key, _| seen.contains(key));
    }

    #[inline]
    pub fn speed_jumps(&self) -> u64 {
        self.speed_jumps
    }

    pub fn team(&self, team: Team) -> TeamStats {
        let members: Vec<&PlayerTotals> = self
            .players
            .values()
            .filter(|p| p.team == Some(team) && p.samples > 0)
            .collect();

        if members.is_empty() {
            return TeamStats::default();
        }

        let n = members.len() as f32;

        TeamStats {
            players: members.len(),
            avg_speed: members
                .iter()
                .map(|p| p.speed_sum / p.samples as f32)
                .sum::<f32>()
                / n,
            max_speed: members.iter().map(|p| p.max_speed).fold(0.0, f32::max),
            avg_distance: members.iter().map(|p| p.distance).sum::<f32>() / n,
            max_distance: members.iter().map(|p| p.distance).fold(0.0, f32::max),
        }
    }

    pub fn summary(&self) -> MatchSummary {
        MatchSummary {
            frames: self.frames,
            ball_detected_frames: self.ball_detected,
            ball_interpolated_frames: self.ball_interpolated,
            ball_detection_rate: if self.frames > 0 {
                self.ball_detected as f32 / self.frames as f32
            } else {
                0.0
            },
            speed_jumps: self.speed_jumps,
            team_one: self.team(Team::One),
            team_two: self.team(Team::Two),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{EntityState, PlayerState};
    use crate::kinematics::KinematicState;
    use nalgebra as na;

    fn state(id: u32, observed: bool, speed: f32, distance: f32) -> EntityState {
        let p = na::Point2::new(1.0, 1.0);

        EntityState {
            id,
            bbox: None,
            raw_position: observed.then_some(p),
            adjusted_position: observed.then_some(p),
            world_position: observed.then_some(p),
            kinematics: KinematicState {
                speed,
                total_distance: distance,
                ..Default::default()
            },
        }
    }

    fn player(id: u32, team: Team, speed: f32, distance: f32) -> TrackedEntity {
        TrackedEntity::Player(PlayerState {
            state: state(id, true, speed, distance),
            team: Some(team),
            has_possession: false,
        })
    }

    fn report(entities: Vec<TrackedEntity>) -> FrameReport {
        FrameReport {
            frame_index: 0,
            timestamp: 0.0,
            camera_motion: na::Vector2::zeros(),
            entities,
            possession: None,
            team_in_control: None,
        }
    }

    #[test]
    fn counts_ball_frames_and_speed_jumps() {
        let mut stats = MatchStats::new();

        stats.record(&report(vec![TrackedEntity::Ball(state(1, true, 10.0, 0.0))]));
        stats.record(&report(vec![TrackedEntity::Ball(state(1, false, 30.0, 0.0))]));
        stats.record(&report(vec![TrackedEntity::Ball(state(1, true, 40.0, 0.0))]));
        stats.record(&report(vec![]));

        let s = stats.summary();
        assert_eq!(s.frames, 4);
        assert_eq!(s.ball_detected_frames, 2);
        assert_eq!(s.ball_interpolated_frames, 1);
        assert_eq!(s.speed_jumps, 1);
        assert!((s.ball_detection_rate - 0.5).abs() < 1e-6);
    }

    #[test]
    fn aggregates_per_team() {
        let mut stats = MatchStats::new();

        stats.record(&report(vec![
            player(2, Team::One, 10.0, 5.0),
            player(3, Team::One, 20.0, 9.0),
            player(4, Team::Two, 8.0, 3.0),
        ]));
        stats.record(&report(vec![
            player(2, Team::One, 14.0, 6.0),
            player(3, Team::One, 22.0, 10.0),
        ]));

        let one = stats.team(Team::One);
        assert_eq!(one.players, 2);
        assert!((one.avg_speed - 16.5).abs() < 1e-5);
        assert_eq!(one.max_speed, 22.0);
        assert!((one.avg_distance - 8.0).abs() < 1e-5);
        assert_eq!(one.max_distance, 10.0);

        let two = stats.team(Team::Two);
        assert_eq!(two.players, 1);
        assert_eq!(two.max_speed, 8.0);
        assert_eq!(stats.speed_jumps(), 0);
    }
}
