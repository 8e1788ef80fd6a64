use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use nalgebra as na;
use serde_derive::Serialize;
use tracing::{debug, info, trace};

use crate::association::IdentityAssociator;
use crate::bbox::{BBox, Ltrb};
use crate::config::PipelineConfig;
use crate::detection::{Detection, EntityClass};
use crate::entity::{EntityState, PlayerState, TrackedEntity};
use crate::error::Result;
use crate::frame::Frame;
use crate::kinematics::{KinematicEstimator, KinematicState};
use crate::motion::MotionCompensator;
use crate::possession::{BallControl, PossessionAssigner};
use crate::stats::MatchStats;
use crate::team::{Team, TeamClassifier};
use crate::view::CoordinateMapper;

/// The ball is a single entity per stream.
pub const BALL_ID: u32 = 1;

/// Everything known after one frame.
#[derive(Serialize, Debug, Clone)]
pub struct FrameReport {
    pub frame_index: u64,
    pub timestamp: f32,
    /// Smoothed camera displacement removed from this frame's positions.
    pub camera_motion: na::Vector2<f32>,
    pub entities: Vec<TrackedEntity>,
    /// Player holding the ball in this frame.
    pub possession: Option<u32>,
    pub team_in_control: Option<Team>,
}

impl FrameReport {
    pub fn player(&self, id: u32) -> Option<&PlayerState> {
        self.entities
            .iter()
            .filter_map(TrackedEntity::as_player)
            .find(|p| p.state.id == id)
    }

    pub fn ball(&self) -> Option<&EntityState> {
        self.entities.iter().find_map(|e| match e {
            TrackedEntity::Ball(b) => Some(b),
            TrackedEntity::Player(_) => None,
        })
    }
}

struct Located {
    raw: na::Point2<f32>,
    adjusted: na::Point2<f32>,
    world: Option<na::Point2<f32>>,
}

fn locate(mapper: &CoordinateMapper, motion: na::Vector2<f32>, det: &Detection) -> Located {
    let raw = det.position();
    let adjusted = raw - motion;

    Located {
        raw,
        adjusted,
        world: mapper.transform(adjusted),
    }
}

/// Per-stream pipeline: one instance of every stateful stage.
pub struct Session {
    config: PipelineConfig,
    motion: MotionCompensator,
    mapper: CoordinateMapper,
    associator: IdentityAssociator,
    players: KinematicEstimator,
    ball: KinematicEstimator,
    teams: TeamClassifier,
    possession: PossessionAssigner,
    control: BallControl,
    stats: MatchStats,
    missing: HashMap<(EntityClass, u32), u32>,
    upstream_ids: HashSet<u32>,
    frame_index: u64,
    latest: Rc<[TrackedEntity]>,
}

impl Session {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            motion: MotionCompensator::new(config.motion.clone())?,
            mapper: CoordinateMapper::new(&config.field)?,
            associator: IdentityAssociator::new(&config.association)?,
            players: KinematicEstimator::new(config.kinematics.clone())?,
            ball: KinematicEstimator::new(config.kinematics.clone())?,
            teams: TeamClassifier::new(config.team.clone())?,
            possession: PossessionAssigner::new(&config.possession)?,
            control: BallControl::new(),
            stats: MatchStats::new(),
            missing: HashMap::new(),
            upstream_ids: HashSet::new(),
            frame_index: 0,
            latest: Rc::new([]),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    #[inline]
    pub fn frames_processed(&self) -> u64 {
        self.frame_index
    }

    #[inline]
    pub fn stats(&self) -> &MatchStats {
        &self.stats
    }

    #[inline]
    pub fn ball_control(&self) -> &BallControl {
        &self.control
    }

    #[inline]
    pub fn teams(&self) -> &TeamClassifier {
        &self.teams
    }

    #[inline]
    pub fn motion(&self) -> &MotionCompensator {
        &self.motion
    }

    #[inline]
    pub fn mapper(&self) -> &CoordinateMapper {
        &self.mapper
    }

    #[inline]
    pub fn entities(&self) -> Rc<[TrackedEntity]> {
        self.latest.clone()
    }

    /// Seconds player `id` has held the ball so far.
    #[inline]
    pub fn possession_seconds(&self, id: u32) -> f32 {
        self.control
            .seconds_held(id, self.config.kinematics.frame_rate)
    }

    /// Runs every stage over `frame`. Sensing gaps never fail: missing
    /// detections are extrapolated and unmappable points stay `None`.
    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let frame_rate = self.config.kinematics.frame_rate;

        let camera_motion = if self.motion.is_initialized() {
            self.motion.update(&frame.image)
        } else {
            self.motion.initialize(&frame.image);
            na::Vector2::zeros()
        };

        let observed = self.identify_players(frame);
        let observed_ids: HashSet<u32> = observed.iter().map(|(id, _)| *id).collect();

        if !self.teams.is_trained() && !observed.is_empty() {
            let boxes: Vec<(u32, BBox<Ltrb>)> =
                observed.iter().map(|(id, det)| (*id, det.bbox)).collect();
            self.teams.bootstrap(&frame.image, &boxes);
        }

        let mut players = Vec::with_capacity(observed.len());

        for (id, det) in &observed {
            let loc = locate(&self.mapper, camera_motion, det);
            let kinematics = self.players.update(*id, loc.world, frame_rate);
            let team = self.teams.classify(&frame.image, *id, &det.bbox);
            self.missing.remove(&(EntityClass::Player, *id));

            players.push(PlayerState {
                state: EntityState {
                    id: *id,
                    bbox: Some(det.bbox),
                    raw_position: Some(loc.raw),
                    adjusted_position: Some(loc.adjusted),
                    world_position: loc.world,
                    kinematics,
                },
                team,
                has_possession: false,
            });
        }

        let mut absent: Vec<u32> = self
            .players
            .ids()
            .filter(|id| !observed_ids.contains(id))
            .collect();
        absent.sort_unstable();

        for id in absent {
            if self.mark_missing(EntityClass::Player, id) {
                self.players.forget(id);
                self.teams.forget(id);
                continue;
            }

            players.push(PlayerState {
                state: extrapolated(id, self.players.update(id, None, frame_rate)),
                team: self.teams.team_of(id),
                has_possession: false,
            });
        }

        let ball_det = frame
            .of_class(EntityClass::Ball)
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .copied();

        let ball = match ball_det {
            Some(det) => {
                let loc = locate(&self.mapper, camera_motion, &det);
                self.missing.remove(&(EntityClass::Ball, BALL_ID));

                Some(EntityState {
                    id: BALL_ID,
                    bbox: Some(det.bbox),
                    raw_position: Some(loc.raw),
                    adjusted_position: Some(loc.adjusted),
                    world_position: loc.world,
                    kinematics: self.ball.update(BALL_ID, loc.world, frame_rate),
                })
            }
            None if self.ball.contains(BALL_ID) => {
                if self.mark_missing(EntityClass::Ball, BALL_ID) {
                    self.ball.forget(BALL_ID);
                    None
                } else {
                    Some(extrapolated(
                        BALL_ID,
                        self.ball.update(BALL_ID, None, frame_rate),
                    ))
                }
            }
            None => None,
        };

        let possession = ball_det.and_then(|det| {
            self.possession.assign(
                det.position(),
                observed.iter().map(|(id, det)| (*id, &det.bbox)),
            )
        });

        let owner_team = possession.and_then(|id| {
            players
                .iter_mut()
                .find(|p| p.state.id == id)
                .and_then(|p| {
                    p.has_possession = true;
                    p.team
                })
        });

        let team_in_control = self.control.push(possession, owner_team);

        let mut entities: Vec<TrackedEntity> =
            players.into_iter().map(TrackedEntity::Player).collect();
        entities.extend(ball.map(TrackedEntity::Ball));

        let report = FrameReport {
            frame_index: self.frame_index,
            timestamp: frame.timestamp,
            camera_motion,
            entities,
            possession,
            team_in_control,
        };

        self.stats.record(&report);
        self.latest = report.entities.clone().into();
        self.frame_index += 1;

        debug!(
            frame = report.frame_index,
            entities = report.entities.len(),
            dx = camera_motion.x,
            dy = camera_motion.y,
            possession = ?possession,
            "frame processed"
        );

        report
    }

    /// Player detections with their ids, first occurrence of each id kept.
    /// Boxes carrying an upstream id keep it; the rest are numbered by the
    /// associator from above every upstream id seen so far. The associator
    /// runs every frame, so its tracks age even when nothing needs an id.
    fn identify_players(&mut self, frame: &Frame) -> Vec<(u32, Detection)> {
        let mut identified = Vec::new();
        let mut anonymous = Vec::new();

        for det in frame.of_class(EntityClass::Player).copied() {
            match det.track_id {
                Some(id) => identified.push((id, det)),
                None => anonymous.push(det),
            }
        }

        for (id, _) in &identified {
            let id = *id;

            if self.upstream_ids.insert(id) && id < self.associator.next_id() {
                // a local identity may already live under this id
                if self.associator.release(id) | self.players.forget(id) {
                    debug!(id, "local identity superseded by upstream id");
                }
                self.teams.forget(id);
                self.missing.remove(&(EntityClass::Player, id));
            }

            self.associator.reserve_through(id);
        }

        if !anonymous.is_empty() {
            trace!(count = anonymous.len(), "assigning player identities locally");
        }

        let local = self.associator.update(&anonymous);

        let mut seen = HashSet::with_capacity(identified.len() + local.len());
        identified
            .into_iter()
            .chain(local)
            .filter(|(id, _)| seen.insert(*id))
            .collect()
    }

    /// Bumps the absence counter of an entity; `true` once it has been
    /// missing for longer than `max_missing_frames`.
    fn mark_missing(&mut self, class: EntityClass, id: u32) -> bool {
        let count = self.missing.entry((class, id)).or_insert(0);
        *count += 1;

        if *count > self.config.max_missing_frames {
            self.missing.remove(&(class, id));
            debug!(?class, id, "entity dropped after prolonged absence");
            return true;
        }

        false
    }
}

fn extrapolated(id: u32, kinematics: KinematicState) -> EntityState {
    EntityState {
        id,
        bbox: None,
        raw_position: None,
        adjusted_position: None,
        world_position: None,
        kinematics,
    }
}

/// Independent sessions keyed by stream name.
pub struct MatchAnalyzer {
    config: PipelineConfig,
    sessions: HashMap<String, Session>,
}

impl MatchAnalyzer {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            sessions: HashMap::new(),
        })
    }

    #[inline]
    pub fn session(&self, src: &str) -> Option<&Session> {
        self.sessions.get(src)
    }

    pub fn sources(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    fn session_mut(&mut self, src: &str) -> Result<&mut Session> {
        match self.sessions.entry(src.to_string()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                info!(src, "new stream session");
                Ok(entry.insert(Session::new(self.config.clone())?))
            }
        }
    }
}

impl crate::Tracking for MatchAnalyzer {
    fn update(&mut self, frames: &[Frame], src: &str) -> Result<Vec<FrameReport>> {
        let session = self.session_mut(src)?;

        Ok(frames.iter().map(|f| session.process_frame(f)).collect())
    }

    #[inline]
    fn entities(&self, src: &str) -> Rc<[TrackedEntity]> {
        if let Some(session) = self.sessions.get(src) {
            return session.entities();
        }

        Rc::new([])
    }

    fn close(&mut self, src: &str) -> bool {
        let closed = self.sessions.remove(src).is_some();
        if closed {
            info!(src, "stream session closed");
        }

        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AssociationConfig, FieldCalibration};
    use image::{Rgb, RgbImage};

    fn session() -> Session {
        Session::new(PipelineConfig {
            field: FieldCalibration {
                pixel_corners: [[0.0, 300.0], [0.0, 0.0], [400.0, 0.0], [400.0, 300.0]],
                ..Default::default()
            },
            association: AssociationConfig {
                max_age: 30,
                ..Default::default()
            },
            ..Default::default()
        })
        .unwrap()
    }

    fn player(left: f32, id: Option<u32>) -> Detection {
        let det = Detection::new(EntityClass::Player, BBox::ltrb(left, 120.0, left + 20.0, 170.0));
        match id {
            Some(id) => det.with_track_id(id),
            None => det,
        }
    }

    fn frame(n: u32, detections: Vec<Detection>) -> Frame {
        let img = RgbImage::from_pixel(400, 300, Rgb([40, 140, 50]));
        Frame::new(img, detections, n as f32 / 24.0)
    }

    #[test]
    fn local_tracks_age_through_empty_frames() {
        let mut s = session();
        s.process_frame(&frame(0, vec![player(100.0, None)]));
        assert_eq!(s.associator.tracks().len(), 1);

        for n in 1..=30 {
            s.process_frame(&frame(n, vec![]));
        }
        assert_eq!(s.associator.tracks()[0].age, 30);

        s.process_frame(&frame(31, vec![]));
        assert!(s.associator.tracks().is_empty());
    }

    #[test]
    fn local_tracks_age_through_fully_identified_frames() {
        let mut s = session();
        s.process_frame(&frame(0, vec![player(100.0, None)]));
        s.process_frame(&frame(1, vec![player(300.0, Some(40))]));

        assert_eq!(s.associator.tracks()[0].age, 1);
    }

    #[test]
    fn upstream_and_local_ids_stay_disjoint() {
        let mut s = session();
        s.process_frame(&frame(0, vec![player(100.0, Some(1)), player(300.0, Some(2))]));

        let report = s.process_frame(&frame(1, vec![player(101.0, Some(1)), player(301.0, None)]));

        let one = report.player(1).unwrap();
        assert_eq!(one.state.raw_position.map(|p| p.x), Some(111.0));
        assert!(one.state.kinematics.incremental_distance < 1.0);

        let two = report.player(2).unwrap();
        assert!(!two.state.is_observed());

        let fresh = report.player(3).unwrap();
        assert!(fresh.state.is_observed());
        assert_eq!(fresh.state.raw_position.map(|p| p.x), Some(311.0));

        // upstream later claims id 3: the local history under it is dropped
        let report = s.process_frame(&frame(2, vec![player(102.0, Some(1)), player(302.0, Some(3))]));
        let three = report.player(3).unwrap();
        assert_eq!(three.state.kinematics.total_distance, 0.0);
        assert!(s.associator.tracks().iter().all(|t| t.id != 3));
        assert!(s.associator.next_id() > 3);
    }
}
