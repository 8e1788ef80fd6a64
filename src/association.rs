use nalgebra as na;
use tracing::{debug, trace};

use crate::bbox::{BBox, Ltrb};
use crate::config::AssociationConfig;
use crate::detection::{Detection, EntityClass};
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct Track {
    pub id: u32,
    pub class: EntityClass,
    /// Successful associations since the track was born.
    pub hits: u32,
    /// Frames since the last successful association.
    pub age: u32,
    pub last_bbox: BBox<Ltrb>,
    pub last_position: na::Point2<f32>,
}

impl Track {
    fn new(id: u32, det: &Detection) -> Self {
        Self {
            id,
            class: det.class,
            hits: 1,
            age: 0,
            last_bbox: det.bbox,
            last_position: det.position(),
        }
    }

    fn update(&mut self, det: &Detection) {
        self.last_bbox = det.bbox;
        self.last_position = det.position();
        self.hits += 1;
        self.age = 0;
    }
}

/// Pairs detections of one frame with live tracks.
pub trait Associate {
    /// For every detection, the index of the track it continues, if any.
    /// A track index appears at most once in the result.
    fn associate(&self, tracks: &[Track], detections: &[Detection]) -> Vec<Option<usize>>;
}

/// Takes detections in order and gives each the best-scoring track still
/// unclaimed in this frame.
#[derive(Debug, Clone)]
pub struct GreedyAssociator {
    iou_weight: f32,
    distance_scale: f32,
    threshold: f32,
}

impl GreedyAssociator {
    pub fn new(config: &AssociationConfig) -> Self {
        Self {
            iou_weight: config.iou_weight,
            distance_scale: config.distance_scale,
            threshold: config.match_threshold,
        }
    }

    #[inline]
    pub fn score(&self, track: &Track, det: &Detection) -> f32 {
        let iou = track.last_bbox.iou(&det.bbox);
        let distance = na::distance(&track.last_position, &det.position());
        let proximity = 1.0 / (1.0 + self.distance_scale * distance);

        self.iou_weight * iou + (1.0 - self.iou_weight) * proximity
    }
}

impl Associate for GreedyAssociator {
    fn associate(&self, tracks: &[Track], detections: &[Detection]) -> Vec<Option<usize>> {
        let mut claimed = vec![false; tracks.len()];

        detections
            .iter()
            .map(|det| {
                let mut best: Option<(usize, f32)> = None;

                for (idx, track) in tracks.iter().enumerate() {
                    if claimed[idx] || track.class != det.class {
                        continue;
                    }

                    let score = self.score(track, det);
                    if score > self.threshold && best.map_or(true, |(_, s)| score > s) {
                        best = Some((idx, score));
                    }
                }

                best.map(|(idx, _)| {
                    claimed[idx] = true;
                    idx
                })
            })
            .collect()
    }
}

/// Frame-to-frame identities for detections that come without one.
pub struct IdentityAssociator<A = GreedyAssociator> {
    tracks: Vec<Track>,
    associator: A,
    max_age: u32,
    next_id: u32,
}

impl IdentityAssociator<GreedyAssociator> {
    pub fn new(config: &AssociationConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self::with_associator(
            config.max_age,
            GreedyAssociator::new(config),
        ))
    }
}

impl<A: Associate> IdentityAssociator<A> {
    pub fn with_associator(max_age: u32, associator: A) -> Self {
        Self {
            tracks: Vec::with_capacity(32),
            associator,
            max_age,
            next_id: 1,
        }
    }

    #[inline]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Id the next new track will get.
    #[inline]
    pub fn next_id(&self) -> u32 {
        self.next_id
    }

    /// Keeps ids up to and including `id` out of future allocations.
    pub fn reserve_through(&mut self, id: u32) {
        self.next_id = self.next_id.max(id.saturating_add(1));
    }

    /// Drops the live track holding `id`, if any.
    pub fn release(&mut self, id: u32) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|t| t.id != id);
        self.tracks.len() < before
    }

    /// Assigns an id to every detection, in input order. Unmatched
    /// detections open new tracks; tracks left unmatched grow older and are
    /// dropped once their age passes `max_age`.
    pub fn update(&mut self, detections: &[Detection]) -> Vec<(u32, Detection)> {
        let matches = self.associator.associate(&self.tracks, detections);
        let mut matched = vec![false; self.tracks.len()];
        let mut assigned = Vec::with_capacity(detections.len());

        for (det, m) in detections.iter().zip(matches) {
            let id = match m {
                Some(idx) if idx < self.tracks.len() && !matched[idx] => {
                    matched[idx] = true;
                    self.tracks[idx].update(det);
                    self.tracks[idx].id
                }
                _ => {
                    let id = self.next_id;
                    self.next_id = self.next_id.saturating_add(1);
                    self.tracks.push(Track::new(id, det));
                    trace!(id, class = ?det.class, "track born");
                    id
                }
            };

            assigned.push((id, *det));
        }

        for (track, hit) in self.tracks.iter_mut().zip(matched) {
            if !hit {
                track.age += 1;
            }
        }

        let max_age = self.max_age;
        let before = self.tracks.len();
        self.tracks.retain(|t| t.age <= max_age);

        if self.tracks.len() < before {
            debug!(evicted = before - self.tracks.len(), live = self.tracks.len(), "stale tracks evicted");
        }

        assigned
    }
}
