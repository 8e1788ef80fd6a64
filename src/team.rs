//! Jersey colour clustering into two teams.

use std::collections::HashMap;

use image::RgbImage;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde_derive::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::bbox::{BBox, Ltrb};
use crate::circular_queue::CircularQueue;
use crate::config::TeamConfig;
use crate::error::Result;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Team {
    One = 1,
    Two = 2,
}

impl Team {
    #[inline]
    pub fn label(self) -> u8 {
        self as u8
    }

    #[inline]
    fn from_cluster(idx: usize) -> Self {
        if idx == 0 {
            Team::One
        } else {
            Team::Two
        }
    }
}

/// OpenCV 8-bit HSV: hue in `0..180`, saturation and value in `0..=255`.
pub fn rgb_to_hsv(rgb: [u8; 3]) -> [u8; 3] {
    let [r, g, b] = rgb.map(f32::from);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let s = if max > 0.0 { 255.0 * delta / max } else { 0.0 };

    let h = if delta <= 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    [
        (h / 2.0).round().min(179.0) as u8,
        s.round() as u8,
        max as u8,
    ]
}

/// Mean RGB of the torso band of `bbox`, leaving out grass pixels.
///
/// The band starts `head_fraction` of the box height below its top and is
/// `effective_torso_fraction` of the height tall. If fewer than
/// `min_non_green_pixels` survive the grass mask the whole band is
/// averaged; below `min_pixels` the sample is rejected.
pub fn torso_color(image: &RgbImage, bbox: &BBox<Ltrb>, config: &TeamConfig) -> Option<[f32; 3]> {
    let (x0, y0, x1, y1) = bbox.pixel_rect(image.width(), image.height())?;
    let height = (y1 - y0) as f32;

    let top = y0 + (height * config.head_fraction) as u32;
    let bottom = (top + (height * config.effective_torso_fraction()) as u32).min(y1);

    if bottom <= top {
        return None;
    }

    let mut all = [0.0f32; 3];
    let mut all_count = 0usize;
    let mut kit = [0.0f32; 3];
    let mut kit_count = 0usize;

    for y in top..bottom {
        for x in x0..x1 {
            let px = image.get_pixel(x, y).0;
            let hsv = rgb_to_hsv(px);

            let is_grass = (0..3).all(|c| {
                hsv[c] >= config.green_lower[c] && hsv[c] <= config.green_upper[c]
            });

            for c in 0..3 {
                all[c] += f32::from(px[c]);
            }
            all_count += 1;

            if !is_grass {
                for c in 0..3 {
                    kit[c] += f32::from(px[c]);
                }
                kit_count += 1;
            }
        }
    }

    let (sum, count) = if kit_count >= config.min_non_green_pixels {
        (kit, kit_count)
    } else {
        (all, all_count)
    };

    if count < config.min_pixels {
        return None;
    }

    Some(sum.map(|v| v / count as f32))
}

/// Two colour centroids, row 0 for team one and row 1 for team two.
#[derive(Debug, Clone)]
pub struct TeamColorModel {
    centroids: Array2<f32>,
}

impl TeamColorModel {
    /// Deterministic 2-means over the rows of `samples`. Seeds are the first
    /// sample and the sample farthest from it, so the first sample always
    /// ends up in team one.
    pub fn fit(samples: &Array2<f32>, max_iterations: usize) -> Option<Self> {
        let n = samples.nrows();
        if n < 2 {
            return None;
        }

        let first = samples.row(0);
        let far = (0..n)
            .map(|i| (i, squared_distance(samples.row(i), first)))
            .fold((0, 0.0f32), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0;

        if far == 0 {
            warn!("team colour samples are all identical");
        }

        let mut centroids = Array2::<f32>::zeros((2, samples.ncols()));
        centroids.row_mut(0).assign(&first);
        centroids.row_mut(1).assign(&samples.row(far));

        let mut labels = vec![usize::MAX; n];

        for iteration in 0..max_iterations.max(1) {
            let mut changed = false;

            for (i, row) in samples.axis_iter(Axis(0)).enumerate() {
                let label = nearest(&centroids, row);
                if labels[i] != label {
                    labels[i] = label;
                    changed = true;
                }
            }

            if !changed {
                trace!(iteration, "team clustering converged");
                break;
            }

            for k in 0..2 {
                let members: Vec<usize> = (0..n).filter(|&i| labels[i] == k).collect();
                if members.is_empty() {
                    continue;
                }

                let mean = samples
                    .select(Axis(0), &members)
                    .mean_axis(Axis(0))
                    .unwrap_or_else(|| centroids.row(k).to_owned());

                centroids.row_mut(k).assign(&mean);
            }
        }

        Some(Self { centroids })
    }

    #[inline]
    pub fn predict(&self, color: &[f32; 3]) -> Team {
        let color = Array1::from(color.to_vec());
        Team::from_cluster(nearest(&self.centroids, color.view()))
    }

    pub fn color(&self, team: Team) -> [f32; 3] {
        let row = self.centroids.row(team.label() as usize - 1);
        [row[0], row[1], row[2]]
    }
}

#[inline]
fn squared_distance(a: ArrayView1<'_, f32>, b: ArrayView1<'_, f32>) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
}

#[inline]
fn nearest(centroids: &Array2<f32>, point: ArrayView1<'_, f32>) -> usize {
    let d0 = squared_distance(centroids.row(0), point);
    let d1 = squared_distance(centroids.row(1), point);

    if d1 < d0 {
        1
    } else {
        0
    }
}

/// Learns two jersey colours once, then labels each player with a
/// majority vote over its recent predictions.
pub struct TeamClassifier {
    config: TeamConfig,
    model: Option<TeamColorModel>,
    votes: HashMap<u32, CircularQueue<Team>>,
    decisions: HashMap<u32, Team>,
}

impl TeamClassifier {
    pub fn new(config: TeamConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            model: None,
            votes: HashMap::new(),
            decisions: HashMap::new(),
        })
    }

    #[inline]
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    #[inline]
    pub fn model(&self) -> Option<&TeamColorModel> {
        self.model.as_ref()
    }

    /// Last smoothed decision for `id`.
    #[inline]
    pub fn team_of(&self, id: u32) -> Option<Team> {
        self.decisions.get(&id).copied()
    }

    /// Fits the colour model from the players of one frame. No-op once a
    /// model exists. Returns whether a model is available afterwards.
    pub fn bootstrap(&mut self, image: &RgbImage, players: &[(u32, BBox<Ltrb>)]) -> bool {
        if self.model.is_some() {
            return true;
        }

        let samples: Vec<[f32; 3]> = players
            .iter()
            .filter_map(|(_, bbox)| torso_color(image, bbox, &self.config))
            .collect();

        if samples.len() < self.config.min_bootstrap_players {
            debug!(
                samples = samples.len(),
                required = self.config.min_bootstrap_players,
                "not enough players to learn team colours"
            );
            return false;
        }

        let flat: Vec<f32> = samples.iter().flatten().copied().collect();
        let model = Array2::from_shape_vec((samples.len(), 3), flat)
            .ok()
            .and_then(|data| TeamColorModel::fit(&data, self.config.kmeans_iterations));

        if let Some(model) = model {
            info!(
                samples = samples.len(),
                team_one = ?model.color(Team::One),
                team_two = ?model.color(Team::Two),
                "team colours learned"
            );
            self.model = Some(model);
        }

        self.model.is_some()
    }

    /// Team of player `id` in this frame, smoothed over its recent votes.
    /// Without a model or a usable colour sample the previous decision is
    /// returned.
    pub fn classify(&mut self, image: &RgbImage, id: u32, bbox: &BBox<Ltrb>) -> Option<Team> {
        let model = match &self.model {
            Some(model) => model,
            None => return self.team_of(id),
        };

        let color = match torso_color(image, bbox, &self.config) {
            Some(color) => color,
            None => return self.team_of(id),
        };

        let label = model.predict(&color);
        let window = self.config.smoothing_window;
        let votes = self
            .votes
            .entry(id)
            .or_insert_with(|| CircularQueue::with_capacity(window));
        votes.push(label);

        let decision = if votes.len() * 2 >= votes.capacity() {
            let ones = votes.iter().filter(|&&t| t == Team::One).count();
            let twos = votes.len() - ones;

            match ones.cmp(&twos) {
                std::cmp::Ordering::Greater => Team::One,
                std::cmp::Ordering::Less => Team::Two,
                std::cmp::Ordering::Equal => self.decisions.get(&id).copied().unwrap_or(label),
            }
        } else {
            label
        };

        trace!(id, raw = label.label(), team = decision.label(), "team vote");
        self.decisions.insert(id, decision);

        Some(decision)
    }

    pub fn forget(&mut self, id: u32) {
        self.votes.remove(&id);
        self.decisions.remove(&id);
    }

    /// Drops the learned colours and every per-player history.
    pub fn reset(&mut self) {
        self.model = None;
        self.votes.clear();
        self.decisions.clear();
    }
}
