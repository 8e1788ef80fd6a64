//! Sparse optical flow on grayscale pyramids.
//!
//! Feature selection follows the minimum-eigenvalue corner criterion;
//! tracking is the coarse-to-fine iterative Lucas-Kanade scheme.

use image::imageops::{self, FilterType};
use image::{ImageBuffer, Luma, RgbImage};
use nalgebra as na;

use crate::config::MAX_PYRAMID_LEVELS;

pub type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

// intensities are normalised to [0, 1]
const MIN_EIGEN_THRESHOLD: f32 = 1e-6;

pub fn to_gray(frame: &RgbImage) -> GrayF32 {
    let gray = imageops::grayscale(frame);
    let (w, h) = gray.dimensions();
    let data = gray
        .into_raw()
        .into_iter()
        .map(|v| f32::from(v) / 255.0)
        .collect();

    GrayF32::from_raw(w, h, data).unwrap_or_else(|| GrayF32::new(w, h))
}

/// Level 0 is the full-resolution image, each next level halves both sides.
#[derive(Debug, Clone)]
pub struct Pyramid {
    levels: Vec<GrayF32>,
}

impl Pyramid {
    pub fn build(base: GrayF32, extra_levels: u32, min_side: u32) -> Self {
        let mut levels = Vec::with_capacity(extra_levels.min(MAX_PYRAMID_LEVELS) as usize + 1);
        levels.push(base);

        for _ in 0..extra_levels {
            let prev = &levels[levels.len() - 1];
            let (w, h) = (prev.width() / 2, prev.height() / 2);
            if w < min_side || h < min_side {
                break;
            }

            let next = imageops::resize(prev, w, h, FilterType::Triangle);
            levels.push(next);
        }

        Self { levels }
    }

    #[inline]
    pub fn base(&self) -> &GrayF32 {
        &self.levels[0]
    }

    #[inline]
    pub fn dimensions(&self) -> (u32, u32) {
        self.levels[0].dimensions()
    }

    #[inline]
    pub fn depth(&self) -> usize {
        self.levels.len()
    }
}

/// Bilinear lookup with coordinates clamped to the image.
#[inline]
fn sample(img: &GrayF32, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    let data = img.as_raw();

    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);

    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |px: u32, py: u32| data[(py * w + px) as usize];

    let top = at(x0, y0) * (1.0 - fx) + at(x1, y0) * fx;
    let bottom = at(x0, y1) * (1.0 - fx) + at(x1, y1) * fx;

    top * (1.0 - fy) + bottom * fy
}

#[inline]
fn gradient(img: &GrayF32, x: f32, y: f32) -> (f32, f32) {
    (
        (sample(img, x + 1.0, y) - sample(img, x - 1.0, y)) * 0.5,
        (sample(img, x, y + 1.0) - sample(img, x, y - 1.0)) * 0.5,
    )
}

#[inline]
fn min_eigenvalue(gxx: f32, gxy: f32, gyy: f32) -> f32 {
    let half_trace = (gxx + gyy) * 0.5;
    let diff = (gxx - gyy) * 0.5;

    half_trace - (diff * diff + gxy * gxy).sqrt()
}

#[derive(Debug, Clone)]
pub struct FeatureParams {
    pub max_corners: usize,
    pub quality_level: f32,
    pub min_distance: f32,
    pub block_size: u32,
}

/// Strongest corners whose column satisfies `mask`, best first, at least
/// `min_distance` apart.
pub fn good_features<M>(img: &GrayF32, params: &FeatureParams, mask: M) -> Vec<na::Point2<f32>>
where
    M: Fn(u32) -> bool,
{
    let (w, h) = img.dimensions();
    let radius = params.block_size / 2;
    let border = radius + 1;

    if w <= 2 * border || h <= 2 * border || params.max_corners == 0 {
        return Vec::new();
    }

    let data = img.as_raw();
    let at = |x: u32, y: u32| data[(y * w + x) as usize];

    let mut response = vec![0.0f32; (w * h) as usize];
    let mut max_response = 0.0f32;

    for y in border..h - border {
        for x in (border..w - border).filter(|&x| mask(x)) {
            let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);

            for by in y - radius..=y + radius {
                for bx in x - radius..=x + radius {
                    let ix = (at(bx + 1, by) - at(bx - 1, by)) * 0.5;
                    let iy = (at(bx, by + 1) - at(bx, by - 1)) * 0.5;
                    gxx += ix * ix;
                    gxy += ix * iy;
                    gyy += iy * iy;
                }
            }

            let r = min_eigenvalue(gxx, gxy, gyy);
            response[(y * w + x) as usize] = r;
            max_response = max_response.max(r);
        }
    }

    if max_response <= 0.0 {
        return Vec::new();
    }

    let threshold = max_response * params.quality_level;
    let mut candidates = Vec::new();

    for y in border..h - border {
        for x in (border..w - border).filter(|&x| mask(x)) {
            let r = response[(y * w + x) as usize];
            if r < threshold || r <= 0.0 {
                continue;
            }

            let is_peak = (y - 1..=y + 1).all(|ny| {
                (x - 1..=x + 1).all(|nx| response[(ny * w + nx) as usize] <= r)
            });

            if is_peak {
                candidates.push((r, na::Point2::new(x as f32, y as f32)));
            }
        }
    }

    candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

    let min_dist_sq = params.min_distance * params.min_distance;
    let mut selected: Vec<na::Point2<f32>> =
        Vec::with_capacity(params.max_corners.min(candidates.len()));

    for (_, p) in candidates {
        if selected
            .iter()
            .all(|s| na::distance_squared(s, &p) >= min_dist_sq)
        {
            selected.push(p);
            if selected.len() >= params.max_corners {
                break;
            }
        }
    }

    selected
}

#[derive(Debug, Clone)]
pub struct LucasKanade {
    pub window_size: u32,
    pub max_iterations: u32,
    pub epsilon: f32,
}

impl LucasKanade {
    /// Position of each of `points` in `next`, or `None` where tracking was
    /// lost. The pyramids must share dimensions.
    pub fn track(
        &self,
        prev: &Pyramid,
        next: &Pyramid,
        points: &[na::Point2<f32>],
    ) -> Vec<Option<na::Point2<f32>>> {
        let depth = prev.depth().min(next.depth());

        points
            .iter()
            .map(|p| self.track_point(prev, next, depth, *p))
            .collect()
    }

    fn track_point(
        &self,
        prev: &Pyramid,
        next: &Pyramid,
        depth: usize,
        point: na::Point2<f32>,
    ) -> Option<na::Point2<f32>> {
        let half = (self.window_size / 2) as i32;
        let n = ((2 * half + 1) * (2 * half + 1)) as f32;
        let mut guess = na::Vector2::<f32>::zeros();

        for level in (0..depth).rev() {
            let scale = (1u32 << level) as f32;
            let p = point.coords / scale;
            let img_prev = &prev.levels[level];
            let img_next = &next.levels[level];

            let mut patch = Vec::with_capacity(((2 * half + 1) * (2 * half + 1)) as usize);
            let (mut gxx, mut gxy, mut gyy) = (0.0f32, 0.0f32, 0.0f32);

            for dy in -half..=half {
                for dx in -half..=half {
                    let (x, y) = (p.x + dx as f32, p.y + dy as f32);
                    let (ix, iy) = gradient(img_prev, x, y);
                    gxx += ix * ix;
                    gxy += ix * iy;
                    gyy += iy * iy;
                    patch.push((x, y, sample(img_prev, x, y), ix, iy));
                }
            }

            if min_eigenvalue(gxx, gxy, gyy) / n < MIN_EIGEN_THRESHOLD {
                return None;
            }

            let inv = na::Matrix2::new(gxx, gxy, gxy, gyy).try_inverse()?;
            let mut flow = na::Vector2::<f32>::zeros();

            for _ in 0..self.max_iterations {
                let offset = guess + flow;
                let mut b = na::Vector2::<f32>::zeros();

                for &(x, y, value, ix, iy) in &patch {
                    let diff = value - sample(img_next, x + offset.x, y + offset.y);
                    b.x += diff * ix;
                    b.y += diff * iy;
                }

                let step = inv * b;
                flow += step;

                if !flow.x.is_finite() || !flow.y.is_finite() {
                    return None;
                }

                if step.norm() < self.epsilon {
                    break;
                }
            }

            guess = if level > 0 {
                (guess + flow) * 2.0
            } else {
                guess + flow
            };
        }

        let tracked = point + guess;
        let (w, h) = next.dimensions();

        if tracked.x < 0.0 || tracked.y < 0.0 || tracked.x > (w - 1) as f32 || tracked.y > (h - 1) as f32
        {
            return None;
        }

        Some(tracked)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::Rgb;

    /// Smooth blob texture shifted horizontally by `shift` pixels.
    pub(crate) fn textured_frame(width: u32, height: u32, shift: f32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| {
            let fx = x as f32 - shift;
            let fy = y as f32;
            let v = 128.0
                + 50.0 * (fx / 6.0).sin() * (fy / 7.0).cos()
                + 30.0 * (fx / 11.0 + fy / 13.0).sin();
            let v = v.clamp(0.0, 255.0) as u8;
            Rgb([v, v, v])
        })
    }

    fn params() -> FeatureParams {
        FeatureParams {
            max_corners: 100,
            quality_level: 0.3,
            min_distance: 3.0,
            block_size: 7,
        }
    }

    fn lk() -> LucasKanade {
        LucasKanade {
            window_size: 15,
            max_iterations: 10,
            epsilon: 0.03,
        }
    }

    #[test]
    fn features_respect_mask_and_spacing() {
        let gray = to_gray(&textured_frame(200, 120, 0.0));
        let feats = good_features(&gray, &params(), |x| x < 40);

        assert!(!feats.is_empty());
        assert!(feats.len() <= 100);
        assert!(feats.iter().all(|p| p.x < 40.0));

        for (i, a) in feats.iter().enumerate() {
            for b in &feats[i + 1..] {
                assert!(na::distance(a, b) >= 3.0);
            }
        }
    }

    #[test]
    fn flat_image_has_no_features() {
        let flat = GrayF32::from_pixel(100, 100, Luma([0.35]));
        assert!(good_features(&flat, &params(), |_| true).is_empty());
    }

    #[test]
    fn oversized_budgets_do_not_preallocate() {
        let gray = to_gray(&textured_frame(120, 80, 0.0));
        let unbounded = FeatureParams {
            max_corners: usize::MAX,
            ..params()
        };
        assert!(!good_features(&gray, &unbounded, |_| true).is_empty());

        let pyr = Pyramid::build(gray, u32::MAX, 15);
        assert_eq!(pyr.depth(), 3);
    }

    #[test]
    fn identical_frames_have_zero_flow() {
        let gray = to_gray(&textured_frame(200, 120, 0.0));
        let feats = good_features(&gray, &params(), |_| true);
        let pyr = Pyramid::build(gray, 2, 15);

        for (p, t) in feats.iter().zip(lk().track(&pyr, &pyr, &feats)) {
            if let Some(t) = t {
                assert_eq!(*p, t);
            }
        }
    }

    #[test]
    fn recovers_small_translation() {
        let a = to_gray(&textured_frame(200, 120, 0.0));
        let b = to_gray(&textured_frame(200, 120, 2.0));
        let feats = good_features(&a, &params(), |x| x > 20 && x < 180);
        let (pa, pb) = (Pyramid::build(a, 2, 15), Pyramid::build(b, 2, 15));

        let tracked: Vec<_> = feats
            .iter()
            .zip(lk().track(&pa, &pb, &feats))
            .filter_map(|(p, t)| t.map(|t| t - p))
            .collect();

        assert!(!tracked.is_empty());

        let mean_dx = tracked.iter().map(|d| d.x).sum::<f32>() / tracked.len() as f32;
        let mean_dy = tracked.iter().map(|d| d.y).sum::<f32>() / tracked.len() as f32;
        assert!((mean_dx - 2.0).abs() < 0.3, "dx {}", mean_dx);
        assert!(mean_dy.abs() < 0.3, "dy {}", mean_dy);
    }
}
