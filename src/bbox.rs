use nalgebra as na;
use serde_derive::{Deserialize, Serialize};
use std::marker::PhantomData;

pub trait BBoxFormat: std::fmt::Debug {}

/// Left-top-right-bottom format, contains left top and right bottom corners
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct Ltrb;
impl BBoxFormat for Ltrb {}

/// Image-space box in pixels, tagged with its coordinate layout.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
#[serde(transparent)]
pub struct BBox<F: BBoxFormat> {
    coords: [f32; 4],
    #[serde(skip)]
    format: PhantomData<F>,
}

impl<F: BBoxFormat> From<BBox<F>> for [f32; 4] {
    fn from(bbox: BBox<F>) -> Self {
        bbox.coords
    }
}

impl<F: BBoxFormat> BBox<F> {
    #[inline]
    pub fn as_slice(&self) -> &[f32; 4] {
        &self.coords
    }

    #[inline(always)]
    fn raw(coords: [f32; 4]) -> Self {
        Self {
            coords,
            format: PhantomData,
        }
    }
}

impl BBox<Ltrb> {
    #[inline]
    pub fn ltrb(left: f32, top: f32, right: f32, bottom: f32) -> Self {
        Self::raw([left, top, right, bottom])
    }

    #[inline(always)]
    pub fn left(&self) -> f32 {
        self.coords[0]
    }

    #[inline(always)]
    pub fn top(&self) -> f32 {
        self.coords[1]
    }

    #[inline(always)]
    pub fn right(&self) -> f32 {
        self.coords[2]
    }

    #[inline(always)]
    pub fn bottom(&self) -> f32 {
        self.coords[3]
    }

    #[inline(always)]
    pub fn width(&self) -> f32 {
        self.right() - self.left()
    }

    #[inline(always)]
    pub fn height(&self) -> f32 {
        self.bottom() - self.top()
    }

    /// Zero for inverted or empty boxes.
    #[inline]
    pub fn area(&self) -> f32 {
        if self.is_degenerate() {
            0.0
        } else {
            self.width() * self.height()
        }
    }

    #[inline]
    pub fn is_degenerate(&self) -> bool {
        !(self.width() > 0.0 && self.height() > 0.0)
    }

    #[inline]
    pub fn center(&self) -> na::Point2<f32> {
        na::Point2::new(
            (self.left() + self.right()) / 2.0,
            (self.top() + self.bottom()) / 2.0,
        )
    }

    /// Bottom centre, where a standing player touches the pitch.
    #[inline]
    pub fn foot(&self) -> na::Point2<f32> {
        na::Point2::new((self.left() + self.right()) / 2.0, self.bottom())
    }

    #[inline]
    pub fn bottom_left(&self) -> na::Point2<f32> {
        na::Point2::new(self.left(), self.bottom())
    }

    #[inline]
    pub fn bottom_right(&self) -> na::Point2<f32> {
        na::Point2::new(self.right(), self.bottom())
    }

    pub fn iou(&self, other: &BBox<Ltrb>) -> f32 {
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }

        let i_left = self.left().max(other.left());
        let i_top = self.top().max(other.top());
        let i_right = self.right().min(other.right());
        let i_bottom = self.bottom().min(other.bottom());

        if i_right <= i_left || i_bottom <= i_top {
            return 0.0;
        }

        let i_area = (i_right - i_left) * (i_bottom - i_top);
        let union = self.area() + other.area() - i_area;

        if union > 0.0 {
            (i_area / union).clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Clips to `[0, width) x [0, height)` and snaps to whole pixels.
    /// Returns `(x0, y0, x1, y1)` with exclusive upper bounds, or `None`
    /// when nothing is left.
    pub fn pixel_rect(&self, width: u32, height: u32) -> Option<(u32, u32, u32, u32)> {
        if !self.coords.iter().all(|c| c.is_finite()) {
            return None;
        }

        let x0 = self.left().max(0.0) as u32;
        let y0 = self.top().max(0.0) as u32;
        let x1 = (self.right().max(0.0) as u32).min(width.saturating_sub(1));
        let y1 = (self.bottom().max(0.0) as u32).min(height.saturating_sub(1));

        if x1 <= x0 || y1 <= y0 {
            None
        } else {
            Some((x0, y0, x1, y1))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let b = BBox::ltrb(10.0, 20.0, 50.0, 80.0);
        assert!((b.iou(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = BBox::ltrb(0.0, 0.0, 10.0, 10.0);
        let b = BBox::ltrb(20.0, 20.0, 30.0, 30.0);
        assert_eq!(a.iou(&b), 0.0);

        // touching edges share no area
        let c = BBox::ltrb(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn iou_of_degenerate_box_is_zero() {
        let a = BBox::ltrb(0.0, 0.0, 10.0, 10.0);
        let flat = BBox::ltrb(2.0, 2.0, 8.0, 2.0);
        let inverted = BBox::ltrb(8.0, 8.0, 2.0, 2.0);
        assert_eq!(a.iou(&flat), 0.0);
        assert_eq!(inverted.iou(&a), 0.0);
    }

    #[test]
    fn iou_stays_in_unit_interval() {
        let boxes = [
            BBox::ltrb(0.0, 0.0, 10.0, 10.0),
            BBox::ltrb(5.0, 5.0, 15.0, 15.0),
            BBox::ltrb(-3.0, 2.0, 4.0, 40.0),
            BBox::ltrb(1.0, 1.0, 2.0, 2.0),
            BBox::ltrb(0.0, 0.0, 1000.0, 1000.0),
        ];

        for a in &boxes {
            for b in &boxes {
                let iou = a.iou(b);
                assert!((0.0..=1.0).contains(&iou), "iou {} out of range", iou);
                assert!((iou - b.iou(a)).abs() < 1e-6);
            }
        }

        let half = BBox::ltrb(0.0, 0.0, 10.0, 10.0).iou(&BBox::ltrb(5.0, 0.0, 15.0, 10.0));
        assert!((half - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn foot_points() {
        let b = BBox::ltrb(10.0, 20.0, 30.0, 60.0);
        assert_eq!(b.foot(), na::Point2::new(20.0, 60.0));
        assert_eq!(b.bottom_left(), na::Point2::new(10.0, 60.0));
        assert_eq!(b.bottom_right(), na::Point2::new(30.0, 60.0));
        assert_eq!(b.center(), na::Point2::new(20.0, 40.0));
    }

    #[test]
    fn pixel_rect_clips_to_image() {
        let b = BBox::ltrb(-5.0, 10.5, 120.0, 30.0);
        assert_eq!(b.pixel_rect(100, 100), Some((0, 10, 99, 30)));
        assert_eq!(BBox::ltrb(200.0, 0.0, 220.0, 10.0).pixel_rect(100, 100), None);
    }
}
