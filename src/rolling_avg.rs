use nalgebra as na;

/// Exponential moving average of a 2D displacement.
#[derive(Debug, Clone)]
pub struct RollingAvg {
    alpha: f32,
    curr: na::Vector2<f32>,
}

impl RollingAvg {
    pub fn new(alpha: f32) -> Self {
        Self {
            alpha,
            curr: na::Vector2::zeros(),
        }
    }

    pub fn clear(&mut self) {
        self.curr = na::Vector2::zeros();
    }

    pub fn push(&mut self, sample: na::Vector2<f32>) -> na::Vector2<f32> {
        self.curr = sample * self.alpha + self.curr * (1.0 - self.alpha);
        self.curr
    }

    #[inline]
    pub fn value(&self) -> na::Vector2<f32> {
        self.curr
    }
}
