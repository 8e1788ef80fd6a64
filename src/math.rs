use nalgebra as na;
use num_traits::Float;

/// Savitzky-Golay convolution weights that evaluate, at the centre sample,
/// the least-squares polynomial of degree `order` fitted over `window`
/// samples. `window` must be odd and greater than `order`.
pub fn savgol_coefficients<T: na::RealField + Float>(
    window: usize,
    order: usize,
) -> Option<na::DVector<T>> {
    if window % 2 == 0 || window <= order {
        return None;
    }

    let half = (window / 2) as f64;
    let vander = na::DMatrix::<T>::from_fn(window, order + 1, |r, c| {
        let x: T = na::convert(r as f64 - half);
        Float::powi(x, c as i32)
    });

    let normal = vander.transpose() * &vander;
    let rhs = vander.transpose();

    let qr_result = normal.qr();
    let qty = qr_result.q().transpose() * rhs;
    let solution = qr_result.r().solve_upper_triangular(&qty)?;

    Some(solution.row(0).transpose())
}

/// Applies precomputed Savitzky-Golay weights over `values`, padding the
/// edges by repeating the nearest sample.
pub fn savgol_filter<T: na::RealField + Float>(values: &[T], coeffs: &na::DVector<T>) -> Vec<T> {
    let n = values.len() as i64;
    let half = (coeffs.len() / 2) as i64;

    (0..n)
        .map(|i| {
            coeffs
                .iter()
                .enumerate()
                .fold(T::zero(), |acc, (k, &w)| {
                    let idx = (i + k as i64 - half).clamp(0, n - 1);
                    acc + w * values[idx as usize]
                })
        })
        .collect()
}

/// Closed-polygon containment; points on an edge count as inside.
pub fn in_polygon(p: na::Point2<f32>, poly: &[na::Point2<f32>]) -> bool {
    let n = poly.len();
    if n < 3 {
        return false;
    }

    let mut inside = false;

    for i in 0..n {
        let a = poly[i];
        let b = poly[(i + 1) % n];

        if on_segment(p, a, b) {
            return true;
        }

        if (a.y > p.y) != (b.y > p.y) {
            let x_cross = a.x + (p.y - a.y) * (b.x - a.x) / (b.y - a.y);
            if p.x < x_cross {
                inside = !inside;
            }
        }
    }

    inside
}

fn on_segment(p: na::Point2<f32>, a: na::Point2<f32>, b: na::Point2<f32>) -> bool {
    let ab = b - a;
    let ap = p - a;
    let cross = ab.x * ap.y - ab.y * ap.x;
    let scale = ab.norm().max(1.0);

    if cross.abs() > 1e-3 * scale {
        return false;
    }

    let dot = ap.dot(&ab);
    dot >= 0.0 && dot <= ab.norm_squared()
}

/// True when the quadrilateral has non-zero area and turns the same way at
/// every corner.
pub fn is_convex_quad(q: &[na::Point2<f32>; 4]) -> bool {
    let mut sign = 0.0f32;

    for i in 0..4 {
        let a = q[i];
        let b = q[(i + 1) % 4];
        let c = q[(i + 2) % 4];
        let cross = (b - a).x * (c - b).y - (b - a).y * (c - b).x;

        if cross.abs() <= f32::EPSILON {
            return false;
        }

        if sign == 0.0 {
            sign = cross.signum();
        } else if cross.signum() != sign {
            return false;
        }
    }

    true
}

/// Solves for the 3x3 projective map taking each `src[i]` onto `dst[i]`.
pub fn perspective_transform(
    src: &[na::Point2<f64>; 4],
    dst: &[na::Point2<f64>; 4],
) -> Option<na::Matrix3<f64>> {
    let mut a = na::SMatrix::<f64, 8, 8>::zeros();
    let mut b = na::SVector::<f64, 8>::zeros();

    for i in 0..4 {
        let (x, y) = (src[i].x, src[i].y);
        let (u, v) = (dst[i].x, dst[i].y);

        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -x * u;
        a[(r, 7)] = -y * u;
        b[r] = u;

        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -x * v;
        a[(r + 1, 7)] = -y * v;
        b[r + 1] = v;
    }

    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }

    Some(na::Matrix3::new(
        h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn savgol_preserves_quadratics() {
        let coeffs = savgol_coefficients::<f64>(7, 2).unwrap();
        assert!((coeffs.sum() - 1.0).abs() < 1e-9);

        // symmetric window: reproduces the classic 7-point quadratic weights
        let expected = [-2.0, 3.0, 6.0, 7.0, 6.0, 3.0, -2.0];
        for (c, e) in coeffs.iter().zip(expected.iter()) {
            assert!((c - e / 21.0).abs() < 1e-9);
        }

        let values: Vec<f64> = (0..12).map(|x| 0.5 * (x * x) as f64 - 2.0 * x as f64).collect();
        let smoothed = savgol_filter(&values, &coeffs);
        // interior samples are untouched by an exact quadratic
        for i in 3..9 {
            assert!((smoothed[i] - values[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn savgol_rejects_bad_windows() {
        assert!(savgol_coefficients::<f32>(6, 2).is_none());
        assert!(savgol_coefficients::<f32>(3, 3).is_none());
        assert!(savgol_coefficients::<f32>(3, 2).is_some());
    }

    #[test]
    fn polygon_containment() {
        let square = [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ];

        assert!(in_polygon(na::Point2::new(5.0, 5.0), &square));
        assert!(in_polygon(na::Point2::new(10.0, 5.0), &square));
        assert!(in_polygon(na::Point2::new(0.0, 0.0), &square));
        assert!(!in_polygon(na::Point2::new(10.5, 5.0), &square));
        assert!(!in_polygon(na::Point2::new(-1.0, -1.0), &square));
    }

    #[test]
    fn convexity() {
        let square = [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(10.0, 10.0),
            na::Point2::new(0.0, 10.0),
        ];
        assert!(is_convex_quad(&square));

        let bowtie = [square[0], square[2], square[1], square[3]];
        assert!(!is_convex_quad(&bowtie));

        let collinear = [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(5.0, 0.0),
            na::Point2::new(10.0, 0.0),
            na::Point2::new(0.0, 10.0),
        ];
        assert!(!is_convex_quad(&collinear));
    }

    #[test]
    fn perspective_maps_corners() {
        let src = [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(4.0, 0.0),
            na::Point2::new(4.0, 2.0),
            na::Point2::new(0.0, 2.0),
        ];
        let dst = [
            na::Point2::new(0.0, 0.0),
            na::Point2::new(8.0, 0.0),
            na::Point2::new(8.0, 4.0),
            na::Point2::new(0.0, 4.0),
        ];

        let h = perspective_transform(&src, &dst).unwrap();
        let p = h * na::Vector3::new(1.0, 1.0, 1.0);
        assert!((p.x / p.z - 2.0).abs() < 1e-9);
        assert!((p.y / p.z - 2.0).abs() < 1e-9);
    }
}
