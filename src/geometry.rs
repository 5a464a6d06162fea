use std::cmp::Ordering;

use nalgebra::{Matrix3, Point2, SMatrix, SVector, Vector3};

pub type Point = Point2<f64>;

/// Four corners in canonical order: top-left, top-right, bottom-right,
/// bottom-left (clockwise on screen, y pointing down).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quadrilateral {
    corners: [Point; 4],
}

impl Quadrilateral {
    /// Build from four points in any order.
    pub fn from_points(points: [Point; 4]) -> Self {
        Self {
            corners: order_corners(points),
        }
    }

    pub fn corners(&self) -> &[Point; 4] {
        &self.corners
    }

    pub fn top_left(&self) -> Point {
        self.corners[0]
    }

    pub fn top_right(&self) -> Point {
        self.corners[1]
    }

    pub fn bottom_right(&self) -> Point {
        self.corners[2]
    }

    pub fn bottom_left(&self) -> Point {
        self.corners[3]
    }

    pub fn area(&self) -> f64 {
        polygon_signed_area(&self.corners).abs()
    }

    pub fn is_convex(&self) -> bool {
        is_convex_polygon(&self.corners)
    }

    /// True when any corner lies (nearly) on the line through its neighbours.
    pub fn has_colinear_corners(&self) -> bool {
        (0..4).any(|i| {
            let prev = self.corners[(i + 3) % 4];
            let here = self.corners[i];
            let next = self.corners[(i + 1) % 4];
            let a = here - prev;
            let b = next - here;
            let norm = a.norm() * b.norm();
            norm < f64::EPSILON || (a.x * b.y - a.y * b.x).abs() / norm < 1e-3
        })
    }

    pub fn min_corner_distance(&self) -> f64 {
        let mut min = f64::INFINITY;
        for i in 0..4 {
            for j in (i + 1)..4 {
                min = min.min(nalgebra::distance(&self.corners[i], &self.corners[j]));
            }
        }
        min
    }

    /// Mean absolute deviation of the interior angles from 90 degrees.
    pub fn mean_angle_deviation(&self) -> f64 {
        let total: f64 = (0..4)
            .map(|i| {
                let prev = self.corners[(i + 3) % 4];
                let here = self.corners[i];
                let next = self.corners[(i + 1) % 4];
                let v1 = prev - here;
                let v2 = next - here;
                let cos = v1.dot(&v2) / (v1.norm() * v2.norm() + 1e-12);
                (cos.clamp(-1.0, 1.0).acos().to_degrees() - 90.0).abs()
            })
            .sum();
        total / 4.0
    }

    /// Edge lengths as (top, right, bottom, left).
    pub fn edge_lengths(&self) -> (f64, f64, f64, f64) {
        let [tl, tr, br, bl] = self.corners;
        (
            nalgebra::distance(&tl, &tr),
            nalgebra::distance(&tr, &br),
            nalgebra::distance(&br, &bl),
            nalgebra::distance(&bl, &tl),
        )
    }

    /// Output rectangle size in pixels: the longer of each pair of opposite
    /// edges, counted in pixel centres so a full-frame quad keeps its size.
    pub fn output_size(&self) -> (u32, u32) {
        let (top, right, bottom, left) = self.edge_lengths();
        let width = top.max(bottom).round() as u32 + 1;
        let height = left.max(right).round() as u32 + 1;
        (width, height)
    }

    /// Apply `f` to every corner and re-establish canonical order.
    pub fn map(&self, f: impl Fn(Point) -> Point) -> Self {
        Self::from_points(self.corners.map(f))
    }

    /// Clamp every corner into the pixel-centre bounds of a `width` x `height` image.
    pub fn clamped_to(&self, width: u32, height: u32) -> Self {
        let max_x = width.saturating_sub(1) as f64;
        let max_y = height.saturating_sub(1) as f64;
        self.map(|p| Point::new(p.x.clamp(0.0, max_x), p.y.clamp(0.0, max_y)))
    }
}

/// Order four points as top-left, top-right, bottom-right, bottom-left.
///
/// The smallest x+y is top-left and the largest is bottom-right; the smallest
/// y-x is top-right and the largest is bottom-left. Ties are broken by raw
/// (x, y) order. When that rule does not yield four distinct points forming a
/// clockwise convex loop (strongly rotated quads), the points are sorted by
/// angle around their centroid instead, starting from the smallest x+y.
pub fn order_corners(points: [Point; 4]) -> [Point; 4] {
    let mut sorted = points;
    sorted.sort_by(lexicographic);

    let sum = |p: &Point| p.x + p.y;
    let diff = |p: &Point| p.y - p.x;

    let by_sum = extreme(&sorted, sum);
    let by_diff = extreme(&sorted, diff);
    let candidate = [by_sum.0, by_diff.0, by_sum.1, by_diff.1];

    let distinct = (0..4).all(|i| ((i + 1)..4).all(|j| candidate[i] != candidate[j]));
    if distinct && polygon_signed_area(&candidate) > 0.0 && is_convex_polygon(&candidate) {
        return candidate;
    }

    let cx = sorted.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = sorted.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let angle = |p: &Point| (p.y - cy).atan2(p.x - cx);
    sorted.sort_by(|a, b| angle(a).total_cmp(&angle(b)).then_with(|| lexicographic(a, b)));

    let start = (0..4)
        .min_by(|&a, &b| {
            sum(&sorted[a])
                .total_cmp(&sum(&sorted[b]))
                .then_with(|| lexicographic(&sorted[a], &sorted[b]))
        })
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

fn lexicographic(a: &Point, b: &Point) -> Ordering {
    a.x.total_cmp(&b.x).then_with(|| a.y.total_cmp(&b.y))
}

/// (argmin, argmax) of `key`, ties broken by (x, y).
fn extreme(points: &[Point; 4], key: impl Fn(&Point) -> f64) -> (Point, Point) {
    let cmp = |a: &Point, b: &Point| key(a).total_cmp(&key(b)).then_with(|| lexicographic(a, b));
    let mut min = points[0];
    let mut max = points[0];
    for p in &points[1..] {
        if cmp(p, &min) == Ordering::Less {
            min = *p;
        }
        if cmp(p, &max) == Ordering::Greater {
            max = *p;
        }
    }
    (min, max)
}

/// Shoelace area; positive for clockwise-on-screen order (y down).
pub fn polygon_signed_area(points: &[Point]) -> f64 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut twice = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        twice += points[i].x * points[j].y - points[j].x * points[i].y;
    }
    twice / 2.0
}

/// Strict convexity: every turn has the same non-zero sign.
pub fn is_convex_polygon(points: &[Point]) -> bool {
    let n = points.len();
    if n < 3 {
        return false;
    }
    let mut sign = 0.0f64;
    for i in 0..n {
        let a = points[i];
        let b = points[(i + 1) % n];
        let c = points[(i + 2) % n];
        let cross = (b.x - a.x) * (c.y - b.y) - (b.y - a.y) * (c.x - b.x);
        if cross == 0.0 {
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

/// Projective mapping from a source quadrilateral to a destination plane,
/// stored with its inverse.
#[derive(Debug, Clone, PartialEq)]
pub struct Homography {
    forward: Matrix3<f64>,
    inverse: Matrix3<f64>,
}

impl Homography {
    /// Solve for the homography taking `src[i]` to `dst[i]`.
    ///
    /// Returns `None` when the system is singular or the result is not
    /// safely invertible.
    pub fn from_correspondences(src: &[Point; 4], dst: &[Point; 4]) -> Option<Self> {
        let (t_src, src_n) = normalize_points(src);
        let (t_dst, dst_n) = normalize_points(dst);
        if !in_general_position(&src_n) || !in_general_position(&dst_n) {
            return None;
        }

        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for i in 0..4 {
            let (sx, sy) = (src_n[i].x, src_n[i].y);
            let (dx, dy) = (dst_n[i].x, dst_n[i].y);

            let r = 2 * i;
            a[(r, 0)] = sx;
            a[(r, 1)] = sy;
            a[(r, 2)] = 1.0;
            a[(r, 6)] = -dx * sx;
            a[(r, 7)] = -dx * sy;
            b[r] = dx;

            a[(r + 1, 3)] = sx;
            a[(r + 1, 4)] = sy;
            a[(r + 1, 5)] = 1.0;
            a[(r + 1, 6)] = -dy * sx;
            a[(r + 1, 7)] = -dy * sy;
            b[r + 1] = dy;
        }

        let h = a.lu().solve(&b)?;
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);

        // H = T_dst^-1 * H_norm * T_src
        let forward = t_dst.try_inverse()? * h_norm * t_src;
        Self::from_matrix(forward)
    }

    /// Map `quad` onto the rectangle whose pixel-centre corners are
    /// (m, m) .. (m + width - 1, m + height - 1).
    pub fn quad_to_rect(quad: &Quadrilateral, width: u32, height: u32, margin: u32) -> Option<Self> {
        let m = margin as f64;
        let right = m + width.saturating_sub(1) as f64;
        let bottom = m + height.saturating_sub(1) as f64;
        let dst = [
            Point::new(m, m),
            Point::new(right, m),
            Point::new(right, bottom),
            Point::new(m, bottom),
        ];
        Self::from_correspondences(quad.corners(), &dst)
    }

    /// Wrap a forward matrix, rejecting singular or ill-conditioned ones.
    pub fn from_matrix(forward: Matrix3<f64>) -> Option<Self> {
        if forward.iter().any(|v| !v.is_finite()) {
            return None;
        }
        let scale = forward.norm();
        if scale < f64::EPSILON {
            return None;
        }
        let unit = forward / scale;
        if unit.determinant().abs() < 1e-12 {
            return None;
        }
        let forward = if forward[(2, 2)].abs() > f64::EPSILON {
            forward / forward[(2, 2)]
        } else {
            forward
        };
        let inverse = forward.try_inverse()?;
        if inverse.iter().any(|v| !v.is_finite()) {
            return None;
        }
        Some(Self { forward, inverse })
    }

    pub fn matrix(&self) -> &Matrix3<f64> {
        &self.forward
    }

    pub fn inverse_matrix(&self) -> &Matrix3<f64> {
        &self.inverse
    }

    /// Source -> destination.
    pub fn map(&self, p: Point) -> Option<Point> {
        transform_point(&self.forward, p.x, p.y).map(|(x, y)| Point::new(x, y))
    }

    /// Destination -> source.
    pub fn map_inverse(&self, p: Point) -> Option<Point> {
        transform_point(&self.inverse, p.x, p.y).map(|(x, y)| Point::new(x, y))
    }
}

/// Transform a point with a 3x3 projective matrix. `None` at infinity.
pub fn transform_point(matrix: &Matrix3<f64>, x: f64, y: f64) -> Option<(f64, f64)> {
    let result = matrix * Vector3::new(x, y, 1.0);
    if result.z.abs() < 1e-12 {
        return None;
    }
    Some((result.x / result.z, result.y / result.z))
}

/// No three of the (normalized) points are colinear.
fn in_general_position(points: &[Point; 4]) -> bool {
    const TRIPLES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    TRIPLES.iter().all(|&[a, b, c]| {
        let u = points[b] - points[a];
        let v = points[c] - points[a];
        (u.x * v.y - u.y * v.x).abs() > 1e-9
    })
}

/// Translate the centroid to the origin and scale the mean distance to sqrt(2).
fn normalize_points(points: &[Point; 4]) -> (Matrix3<f64>, [Point; 4]) {
    let cx = points.iter().map(|p| p.x).sum::<f64>() / 4.0;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / 4.0;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / 4.0;
    let s = if mean_dist > 1e-15 {
        std::f64::consts::SQRT_2 / mean_dist
    } else {
        1.0
    };

    let t = Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0);
    let normalized = points.map(|p| Point::new(s * (p.x - cx), s * (p.y - cy)));
    (t, normalized)
}
