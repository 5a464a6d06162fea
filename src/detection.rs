use image::{GrayImage, Luma};
use imageproc::contours::find_contours;
use imageproc::contrast::otsu_level;
use imageproc::distance_transform::Norm;
use imageproc::geometry::{approximate_polygon_dp, arc_length, contour_area, convex_hull};
use imageproc::morphology::close;
use imageproc::point::Point as PixelPoint;
use tracing::debug;

use crate::calibration::Calibration;
use crate::config::{DetectorKind, PipelineConfig};
use crate::geometry::{is_convex_polygon, Point, Quadrilateral};
use crate::preprocess::PreparedImage;

/// Ordered pixels of a closed polygon approximating a region boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct Contour {
    pub points: Vec<PixelPoint<i32>>,
}

impl Contour {
    pub fn new(points: Vec<PixelPoint<i32>>) -> Self {
        Self { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Closed perimeter length.
    pub fn perimeter(&self) -> f64 {
        arc_length(&self.points, true)
    }

    pub fn area(&self) -> f64 {
        contour_area(&self.points)
    }

    pub fn corners(&self) -> Vec<Point> {
        self.points
            .iter()
            .map(|p| Point::new(p.x as f64, p.y as f64))
            .collect()
    }

    pub fn is_convex(&self) -> bool {
        is_convex_polygon(&self.corners())
    }

    /// Douglas-Peucker simplification of the closed curve.
    ///
    /// The curve is cut at two extreme points, the one farthest from the
    /// centroid and the one farthest from that, and each half is simplified
    /// as an open chain. The result does not depend on where tracing started.
    pub fn simplify(&self, epsilon: f64) -> Contour {
        let pts = &self.points;
        let n = pts.len();
        if n <= 3 || epsilon <= 0.0 {
            return self.clone();
        }

        let cx = pts.iter().map(|p| p.x as f64).sum::<f64>() / n as f64;
        let cy = pts.iter().map(|p| p.y as f64).sum::<f64>() / n as f64;
        let a = farthest_from(pts, (cx, cy));
        let b = farthest_from(pts, (pts[a].x as f64, pts[a].y as f64));
        if a == b {
            return Contour::new(vec![pts[a]]);
        }
        let (i, j) = (a.min(b), a.max(b));

        let mut simplified = approximate_polygon_dp(&pts[i..=j], epsilon, false);
        let wrap: Vec<PixelPoint<i32>> = pts[j..].iter().chain(&pts[..=i]).copied().collect();
        let tail = approximate_polygon_dp(&wrap, epsilon, false);

        simplified.pop();
        simplified.extend_from_slice(&tail[..tail.len() - 1]);
        Contour::new(simplified)
    }
}

/// Index of the point farthest from `(ox, oy)`; ties go to the topmost, then
/// leftmost point so the choice does not depend on traversal order.
fn farthest_from(points: &[PixelPoint<i32>], (ox, oy): (f64, f64)) -> usize {
    let mut best = 0;
    let mut best_dist = f64::NEG_INFINITY;
    for (i, p) in points.iter().enumerate() {
        let d = (p.x as f64 - ox).powi(2) + (p.y as f64 - oy).powi(2);
        let tie_wins = d == best_dist && (p.y, p.x) < (points[best].y, points[best].x);
        if d > best_dist || tie_wins {
            best_dist = d;
            best = i;
        }
    }
    best
}

/// One detection attempt. `Strict` runs first; `Relaxed` is the single retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectionPass {
    Strict,
    /// Wider tolerance applied to each contour's convex hull, which bridges
    /// small gaps and rounded corners.
    Relaxed,
}

impl DetectionPass {
    pub fn tolerance_factor(&self, config: &PipelineConfig) -> f64 {
        match self {
            DetectionPass::Strict => config.simplification_tolerance_factor,
            DetectionPass::Relaxed => config.relaxed_tolerance_factor,
        }
    }

    pub fn uses_hull(&self) -> bool {
        matches!(self, DetectionPass::Relaxed)
    }
}

/// Capability: turn a prepared image into ranked candidate quadrilaterals.
///
/// Candidates are in working-image coordinates, largest first.
pub trait QuadDetector: Send + Sync {
    fn name(&self) -> &'static str;

    fn candidates(
        &self,
        prepared: &PreparedImage,
        pass: DetectionPass,
        config: &PipelineConfig,
    ) -> Vec<Quadrilateral>;
}

/// Contours of the edge map.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContourDetector;

impl QuadDetector for ContourDetector {
    fn name(&self) -> &'static str {
        "edges"
    }

    fn candidates(
        &self,
        prepared: &PreparedImage,
        pass: DetectionPass,
        config: &PipelineConfig,
    ) -> Vec<Quadrilateral> {
        quads_from_mask(&prepared.edges, pass, config)
    }
}

/// Light document on a darker background: global binarization, then contours
/// of the closed foreground mask. The level comes from the calibration when
/// one is configured, otherwise from Otsu.
#[derive(Debug, Clone, Copy)]
pub struct ThresholdDetector {
    pub close_radius: u8,
}

impl Default for ThresholdDetector {
    fn default() -> Self {
        Self { close_radius: 3 }
    }
}

impl QuadDetector for ThresholdDetector {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn candidates(
        &self,
        prepared: &PreparedImage,
        pass: DetectionPass,
        config: &PipelineConfig,
    ) -> Vec<Quadrilateral> {
        let level = config
            .calibration
            .as_ref()
            .and_then(Calibration::threshold_level)
            .unwrap_or_else(|| otsu_level(&prepared.smoothed));
        let (w, h) = prepared.smoothed.dimensions();
        let mut mask = GrayImage::from_fn(w, h, |x, y| {
            if prepared.smoothed.get_pixel(x, y)[0] > level {
                Luma([255u8])
            } else {
                Luma([0u8])
            }
        });
        if self.close_radius > 0 {
            mask = close(&mask, Norm::LInf, self.close_radius);
        }
        debug!(level, "Otsu mask built");
        quads_from_mask(&mask, pass, config)
    }
}

pub fn detector_for(kind: DetectorKind) -> Box<dyn QuadDetector> {
    match kind {
        DetectorKind::Edges => Box::new(ContourDetector),
        DetectorKind::Threshold => Box::new(ThresholdDetector::default()),
    }
}

/// Trace every border in a binary mask and keep the four-vertex convex
/// polygons whose area is a plausible share of the frame, largest first.
pub fn quads_from_mask(
    mask: &GrayImage,
    pass: DetectionPass,
    config: &PipelineConfig,
) -> Vec<Quadrilateral> {
    let (width, height) = mask.dimensions();
    let frame_area = width as f64 * height as f64;
    let (min_fraction, max_fraction) = config.area_bounds();
    let min_area = min_fraction * frame_area;
    let max_area = max_fraction * frame_area;
    let factor = pass.tolerance_factor(config);

    let contours = find_contours::<i32>(mask);
    let mut quads: Vec<Quadrilateral> = contours
        .iter()
        .filter(|c| bounding_area(&c.points) >= min_area)
        .filter_map(|c| {
            let pixels = if pass.uses_hull() {
                convex_hull(&c.points[..])
            } else {
                c.points.clone()
            };
            let contour = Contour::new(pixels);
            let simplified = contour.simplify(factor * contour.perimeter());
            if simplified.len() != 4 || !simplified.is_convex() {
                return None;
            }
            let area = simplified.area();
            if area < min_area || area > max_area {
                return None;
            }
            let p = simplified.corners();
            Some(Quadrilateral::from_points([p[0], p[1], p[2], p[3]]))
        })
        .collect();

    quads.sort_by(|a, b| b.area().total_cmp(&a.area()));

    // Outer and inner borders of one outline produce near-duplicates.
    let tolerance = 0.02 * width.min(height) as f64;
    let mut ranked: Vec<Quadrilateral> = Vec::with_capacity(quads.len());
    for quad in quads {
        if !ranked.iter().any(|kept| nearly_same(kept, &quad, tolerance)) {
            ranked.push(quad);
        }
    }
    ranked.truncate(config.max_candidates);

    debug!(
        ?pass,
        contours = contours.len(),
        candidates = ranked.len(),
        "Quadrilateral candidates"
    );
    ranked
}

fn bounding_area(points: &[PixelPoint<i32>]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (i32::MAX, i32::MAX, i32::MIN, i32::MIN);
    for p in points {
        min_x = min_x.min(p.x);
        max_x = max_x.max(p.x);
        min_y = min_y.min(p.y);
        max_y = max_y.max(p.y);
    }
    (max_x - min_x + 1) as f64 * (max_y - min_y + 1) as f64
}

fn nearly_same(a: &Quadrilateral, b: &Quadrilateral, tolerance: f64) -> bool {
    a.corners()
        .iter()
        .zip(b.corners())
        .all(|(p, q)| nalgebra::distance(p, q) <= tolerance)
}
