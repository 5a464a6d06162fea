use std::path::Path;

use image::{DynamicImage, GenericImageView, GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::drawing::draw_polygon_mut;
use imageproc::morphology::{dilate, erode};
use imageproc::point::Point as PixelPoint;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::error::{Result, ScanError};
use crate::geometry::{Point, Quadrilateral};
use crate::preprocess::ensure_valid;

/// Brightness samples stay this many pixels away from the marked outline.
const EDGE_CLEARANCE: u8 = 6;
/// Width of the frame strip used when nothing outside the document is left.
const BORDER_STRIP: u32 = 5;
/// Below this document/background gap the calibrated threshold is not trusted.
const MIN_BRIGHTNESS_GAP: f64 = 20.0;

/// What one or more hand-marked sample photos say about the documents to
/// expect: brightness of page and background, how much of the frame the
/// page covers, its proportions, and where it was marked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Calibration {
    /// Marked corners (top-left, top-right, bottom-right, bottom-left) as
    /// fractions of the sample's width and height
    pub crop_points: [[f64; 2]; 4],
    /// Median luminance inside the document
    pub document_brightness: f64,
    /// Median luminance around it
    pub background_brightness: f64,
    pub area_fraction: f64,
    /// Area fractions accepted for detected candidates
    pub area_range: [f64; 2],
    /// Long side over short side
    pub aspect_ratio: f64,
    pub aspect_range: [f64; 2],
    pub samples: u32,
}

impl Calibration {
    /// Learn from `image` with the document outlined by `corners` (any order).
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn from_sample(image: &DynamicImage, corners: [Point; 4]) -> Result<Self> {
        ensure_valid(image)?;
        if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(ScanError::DegenerateGeometry("corner is not finite".into()));
        }

        let (width, height) = image.dimensions();
        let quad = Quadrilateral::from_points(corners).clamped_to(width, height);
        if !quad.is_convex() || quad.has_colinear_corners() || quad.min_corner_distance() < 1.0 {
            return Err(ScanError::DegenerateGeometry(
                "calibration corners do not outline a quadrilateral".into(),
            ));
        }

        let area_fraction = quad.area() / (width as f64 * height as f64);
        let (w, h) = quad.output_size();
        let aspect_ratio = w.max(h) as f64 / w.min(h).max(1) as f64;

        let gray = image.to_luma8();
        let mask = polygon_mask(&quad, width, height);
        let inner = erode(&mask, Norm::LInf, EDGE_CLEARANCE);
        let document_brightness = median_where(&gray, |x, y| inner.get_pixel(x, y)[0] > 0)
            .or_else(|| median_where(&gray, |x, y| mask.get_pixel(x, y)[0] > 0))
            .unwrap_or(128.0);

        let outer = dilate(&mask, Norm::LInf, EDGE_CLEARANCE);
        let background_brightness = median_where(&gray, |x, y| outer.get_pixel(x, y)[0] == 0)
            .or_else(|| {
                median_where(&gray, |x, y| {
                    x < BORDER_STRIP
                        || y < BORDER_STRIP
                        || x + BORDER_STRIP >= width
                        || y + BORDER_STRIP >= height
                })
            })
            .unwrap_or(200.0);

        let marked = *quad.corners();
        let crop_points = marked.map(|p| [p.x / width as f64, p.y / height as f64]);

        let calibration = Self {
            crop_points,
            document_brightness,
            background_brightness,
            area_fraction,
            area_range: widen(area_fraction, 0.5, 1.5, 0.05, 0.95),
            aspect_ratio,
            aspect_range: widen(aspect_ratio, 0.7, 1.3, 1.0, 10.0),
            samples: 1,
        };
        debug!(?calibration, "Calibration sample analysed");
        Ok(calibration)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let calibration: Self = serde_json::from_str(json)
            .map_err(|err| ScanError::InvalidConfig(format!("malformed calibration: {}", err)))?;
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            ScanError::InvalidConfig(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        let fail = |msg: &str| Err(ScanError::InvalidConfig(format!("calibration: {}", msg)));

        let [area_min, area_max] = self.area_range;
        if !(area_min > 0.0 && area_min <= area_max && area_max <= 1.0) {
            return fail("areaRange must satisfy 0 < min <= max <= 1");
        }
        let [aspect_min, aspect_max] = self.aspect_range;
        if !(aspect_min >= 1.0 && aspect_min <= aspect_max) {
            return fail("aspectRange must satisfy 1 <= min <= max");
        }
        let in_range = |v: f64| (0.0..=255.0).contains(&v);
        if !in_range(self.document_brightness) || !in_range(self.background_brightness) {
            return fail("brightness must lie in [0, 255]");
        }
        if self.crop_points.iter().flatten().any(|v| !v.is_finite()) {
            return fail("cropPoints must be finite");
        }
        Ok(())
    }

    /// Fold another sample in. Measurements are averaged by sample count and
    /// the accepted ranges grow to cover both.
    pub fn merge(&mut self, other: &Calibration) {
        let total = (self.samples + other.samples).max(1) as f64;
        let (a, b) = (self.samples as f64 / total, other.samples as f64 / total);
        let mix = |x: f64, y: f64| x * a + y * b;

        for (mine, theirs) in self.crop_points.iter_mut().zip(other.crop_points) {
            mine[0] = mix(mine[0], theirs[0]);
            mine[1] = mix(mine[1], theirs[1]);
        }
        self.document_brightness = mix(self.document_brightness, other.document_brightness);
        self.background_brightness = mix(self.background_brightness, other.background_brightness);
        self.area_fraction = mix(self.area_fraction, other.area_fraction);
        self.aspect_ratio = mix(self.aspect_ratio, other.aspect_ratio);

        let area_min = (self.area_range[0].min(other.area_range[0]) * 0.9).max(f64::EPSILON);
        let area_max = (self.area_range[1].max(other.area_range[1]) * 1.1).min(1.0);
        self.area_range = [area_min, area_max.max(area_min)];
        let aspect_min = (self.aspect_range[0].min(other.aspect_range[0]) * 0.9).max(1.0);
        let aspect_max = (self.aspect_range[1].max(other.aspect_range[1]) * 1.1).min(10.0);
        self.aspect_range = [aspect_min, aspect_max.max(aspect_min)];

        self.samples += other.samples;
    }

    /// Binarization level halfway between page and background, when the page
    /// is clearly the brighter of the two.
    pub fn threshold_level(&self) -> Option<u8> {
        if self.document_brightness < self.background_brightness + MIN_BRIGHTNESS_GAP {
            return None;
        }
        let level = (self.document_brightness + self.background_brightness) / 2.0;
        Some(level.round().clamp(60.0, 240.0) as u8)
    }

    pub fn accepts_aspect(&self, ratio: f64) -> bool {
        (self.aspect_range[0]..=self.aspect_range[1]).contains(&ratio)
    }

    /// The marked corners scaled onto an image of the given size.
    pub fn crop_corners(&self, (width, height): (u32, u32)) -> [Point; 4] {
        self.crop_points
            .map(|[fx, fy]| Point::new(fx * width as f64, fy * height as f64))
    }
}

fn widen(value: f64, below: f64, above: f64, floor: f64, ceiling: f64) -> [f64; 2] {
    let low = (value * below).max(floor);
    let high = (value * above).min(ceiling).max(low);
    [low, high]
}

fn polygon_mask(quad: &Quadrilateral, width: u32, height: u32) -> GrayImage {
    let mut mask = GrayImage::new(width, height);
    let mut poly: Vec<PixelPoint<i32>> = quad
        .corners()
        .iter()
        .map(|p| PixelPoint::new(p.x.round() as i32, p.y.round() as i32))
        .collect();
    poly.dedup();
    if poly.len() >= 3 && poly.first() != poly.last() {
        draw_polygon_mut(&mut mask, &poly, Luma([255u8]));
    }
    mask
}

fn median_where(gray: &GrayImage, keep: impl Fn(u32, u32) -> bool) -> Option<f64> {
    let mut histogram = [0u64; 256];
    let mut total = 0u64;
    for (x, y, p) in gray.enumerate_pixels() {
        if keep(x, y) {
            histogram[p[0] as usize] += 1;
            total += 1;
        }
    }
    if total == 0 {
        return None;
    }

    let half = total.div_ceil(2);
    let mut cumulative = 0u64;
    for (level, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if cumulative >= half {
            return Some(level as f64);
        }
    }
    None
}
