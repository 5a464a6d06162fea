use tracing::{debug, instrument, warn};

use crate::config::PipelineConfig;
use crate::error::{Result, ScanError};
use crate::geometry::{Homography, Point, Quadrilateral};
use crate::preprocess::PreparedImage;

/// Interior angles may deviate from 90 degrees by this much on average.
pub const MAX_MEAN_ANGLE_DEVIATION: f64 = 45.0;

/// Document corners in original-image coordinates plus the rectifying
/// transform onto the output canvas.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedGeometry {
    pub quad: Quadrilateral,
    /// Document width in pixels, excluding margin
    pub width: u32,
    /// Document height in pixels, excluding margin
    pub height: u32,
    pub margin: u32,
    /// Original image -> output canvas
    pub transform: Homography,
}

impl ResolvedGeometry {
    /// Full output size including the margin on every side.
    pub fn canvas_size(&self) -> (u32, u32) {
        let border = self.margin.saturating_mul(2);
        (
            self.width.saturating_add(border),
            self.height.saturating_add(border),
        )
    }
}

/// Why a quadrilateral was turned down. Kept as text for logs.
pub fn validate_quad(
    quad: &Quadrilateral,
    image_size: (u32, u32),
    config: &PipelineConfig,
    check_area: bool,
) -> std::result::Result<(), String> {
    let (width, height) = image_size;

    if !quad.is_convex() {
        return Err("not convex".into());
    }
    if quad.has_colinear_corners() {
        return Err("three corners are colinear".into());
    }

    let min_separation = config.min_corner_separation_fraction * width.min(height) as f64;
    let separation = quad.min_corner_distance();
    if separation < min_separation {
        return Err(format!(
            "corners {:.1}px apart, need {:.1}px",
            separation, min_separation
        ));
    }

    let deviation = quad.mean_angle_deviation();
    if deviation > MAX_MEAN_ANGLE_DEVIATION {
        return Err(format!("angles deviate {:.1} degrees from square", deviation));
    }

    if check_area {
        let (min_fraction, max_fraction) = config.area_bounds();
        let fraction = quad.area() / (width as f64 * height as f64);
        if fraction < min_fraction || fraction > max_fraction {
            return Err(format!("area fraction {:.3} out of range", fraction));
        }

        if let Some(calibration) = &config.calibration {
            let (w, h) = quad.output_size();
            let aspect = w.max(h) as f64 / w.min(h).max(1) as f64;
            if !calibration.accepts_aspect(aspect) {
                return Err(format!("aspect ratio {:.2} outside calibrated range", aspect));
            }
        }
    }

    Ok(())
}

/// Turn a validated quadrilateral into sizes and a transform.
fn build_geometry(quad: Quadrilateral, config: &PipelineConfig) -> Result<ResolvedGeometry> {
    let (width, height) = quad.output_size();
    if width < config.min_output_dimension || height < config.min_output_dimension {
        return Err(ScanError::DegenerateGeometry(format!(
            "output {}x{} below minimum {}",
            width, height, config.min_output_dimension
        )));
    }

    let border = config.margin.checked_mul(2);
    if border.and_then(|b| width.max(height).checked_add(b)).is_none() {
        return Err(ScanError::DegenerateGeometry(format!(
            "margin {} overflows the output size",
            config.margin
        )));
    }

    let transform = Homography::quad_to_rect(&quad, width, height, config.margin).ok_or_else(
        || ScanError::DegenerateGeometry("perspective transform is singular".into()),
    )?;

    Ok(ResolvedGeometry {
        quad,
        width,
        height,
        margin: config.margin,
        transform,
    })
}

/// Pick the first candidate (largest first) that survives validation and
/// yields an invertible transform.
#[instrument(skip_all, fields(candidates = candidates.len()))]
pub fn resolve(
    candidates: &[Quadrilateral],
    prepared: &PreparedImage,
    config: &PipelineConfig,
) -> Result<ResolvedGeometry> {
    let (width, height) = prepared.original_size;
    let mut last_degenerate = None;

    for (rank, candidate) in candidates.iter().enumerate() {
        let quad = candidate
            .map(|p| prepared.to_original(p))
            .clamped_to(width, height);

        if let Err(reason) = validate_quad(&quad, (width, height), config, true) {
            debug!(rank, %reason, "Candidate rejected");
            continue;
        }

        match build_geometry(quad, config) {
            Ok(geometry) => {
                debug!(
                    rank,
                    width = geometry.width,
                    height = geometry.height,
                    "Document geometry resolved"
                );
                return Ok(geometry);
            }
            Err(err) => {
                warn!(rank, error = %err, "Candidate geometry is degenerate");
                last_degenerate = Some(err);
            }
        }
    }

    Err(last_degenerate.unwrap_or(ScanError::NoDocumentFound {
        candidates: candidates.len(),
    }))
}

/// Geometry for caller-supplied corners (any order). No area filter applies.
pub fn resolve_manual(
    corners: [Point; 4],
    image_size: (u32, u32),
    config: &PipelineConfig,
) -> Result<ResolvedGeometry> {
    let (width, height) = image_size;
    if corners.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
        return Err(ScanError::DegenerateGeometry("corner is not finite".into()));
    }
    let quad = Quadrilateral::from_points(corners).clamped_to(width, height);
    validate_quad(&quad, image_size, config, false).map_err(ScanError::DegenerateGeometry)?;
    build_geometry(quad, config)
}
