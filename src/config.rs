use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::calibration::Calibration;
use crate::error::{Result, ScanError};

/// Largest accepted `margin`, in pixels.
pub const MAX_MARGIN: u32 = 4096;

/// Sampling kernel used by the rectifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Interpolation {
    #[default]
    Bilinear,
    /// Catmull-Rom
    Bicubic,
}

/// Which detection strategy produces candidate quadrilaterals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectorKind {
    /// Contours of the Canny edge map
    #[default]
    Edges,
    /// Contours of an Otsu-binarized image (light document, dark background)
    Threshold,
}

/// Post-processing applied after rectification when enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnhanceStyle {
    /// Luminance stretch, colour preserved
    Contrast,
    /// Black-and-white "scanned" look
    #[default]
    Scan,
}

/// Options for one pipeline invocation.
///
/// The numeric thresholds are tunable defaults, not contractual constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Longest side of the working copy used for detection
    pub max_working_dimension: u32,
    /// Smallest accepted document area relative to the frame
    pub min_document_area_fraction: f64,
    /// Largest accepted document area relative to the frame
    pub max_document_area_fraction: f64,
    /// Polygon simplification tolerance as a fraction of contour perimeter
    pub simplification_tolerance_factor: f64,
    /// Tolerance used by the single relaxed retry
    pub relaxed_tolerance_factor: f64,
    pub blur_sigma: f32,
    pub canny_low: f32,
    pub canny_high: f32,
    /// Dilation radius (L-infinity) applied to the edge map to close gaps
    pub edge_dilation: u8,
    pub max_candidates: usize,
    /// Minimum distance between any two corners, relative to the shorter image side
    pub min_corner_separation_fraction: f64,
    pub min_output_dimension: u32,
    /// White border added around the rectified document, in pixels
    pub margin: u32,
    pub interpolation: Interpolation,
    pub detector: DetectorKind,
    pub enhance_post_processing: bool,
    pub enhancement: EnhanceStyle,
    /// Learned from a marked sample; narrows detection and supplies fallback corners
    #[serde(skip_serializing_if = "Option::is_none")]
    pub calibration: Option<Calibration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_working_dimension: 1200,
            min_document_area_fraction: 0.15,
            max_document_area_fraction: 0.95,
            simplification_tolerance_factor: 0.02,
            relaxed_tolerance_factor: 0.05,
            blur_sigma: 1.5,
            canny_low: 30.0,
            canny_high: 150.0,
            edge_dilation: 1,
            max_candidates: 5,
            min_corner_separation_fraction: 0.05,
            min_output_dimension: 10,
            margin: 0,
            interpolation: Interpolation::Bilinear,
            detector: DetectorKind::Edges,
            enhance_post_processing: false,
            enhancement: EnhanceStyle::Scan,
            calibration: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|err| ScanError::InvalidConfig(format!("malformed config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|err| {
            ScanError::InvalidConfig(format!("cannot read {}: {}", path.display(), err))
        })?;
        Self::from_json_str(&text)
    }

    /// Accepted document area fractions for detected candidates. A
    /// calibration replaces the configured bounds.
    pub fn area_bounds(&self) -> (f64, f64) {
        match &self.calibration {
            Some(calibration) => (calibration.area_range[0], calibration.area_range[1]),
            None => (
                self.min_document_area_fraction,
                self.max_document_area_fraction,
            ),
        }
    }

    /// Reject values that would make the pipeline meaningless.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(ScanError::InvalidConfig(msg));

        if self.max_working_dimension == 0 {
            return fail("maxWorkingDimension must be positive".into());
        }
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(self.min_document_area_fraction) || !in_unit(self.max_document_area_fraction) {
            return fail("document area fractions must lie in (0, 1]".into());
        }
        if self.min_document_area_fraction >= self.max_document_area_fraction {
            return fail(format!(
                "minDocumentAreaFraction ({}) must be below maxDocumentAreaFraction ({})",
                self.min_document_area_fraction, self.max_document_area_fraction
            ));
        }
        if !(self.simplification_tolerance_factor > 0.0) {
            return fail("simplificationToleranceFactor must be positive".into());
        }
        if self.relaxed_tolerance_factor <= self.simplification_tolerance_factor {
            return fail(format!(
                "relaxedToleranceFactor ({}) must exceed simplificationToleranceFactor ({})",
                self.relaxed_tolerance_factor, self.simplification_tolerance_factor
            ));
        }
        if !(self.blur_sigma > 0.0) {
            return fail("blurSigma must be positive".into());
        }
        if self.canny_low < 0.0 || self.canny_low > self.canny_high {
            return fail(format!(
                "canny thresholds out of order: low {} high {}",
                self.canny_low, self.canny_high
            ));
        }
        if self.max_candidates == 0 {
            return fail("maxCandidates must be at least 1".into());
        }
        if !(0.0..1.0).contains(&self.min_corner_separation_fraction) {
            return fail("minCornerSeparationFraction must lie in [0, 1)".into());
        }
        if self.min_output_dimension == 0 {
            return fail("minOutputDimension must be positive".into());
        }
        if self.margin > MAX_MARGIN {
            return fail(format!("margin {} exceeds {}", self.margin, MAX_MARGIN));
        }
        if let Some(calibration) = &self.calibration {
            calibration.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(PipelineConfig::default().validate().is_ok());
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "maxWorkingDimension": 800, "enhancePostProcessing": true, "detector": "threshold" }"#,
        )
        .unwrap();
        assert_eq!(config.max_working_dimension, 800);
        assert!(config.enhance_post_processing);
        assert_eq!(config.detector, DetectorKind::Threshold);
        assert_eq!(config.min_document_area_fraction, 0.15);
        assert_eq!(config.interpolation, Interpolation::Bilinear);
    }

    #[test]
    fn rejects_inverted_area_bounds() {
        let config = PipelineConfig {
            min_document_area_fraction: 0.9,
            max_document_area_fraction: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_relaxed_tolerance_not_wider() {
        let config = PipelineConfig {
            relaxed_tolerance_factor: 0.01,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_oversized_margin() {
        let config = PipelineConfig {
            margin: 60_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ScanError::InvalidConfig(_))));
        let edge = PipelineConfig {
            margin: MAX_MARGIN,
            ..Default::default()
        };
        assert!(edge.validate().is_ok());
    }

    #[test]
    fn calibration_loads_from_json_and_sets_area_bounds() {
        let config = PipelineConfig::from_json_str(
            r#"{
                "calibration": {
                    "cropPoints": [[0.1, 0.1], [0.9, 0.1], [0.9, 0.9], [0.1, 0.9]],
                    "documentBrightness": 230.0,
                    "backgroundBrightness": 50.0,
                    "areaFraction": 0.04,
                    "areaRange": [0.02, 0.06],
                    "aspectRatio": 1.4,
                    "aspectRange": [1.0, 1.8],
                    "samples": 1
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.area_bounds(), (0.02, 0.06));
        assert_eq!(PipelineConfig::default().area_bounds(), (0.15, 0.95));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = PipelineConfig::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ScanError::InvalidConfig(_)));
    }
}
