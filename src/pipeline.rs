use image::{DynamicImage, GenericImageView};
use tracing::{debug, info, instrument, warn};

use crate::config::PipelineConfig;
use crate::detection::{detector_for, DetectionPass, QuadDetector};
use crate::enhance::enhance;
use crate::error::{Result, ScanError};
use crate::geometry::{Homography, Point, Quadrilateral};
use crate::preprocess::{decode, ensure_valid, prepare, PreparedImage};
use crate::resolve::{resolve, resolve_manual, ResolvedGeometry};
use crate::transform::rectify;

/// A rectified document and the geometry that produced it.
#[derive(Debug, Clone)]
pub struct ScanOutput {
    pub image: DynamicImage,
    /// Document corners in the input image
    pub quad: Quadrilateral,
    pub width: u32,
    pub height: u32,
    /// Input image -> output image
    pub transform: Homography,
}

/// Runs preprocessing, detection, geometry resolution and rectification
/// for one image at a time. Holds no per-image state.
pub struct DocumentScanner {
    config: PipelineConfig,
    detector: Box<dyn QuadDetector>,
}

impl std::fmt::Debug for DocumentScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentScanner")
            .field("config", &self.config)
            .field("detector", &self.detector.name())
            .finish()
    }
}

impl DocumentScanner {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        let detector = detector_for(config.detector);
        Ok(Self { config, detector })
    }

    /// Replace the detector chosen by the configuration.
    pub fn with_detector(mut self, detector: Box<dyn QuadDetector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Locate the document without warping. With a calibration configured,
    /// its crop points stand in when detection finds nothing usable.
    #[instrument(skip_all, fields(detector = self.detector.name()))]
    pub fn detect(&self, image: &DynamicImage) -> Result<ResolvedGeometry> {
        let prepared = prepare(image, &self.config)?;

        match (self.run_passes(&prepared), &self.config.calibration) {
            (Err(err), Some(calibration)) if err.is_detection_failure() => {
                warn!(error = %err, "Detection failed, using calibrated crop points");
                let size = image.dimensions();
                resolve_manual(calibration.crop_corners(size), size, &self.config)
                    .map_err(|_| err)
            }
            (result, _) => result,
        }
    }

    /// Strict pass, then at most one relaxed pass.
    fn run_passes(&self, prepared: &PreparedImage) -> Result<ResolvedGeometry> {
        let strict = self
            .detector
            .candidates(prepared, DetectionPass::Strict, &self.config);
        let mut strict_failure = None;
        if !strict.is_empty() {
            match resolve(&strict, prepared, &self.config) {
                Ok(geometry) => return Ok(geometry),
                Err(err) if !err.is_detection_failure() => return Err(err),
                Err(err) => {
                    debug!(error = %err, "Strict candidates rejected");
                    strict_failure = Some(err);
                }
            }
        }

        debug!("Retrying with relaxed tolerance");
        let relaxed = self
            .detector
            .candidates(prepared, DetectionPass::Relaxed, &self.config);
        match (resolve(&relaxed, prepared, &self.config), strict_failure) {
            (
                Err(ScanError::NoDocumentFound { .. }),
                Some(err @ ScanError::DegenerateGeometry(_)),
            ) => Err(err),
            (result, _) => result,
        }
    }

    /// Full pipeline: detect, rectify, optionally enhance.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub fn scan(&self, image: &DynamicImage) -> Result<ScanOutput> {
        let geometry = self.detect(image)?;
        let output = self.finish(image, geometry);
        info!(width = output.width, height = output.height, "Document rectified");
        Ok(output)
    }

    /// Decode `bytes` and run [`DocumentScanner::scan`].
    pub fn scan_bytes(&self, bytes: &[u8]) -> Result<ScanOutput> {
        let image = decode(bytes)?;
        self.scan(&image)
    }

    /// Rectify using caller-supplied corners, in any order. Points outside
    /// the image are clamped to its bounds.
    #[instrument(skip_all)]
    pub fn rectify_with_corners(
        &self,
        image: &DynamicImage,
        corners: [Point; 4],
    ) -> Result<ScanOutput> {
        ensure_valid(image)?;
        let geometry = resolve_manual(corners, image.dimensions(), &self.config)?;
        Ok(self.finish(image, geometry))
    }

    fn finish(&self, image: &DynamicImage, geometry: ResolvedGeometry) -> ScanOutput {
        let mut rectified = rectify(image, &geometry, self.config.interpolation);
        if self.config.enhance_post_processing {
            rectified = enhance(&rectified, self.config.enhancement);
        }

        ScanOutput {
            width: rectified.width(),
            height: rectified.height(),
            image: rectified,
            quad: geometry.quad,
            transform: geometry.transform,
        }
    }
}

/// One-shot convenience wrapper around [`DocumentScanner`].
pub fn scan_document(image: &DynamicImage, config: &PipelineConfig) -> Result<ScanOutput> {
    DocumentScanner::new(config.clone())?.scan(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::calibration::Calibration;
    use crate::config::{DetectorKind, EnhanceStyle};
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn page_on_table() -> DynamicImage {
        let mut img = RgbImage::from_pixel(480, 360, Rgb([50, 45, 40]));
        draw_filled_rect_mut(&mut img, Rect::at(90, 60).of_size(300, 240), Rgb([240, 240, 235]));
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = PipelineConfig {
            max_candidates: 0,
            ..Default::default()
        };
        assert!(matches!(
            DocumentScanner::new(config),
            Err(ScanError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_detect_reports_corners_in_input_space() {
        let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
        let geometry = scanner.detect(&page_on_table()).unwrap();
        let tl = geometry.quad.top_left();
        let br = geometry.quad.bottom_right();
        assert!((tl.x - 90.0).abs() < 5.0 && (tl.y - 60.0).abs() < 5.0, "{:?}", tl);
        assert!((br.x - 389.0).abs() < 5.0 && (br.y - 299.0).abs() < 5.0, "{:?}", br);
    }

    #[test]
    fn test_threshold_detector_scan() {
        let config = PipelineConfig {
            detector: DetectorKind::Threshold,
            ..Default::default()
        };
        let scanner = DocumentScanner::new(config).unwrap();
        let output = scanner.scan(&page_on_table()).unwrap();
        assert!((output.width as i32 - 300).abs() <= 9, "{}", output.width);
        assert!((output.height as i32 - 240).abs() <= 7, "{}", output.height);
        assert!(output.image.as_rgb8().is_some());
    }

    #[test]
    fn test_enhancement_produces_gray() {
        let config = PipelineConfig {
            enhance_post_processing: true,
            enhancement: EnhanceStyle::Scan,
            ..Default::default()
        };
        let output = scan_document(&page_on_table(), &config).unwrap();
        assert!(output.image.as_luma8().is_some());
        assert_eq!(output.width, output.image.width());
    }

    #[test]
    fn test_blank_image_is_no_document() {
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(320, 240, Rgb([0, 0, 0])));
        let err = scan_document(&blank, &PipelineConfig::default()).unwrap_err();
        assert!(matches!(err, ScanError::NoDocumentFound { .. }));
    }

    #[test]
    fn test_scan_bytes_rejects_empty() {
        let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
        assert!(matches!(
            scanner.scan_bytes(&[]),
            Err(ScanError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_manual_corners_size() {
        let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
        let output = scanner
            .rectify_with_corners(
                &page_on_table(),
                [
                    Point::new(389.0, 299.0),
                    Point::new(90.0, 60.0),
                    Point::new(90.0, 299.0),
                    Point::new(389.0, 60.0),
                ],
            )
            .unwrap();
        assert_eq!((output.width, output.height), (300, 240));
        let rgb = output.image.as_rgb8().unwrap();
        assert_eq!(rgb.get_pixel(150, 120), &Rgb([240, 240, 235]));
    }

    /// Hands out fixed candidates per pass and counts how often it is asked.
    struct ScriptedDetector {
        strict: Vec<Quadrilateral>,
        relaxed: Vec<Quadrilateral>,
        calls: Arc<[AtomicUsize; 2]>,
    }

    impl ScriptedDetector {
        fn new(
            strict: Vec<Quadrilateral>,
            relaxed: Vec<Quadrilateral>,
        ) -> (Self, Arc<[AtomicUsize; 2]>) {
            let calls = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);
            let detector = Self {
                strict,
                relaxed,
                calls: Arc::clone(&calls),
            };
            (detector, calls)
        }
    }

    impl QuadDetector for ScriptedDetector {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn candidates(
            &self,
            _prepared: &PreparedImage,
            pass: DetectionPass,
            _config: &PipelineConfig,
        ) -> Vec<Quadrilateral> {
            match pass {
                DetectionPass::Strict => {
                    self.calls[0].fetch_add(1, Ordering::SeqCst);
                    self.strict.clone()
                }
                DetectionPass::Relaxed => {
                    self.calls[1].fetch_add(1, Ordering::SeqCst);
                    self.relaxed.clone()
                }
            }
        }
    }

    fn counts(calls: &[AtomicUsize; 2]) -> (usize, usize) {
        (calls[0].load(Ordering::SeqCst), calls[1].load(Ordering::SeqCst))
    }

    fn gray_frame() -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_pixel(320, 240, Luma([128u8])))
    }

    fn inner_quad() -> Quadrilateral {
        Quadrilateral::from_points([
            Point::new(20.0, 20.0),
            Point::new(299.0, 20.0),
            Point::new(299.0, 219.0),
            Point::new(20.0, 219.0),
        ])
    }

    #[test]
    fn test_relaxed_pass_runs_once_after_empty_strict() {
        let (detector, calls) = ScriptedDetector::new(vec![], vec![]);
        let scanner = DocumentScanner::new(PipelineConfig::default())
            .unwrap()
            .with_detector(Box::new(detector));

        let err = scanner.detect(&gray_frame()).unwrap_err();
        assert_eq!(err, ScanError::NoDocumentFound { candidates: 0 });
        assert_eq!(counts(&calls), (1, 1));
    }

    #[test]
    fn test_relaxed_candidates_used_when_strict_has_none() {
        let (detector, calls) = ScriptedDetector::new(vec![], vec![inner_quad()]);
        let scanner = DocumentScanner::new(PipelineConfig::default())
            .unwrap()
            .with_detector(Box::new(detector));

        let geometry = scanner.detect(&gray_frame()).unwrap();
        assert_eq!(geometry.quad, inner_quad());
        assert_eq!((geometry.width, geometry.height), (280, 200));
        assert_eq!(counts(&calls), (1, 1));
    }

    #[test]
    fn test_accepted_strict_candidate_skips_relaxed_pass() {
        let (detector, calls) = ScriptedDetector::new(vec![inner_quad()], vec![]);
        let scanner = DocumentScanner::new(PipelineConfig::default())
            .unwrap()
            .with_detector(Box::new(detector));

        assert!(scanner.detect(&gray_frame()).is_ok());
        assert_eq!(counts(&calls), (1, 0));
    }

    #[test]
    fn test_strict_degenerate_reason_survives_empty_relaxed_pass() {
        let (detector, calls) = ScriptedDetector::new(vec![inner_quad()], vec![]);
        let config = PipelineConfig {
            min_output_dimension: 5000,
            ..Default::default()
        };
        let scanner = DocumentScanner::new(config)
            .unwrap()
            .with_detector(Box::new(detector));

        let err = scanner.detect(&gray_frame()).unwrap_err();
        assert!(matches!(err, ScanError::DegenerateGeometry(_)), "{:?}", err);
        assert_eq!(counts(&calls), (1, 1));
    }

    #[test]
    fn test_calibrated_crop_points_are_the_fallback() {
        let calibration = Calibration {
            crop_points: [[0.1, 0.1], [0.9, 0.1], [0.9, 0.9], [0.1, 0.9]],
            document_brightness: 230.0,
            background_brightness: 40.0,
            area_fraction: 0.64,
            area_range: [0.3, 0.9],
            aspect_ratio: 1.6,
            aspect_range: [1.1, 2.1],
            samples: 1,
        };
        let config = PipelineConfig {
            calibration: Some(calibration),
            ..Default::default()
        };
        let blank = DynamicImage::ImageRgb8(RgbImage::from_pixel(200, 100, Rgb([90, 90, 90])));

        let output = scan_document(&blank, &config).unwrap();
        assert_eq!(output.quad.top_left(), Point::new(20.0, 10.0));
        assert_eq!(output.quad.bottom_right(), Point::new(180.0, 90.0));
        assert_eq!((output.width, output.height), (161, 81));

        let plain = scan_document(&blank, &PipelineConfig::default()).unwrap_err();
        assert!(plain.is_detection_failure());
    }
}
