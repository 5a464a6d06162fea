use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::dilate;
use tracing::{debug, instrument};

use crate::config::PipelineConfig;
use crate::error::{Result, ScanError};
use crate::geometry::Point;

/// Working-resolution derivatives of one input image.
#[derive(Debug, Clone)]
pub struct PreparedImage {
    /// Single-channel intensity at working resolution
    pub gray: GrayImage,
    /// `gray` after noise-reduction smoothing
    pub smoothed: GrayImage,
    /// Binary edge map (255 = edge), gaps closed by dilation
    pub edges: GrayImage,
    /// Working size divided by original size (<= 1)
    pub scale: f64,
    pub original_size: (u32, u32),
}

impl PreparedImage {
    pub fn working_size(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn working_area(&self) -> f64 {
        let (w, h) = self.working_size();
        w as f64 * h as f64
    }

    /// Map a working-resolution pixel coordinate back to the original image.
    pub fn to_original(&self, p: Point) -> Point {
        Point::new(
            (p.x + 0.5) / self.scale - 0.5,
            (p.y + 0.5) / self.scale - 0.5,
        )
    }
}

/// Decode raw bytes into an image, rejecting unreadable or empty input.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
    if bytes.is_empty() {
        return Err(ScanError::InvalidImage("empty input".into()));
    }
    let img = image::load_from_memory(bytes)
        .map_err(|err| ScanError::InvalidImage(format!("failed to decode: {}", err)))?;
    ensure_valid(&img)?;
    Ok(img)
}

pub fn ensure_valid(img: &DynamicImage) -> Result<()> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err(ScanError::InvalidImage(format!(
            "zero dimensions ({}x{})",
            width, height
        )));
    }
    Ok(())
}

/// Factor that brings the longest side down to `max_dimension` (never upscales).
pub fn working_scale(width: u32, height: u32, max_dimension: u32) -> f64 {
    let longest = width.max(height);
    if longest <= max_dimension || longest == 0 {
        1.0
    } else {
        max_dimension as f64 / longest as f64
    }
}

/// Build the normalized grayscale and edge map used for detection.
#[instrument(skip_all, fields(width = img.width(), height = img.height()))]
pub fn prepare(img: &DynamicImage, config: &PipelineConfig) -> Result<PreparedImage> {
    ensure_valid(img)?;
    let (width, height) = img.dimensions();

    let full_gray = img.to_luma8();
    let scale = working_scale(width, height, config.max_working_dimension);
    let gray = if scale < 1.0 {
        let w = ((width as f64 * scale).round() as u32).max(1);
        let h = ((height as f64 * scale).round() as u32).max(1);
        debug!(w, h, scale, "Resizing working copy");
        image::imageops::resize(&full_gray, w, h, FilterType::Triangle)
    } else {
        full_gray
    };

    let smoothed = gaussian_blur_f32(&gray, config.blur_sigma);
    let mut edges = canny(&smoothed, config.canny_low, config.canny_high);
    if config.edge_dilation > 0 {
        edges = dilate(&edges, Norm::LInf, config.edge_dilation);
    }

    debug!(
        sigma = config.blur_sigma,
        low = config.canny_low,
        high = config.canny_high,
        dilation = config.edge_dilation,
        edge_pixels = edges.pixels().filter(|p| p[0] > 0).count(),
        "Edge map ready"
    );

    // Rescale from the actual rounded working size so coordinates map back exactly.
    let actual_scale = gray.width() as f64 / width as f64;

    Ok(PreparedImage {
        gray,
        smoothed,
        edges,
        scale: actual_scale,
        original_size: (width, height),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_working_scale_bounds_longest_side() {
        assert_eq!(working_scale(800, 600, 1200), 1.0);
        let s = working_scale(4000, 3000, 1000);
        assert!((s - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_decode_empty_is_invalid() {
        assert!(matches!(decode(&[]), Err(ScanError::InvalidImage(_))));
    }

    #[test]
    fn test_decode_garbage_is_invalid() {
        let garbage = [0x13u8, 0x37, 0x00, 0xff, 0x42, 0x42, 0x42, 0x42];
        assert!(matches!(decode(&garbage), Err(ScanError::InvalidImage(_))));
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let img = DynamicImage::new_luma8(0, 10);
        assert!(matches!(
            prepare(&img, &PipelineConfig::default()),
            Err(ScanError::InvalidImage(_))
        ));
    }

    #[test]
    fn test_uniform_image_has_no_edges() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(120, 80, Luma([255u8])));
        let prepared = prepare(&img, &PipelineConfig::default()).unwrap();
        assert!(prepared.edges.pixels().all(|p| p[0] == 0));
        assert_eq!(prepared.scale, 1.0);
    }

    #[test]
    fn test_large_image_is_downscaled_and_maps_back() {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(2400, 1200, Luma([90u8])));
        let prepared = prepare(&img, &PipelineConfig::default()).unwrap();
        assert_eq!(prepared.working_size(), (1200, 600));
        assert_eq!(prepared.original_size, (2400, 1200));

        let back = prepared.to_original(Point::new(599.5, 299.5));
        assert!((back.x - 1199.5).abs() < 1e-9);
        assert!((back.y - 599.5).abs() < 1e-9);
    }
}
