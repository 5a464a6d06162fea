use image::{DynamicImage, GrayImage, Luma};
use tracing::{debug, instrument};

use crate::config::EnhanceStyle;

/// Fraction of pixels allowed to clip at each end of the contrast stretch.
const CLIP_FRACTION: f64 = 0.01;
/// Local-mean offset for the scan look; pixels this much darker than their
/// neighbourhood become ink.
const INK_OFFSET: i32 = 10;

/// Apply the configured post-processing to a rectified document.
#[instrument(skip(image), fields(width = image.width(), height = image.height()))]
pub fn enhance(image: &DynamicImage, style: EnhanceStyle) -> DynamicImage {
    match style {
        EnhanceStyle::Contrast => stretch_contrast(image),
        EnhanceStyle::Scan => DynamicImage::ImageLuma8(scan_look(image)),
    }
}

/// Luminance levels below which `CLIP_FRACTION` of pixels fall, and above
/// which the same fraction rises. `None` for (near-)flat images.
fn clip_levels(gray: &GrayImage) -> Option<(u8, u8)> {
    let mut histogram = [0u64; 256];
    for p in gray.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return None;
    }

    let low_count = (total as f64 * CLIP_FRACTION) as u64;
    let high_count = (total as f64 * (1.0 - CLIP_FRACTION)).ceil() as u64;

    let mut cumulative = 0u64;
    let mut low = None;
    let mut high = 255u8;
    for (level, &count) in histogram.iter().enumerate() {
        cumulative += count;
        if low.is_none() && cumulative > low_count {
            low = Some(level as u8);
        }
        if cumulative >= high_count {
            high = level as u8;
            break;
        }
    }

    let low = low?;
    (high > low).then_some((low, high))
}

fn stretch_table(low: u8, high: u8) -> [u8; 256] {
    let span = (high - low) as f64;
    let mut table = [0u8; 256];
    for (v, out) in table.iter_mut().enumerate() {
        *out = if v <= low as usize {
            0
        } else if v >= high as usize {
            255
        } else {
            ((v - low as usize) as f64 * 255.0 / span).round() as u8
        };
    }
    table
}

/// Stretch luminance so the 1st and 99th percentiles span the full range.
/// The same mapping is applied to every colour channel; alpha and the
/// 8-bit colour type are kept.
pub fn stretch_contrast(image: &DynamicImage) -> DynamicImage {
    let Some((low, high)) = clip_levels(&image.to_luma8()) else {
        return image.clone();
    };
    debug!(low, high, "Stretching contrast");
    let table = stretch_table(low, high);

    match image {
        DynamicImage::ImageLuma8(gray) => {
            let mut out = gray.clone();
            out.pixels_mut().for_each(|p| p[0] = table[p[0] as usize]);
            DynamicImage::ImageLuma8(out)
        }
        DynamicImage::ImageLumaA8(gray) => {
            let mut out = gray.clone();
            out.pixels_mut().for_each(|p| p[0] = table[p[0] as usize]);
            DynamicImage::ImageLumaA8(out)
        }
        _ if image.color().has_alpha() => {
            let mut out = image.to_rgba8();
            for p in out.pixels_mut() {
                for c in 0..3 {
                    p[c] = table[p[c] as usize];
                }
            }
            DynamicImage::ImageRgba8(out)
        }
        _ => {
            let mut out = image.to_rgb8();
            for p in out.pixels_mut() {
                for c in 0..3 {
                    p[c] = table[p[c] as usize];
                }
            }
            DynamicImage::ImageRgb8(out)
        }
    }
}

/// Black-and-white rendition: contrast-stretched gray, then a local-mean
/// threshold so uneven lighting does not swallow the text.
pub fn scan_look(image: &DynamicImage) -> GrayImage {
    let mut gray = image.to_luma8();
    if let Some((low, high)) = clip_levels(&gray) {
        let table = stretch_table(low, high);
        gray.pixels_mut().for_each(|p| p[0] = table[p[0] as usize]);
    }

    let (width, height) = gray.dimensions();
    let radius = (width.min(height) / 40).max(1);
    let table = SummedArea::new(&gray);
    debug!(radius, offset = INK_OFFSET, "Adaptive threshold");

    GrayImage::from_fn(width, height, |x, y| {
        let mean = table.mean_around(x, y, radius);
        let threshold = (mean.round() as i32 - INK_OFFSET).clamp(0, 255);
        if (gray.get_pixel(x, y)[0] as i32) < threshold {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    })
}

/// Summed-area table with a zero row and column in front.
struct SummedArea {
    sums: Vec<u64>,
    width: u32,
    height: u32,
}

impl SummedArea {
    fn new(gray: &GrayImage) -> Self {
        let (width, height) = gray.dimensions();
        let stride = width as usize + 1;
        let mut sums = vec![0u64; stride * (height as usize + 1)];
        for y in 0..height as usize {
            let mut row = 0u64;
            for x in 0..width as usize {
                row += gray.get_pixel(x as u32, y as u32)[0] as u64;
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row;
            }
        }
        Self {
            sums,
            width,
            height,
        }
    }

    /// Mean of the square window of `radius` around (x, y), clipped to the image.
    fn mean_around(&self, x: u32, y: u32, radius: u32) -> f64 {
        let stride = self.width as usize + 1;
        let x0 = x.saturating_sub(radius) as usize;
        let y0 = y.saturating_sub(radius) as usize;
        let x1 = (x.saturating_add(radius) as usize + 1).min(self.width as usize);
        let y1 = (y.saturating_add(radius) as usize + 1).min(self.height as usize);

        let area = ((x1 - x0) * (y1 - y0)) as f64;
        let sum = self.sums[y1 * stride + x1] + self.sums[y0 * stride + x0]
            - self.sums[y0 * stride + x1]
            - self.sums[y1 * stride + x0];
        sum as f64 / area
    }
}
