use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use tracing::debug;

use crate::geometry::Quadrilateral;

pub const DEFAULT_JPEG_QUALITY: u8 = 95;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg { quality: u8 },
    Png,
}

impl Default for OutputFormat {
    fn default() -> Self {
        OutputFormat::Jpeg {
            quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Jpeg { .. } => "jpg",
            OutputFormat::Png => "png",
        }
    }
}

/// `<dir>/<input stem>.<format extension>`
pub fn output_path_for(input: &Path, dir: &Path, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    dir.join(format!("{}.{}", stem, format.extension()))
}

/// `<dir>/<input stem>_<input extension>.<format extension>`, for inputs
/// whose stem is shared with another file.
pub fn disambiguated_output_path(input: &Path, dir: &Path, format: OutputFormat) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    match input.extension() {
        Some(ext) => dir.join(format!(
            "{}_{}.{}",
            stem,
            ext.to_string_lossy(),
            format.extension()
        )),
        None => output_path_for(input, dir, format),
    }
}

/// Write `image` to `path`. JPEG drops any alpha channel.
pub fn save_image(image: &DynamicImage, path: &Path, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jpeg { quality } => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {:?}", path))?;
            let encoder =
                JpegEncoder::new_with_quality(BufWriter::new(file), quality.clamp(1, 100));
            let opaque = match image {
                DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => image.clone(),
                _ if image.color().has_color() => DynamicImage::ImageRgb8(image.to_rgb8()),
                _ => DynamicImage::ImageLuma8(image.to_luma8()),
            };
            opaque
                .write_with_encoder(encoder)
                .with_context(|| format!("Failed to encode JPEG: {:?}", path))?;
        }
        OutputFormat::Png => image
            .save_with_format(path, ImageFormat::Png)
            .with_context(|| format!("Failed to save PNG: {:?}", path))?,
    }
    debug!(?path, ?format, "Saved image");
    Ok(())
}

/// Copy of `image` with the detected outline and corner markers drawn on it.
pub fn annotate(image: &DynamicImage, quad: &Quadrilateral) -> RgbImage {
    const OUTLINE: Rgb<u8> = Rgb([0, 200, 255]);
    const CORNER: Rgb<u8> = Rgb([255, 60, 0]);

    let mut canvas = image.to_rgb8();
    let corners = quad.corners();
    let thickness = (canvas.width().max(canvas.height()) / 400).max(1) as i32;

    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        for offset in -thickness..=thickness {
            let d = offset as f32;
            draw_line_segment_mut(
                &mut canvas,
                (a.x as f32 + d, a.y as f32),
                (b.x as f32 + d, b.y as f32),
                OUTLINE,
            );
            draw_line_segment_mut(
                &mut canvas,
                (a.x as f32, a.y as f32 + d),
                (b.x as f32, b.y as f32 + d),
                OUTLINE,
            );
        }
    }

    let size = (thickness * 4 + 1) as u32;
    for p in corners {
        let x = p.x.round() as i32 - thickness * 2;
        let y = p.y.round() as i32 - thickness * 2;
        draw_filled_rect_mut(&mut canvas, Rect::at(x, y).of_size(size, size), CORNER);
    }

    canvas
}
