use image::{DynamicImage, ImageBuffer, Pixel};
use tracing::{debug, instrument};

use crate::config::Interpolation;
use crate::geometry::{transform_point, Homography};
use crate::resolve::ResolvedGeometry;

/// Value written where the inverse mapping lands outside the source.
const FILL: u8 = u8::MAX;

/// Cubic interpolation kernel (Catmull-Rom)
fn cubic_weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;

    [
        -0.5 * t3 + t2 - 0.5 * t,
        1.5 * t3 - 2.5 * t2 + 1.0,
        -1.5 * t3 + 2.0 * t2 + 0.5 * t,
        0.5 * t3 - 0.5 * t2,
    ]
}

/// Interleaved 8-bit samples with edge clamping.
struct Source<'a> {
    data: &'a [u8],
    width: u32,
    height: u32,
    channels: usize,
}

impl Source<'_> {
    fn at(&self, x: i64, y: i64, c: usize) -> f64 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.data[(y * self.width as usize + x) * self.channels + c] as f64
    }

    fn contains(&self, x: f64, y: f64) -> bool {
        x >= -0.5 && y >= -0.5 && x <= self.width as f64 - 0.5 && y <= self.height as f64 - 0.5
    }

    fn bilinear(&self, x: f64, y: f64, out: &mut [f64]) {
        let x0 = x.floor();
        let y0 = y.floor();
        let fx = x - x0;
        let fy = y - y0;
        let (x0, y0) = (x0 as i64, y0 as i64);

        for (c, value) in out.iter_mut().enumerate() {
            let top = self.at(x0, y0, c) * (1.0 - fx) + self.at(x0 + 1, y0, c) * fx;
            let bottom = self.at(x0, y0 + 1, c) * (1.0 - fx) + self.at(x0 + 1, y0 + 1, c) * fx;
            *value = top * (1.0 - fy) + bottom * fy;
        }
    }

    fn bicubic(&self, x: f64, y: f64, out: &mut [f64]) {
        let x0 = x.floor();
        let y0 = y.floor();
        let wx = cubic_weights(x - x0);
        let wy = cubic_weights(y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        for (c, value) in out.iter_mut().enumerate() {
            let mut sum = 0.0;
            for (j, wy) in wy.iter().enumerate() {
                for (i, wx) in wx.iter().enumerate() {
                    sum += self.at(x0 + i as i64 - 1, y0 + j as i64 - 1, c) * wx * wy;
                }
            }
            *value = sum;
        }
    }
}

/// Resample `src` onto a `width` x `height` canvas through `transform`
/// (source -> canvas) using inverse mapping. The outer `margin` pixels and
/// any pixel whose preimage falls outside the source stay white.
pub fn warp_perspective<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    transform: &Homography,
    width: u32,
    height: u32,
    margin: u32,
    interpolation: Interpolation,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8>,
{
    let channels = P::CHANNEL_COUNT as usize;
    let white = [FILL; 4];
    let mut output = ImageBuffer::from_pixel(width, height, *P::from_slice(&white[..channels]));
    if width == 0 || height == 0 || src.width() == 0 || src.height() == 0 {
        return output;
    }

    let source = Source {
        data: src.as_raw(),
        width: src.width(),
        height: src.height(),
        channels,
    };
    let inverse = transform.inverse_matrix();
    let row_len = width as usize * channels;
    let margin = margin as usize;
    let content_x = margin..(width as usize).saturating_sub(margin);
    let content_y = margin..(height as usize).saturating_sub(margin);

    let mut sample = [0.0f64; 4];
    for (out_y, row) in output.chunks_mut(row_len).enumerate() {
        if !content_y.contains(&out_y) {
            continue;
        }
        for (out_x, pixel) in row.chunks_mut(channels).enumerate() {
            if !content_x.contains(&out_x) {
                continue;
            }
            let Some((sx, sy)) = transform_point(inverse, out_x as f64, out_y as f64) else {
                continue;
            };
            if !source.contains(sx, sy) {
                continue;
            }
            let sample = &mut sample[..channels];
            match interpolation {
                Interpolation::Bilinear => source.bilinear(sx, sy, sample),
                Interpolation::Bicubic => source.bicubic(sx, sy, sample),
            }
            for (dst, value) in pixel.iter_mut().zip(sample.iter()) {
                *dst = value.round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    output
}

/// Produce the rectified document. Gray and RGB inputs keep their channel
/// layout; anything else is resampled as RGBA.
#[instrument(skip_all, fields(width = geometry.width, height = geometry.height))]
pub fn rectify(
    image: &DynamicImage,
    geometry: &ResolvedGeometry,
    interpolation: Interpolation,
) -> DynamicImage {
    let (width, height) = geometry.canvas_size();
    let margin = geometry.margin;
    let transform = &geometry.transform;
    debug!(?interpolation, width, height, "Warping perspective");

    match image {
        DynamicImage::ImageLuma8(buf) => DynamicImage::ImageLuma8(warp_perspective(
            buf,
            transform,
            width,
            height,
            margin,
            interpolation,
        )),
        DynamicImage::ImageLumaA8(buf) => DynamicImage::ImageLumaA8(warp_perspective(
            buf,
            transform,
            width,
            height,
            margin,
            interpolation,
        )),
        DynamicImage::ImageRgb8(buf) => DynamicImage::ImageRgb8(warp_perspective(
            buf,
            transform,
            width,
            height,
            margin,
            interpolation,
        )),
        DynamicImage::ImageRgba8(buf) => DynamicImage::ImageRgba8(warp_perspective(
            buf,
            transform,
            width,
            height,
            margin,
            interpolation,
        )),
        other => DynamicImage::ImageRgba8(warp_perspective(
            &other.to_rgba8(),
            transform,
            width,
            height,
            margin,
            interpolation,
        )),
    }
}
