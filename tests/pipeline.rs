use std::io::Cursor;

use contents_only::geometry::polygon_signed_area;
use contents_only::{
    scan_document, DocumentScanner, PipelineConfig, Point, ScanError, ScanOutput,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point as PixelPoint;
use imageproc::rect::Rect;

/// White 600x400 sheet at (200,300)-(800,700) on a black 1000x1000 frame.
fn sheet_on_black() -> DynamicImage {
    let mut img = RgbImage::from_pixel(1000, 1000, Rgb([0, 0, 0]));
    draw_filled_rect_mut(&mut img, Rect::at(200, 300).of_size(600, 400), Rgb([255, 255, 255]));
    DynamicImage::ImageRgb8(img)
}

fn polygon_on_dark(width: u32, height: u32, corners: &[(f64, f64)]) -> DynamicImage {
    let mut img = RgbImage::from_pixel(width, height, Rgb([35, 30, 30]));
    let poly: Vec<PixelPoint<i32>> = corners
        .iter()
        .map(|&(x, y)| PixelPoint::new(x.round() as i32, y.round() as i32))
        .collect();
    draw_polygon_mut(&mut img, &poly, Rgb([245, 245, 240]));
    DynamicImage::ImageRgb8(img)
}

/// Mean luminance and minimum of the output after dropping `inset` pixels per side.
fn interior_stats(output: &ScanOutput, inset: u32) -> (f64, u8) {
    let gray = output.image.to_luma8();
    let (w, h) = gray.dimensions();
    let mut sum = 0u64;
    let mut count = 0u64;
    let mut min = u8::MAX;
    for y in inset..h - inset {
        for x in inset..w - inset {
            let v = gray.get_pixel(x, y)[0];
            sum += v as u64;
            count += 1;
            min = min.min(v);
        }
    }
    (sum as f64 / count as f64, min)
}

fn within(actual: f64, expected: f64, tolerance: f64) -> bool {
    (actual - expected).abs() <= expected * tolerance
}

#[test]
fn sheet_is_extracted_at_its_own_size() {
    let output = scan_document(&sheet_on_black(), &PipelineConfig::default()).unwrap();

    assert!(within(output.width as f64, 600.0, 0.03), "width {}", output.width);
    assert!(within(output.height as f64, 400.0, 0.03), "height {}", output.height);

    let tl = output.quad.top_left();
    let br = output.quad.bottom_right();
    assert!((tl - Point::new(200.0, 300.0)).norm() < 6.0, "top-left {:?}", tl);
    assert!((br - Point::new(799.0, 699.0)).norm() < 6.0, "bottom-right {:?}", br);

    let (mean, min) = interior_stats(&output, 6);
    assert!(mean >= 250.0, "mean {}", mean);
    assert!(min >= 200, "min {}", min);
}

#[test]
fn rotated_sheet_keeps_aspect_ratio() {
    let (cx, cy) = (450.0, 400.0);
    let (hw, hh) = (225.0, 150.0);
    let (s, c) = 10f64.to_radians().sin_cos();
    let corners: Vec<(f64, f64)> = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)]
        .iter()
        .map(|&(x, y)| (cx + x * c - y * s, cy + x * s + y * c))
        .collect();
    let img = polygon_on_dark(900, 800, &corners);

    let output = scan_document(&img, &PipelineConfig::default()).unwrap();

    // Width stays the long side, so the corners came out in reading order.
    let ratio = output.width as f64 / output.height as f64;
    assert!(within(ratio, 1.5, 0.03), "ratio {} ({}x{})", ratio, output.width, output.height);
    assert!(polygon_signed_area(output.quad.corners()) > 0.0);

    let (mean, _) = interior_stats(&output, 8);
    assert!(mean >= 235.0, "mean {}", mean);
}

#[test]
fn keystoned_page_is_flattened() {
    let corners = [(250.0, 200.0), (750.0, 200.0), (850.0, 800.0), (150.0, 800.0)];
    let img = polygon_on_dark(1000, 1000, &corners);

    let output = scan_document(&img, &PipelineConfig::default()).unwrap();

    // Widest edge is the bottom (700px); sides are ~608px.
    assert!(within(output.width as f64, 700.0, 0.03), "width {}", output.width);
    assert!(within(output.height as f64, 608.0, 0.03), "height {}", output.height);
    let (mean, _) = interior_stats(&output, 10);
    assert!(mean >= 235.0, "mean {}", mean);
}

#[test]
fn repeated_runs_are_identical() {
    let img = sheet_on_black();
    let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
    let first = scanner.scan(&img).unwrap();
    let second = scanner.scan(&img).unwrap();

    assert_eq!(first.quad, second.quad);
    assert_eq!(first.image.as_bytes(), second.image.as_bytes());
}

#[test]
fn uniform_frames_have_no_document() {
    for value in [0u8, 255u8] {
        let img = DynamicImage::ImageLuma8(GrayImage::from_pixel(640, 480, Luma([value])));
        let err = scan_document(&img, &PipelineConfig::default()).unwrap_err();
        assert!(
            matches!(err, ScanError::NoDocumentFound { .. }),
            "value {}: {:?}",
            value,
            err
        );
        assert!(err.is_detection_failure());
    }
}

#[test]
fn empty_bytes_are_invalid() {
    let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
    let err = scanner.scan_bytes(&[]).unwrap_err();
    assert!(matches!(err, ScanError::InvalidImage(_)));
}

#[test]
fn encoded_bytes_scan_like_decoded_image() {
    let img = sheet_on_black();
    let mut bytes = Vec::new();
    img.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();

    let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
    let from_bytes = scanner.scan_bytes(&bytes).unwrap();
    let direct = scanner.scan(&img).unwrap();
    assert_eq!(from_bytes.quad, direct.quad);
    assert_eq!((from_bytes.width, from_bytes.height), (direct.width, direct.height));
}

#[test]
fn full_frame_corners_return_the_input() {
    let img = RgbImage::from_fn(120, 90, |x, y| {
        Rgb([((x * 7 + y * 13) % 256) as u8, (x * 2) as u8, (255 - y) as u8])
    });
    let scanner = DocumentScanner::new(PipelineConfig::default()).unwrap();
    let output = scanner
        .rectify_with_corners(
            &DynamicImage::ImageRgb8(img.clone()),
            [
                Point::new(0.0, 89.0),
                Point::new(119.0, 0.0),
                Point::new(0.0, 0.0),
                Point::new(119.0, 89.0),
            ],
        )
        .unwrap();

    assert_eq!((output.width, output.height), (120, 90));
    assert_eq!(output.image.as_rgb8(), Some(&img));
}

#[test]
fn margin_surrounds_document_with_white() {
    let config = PipelineConfig {
        margin: 10,
        ..Default::default()
    };
    let output = scan_document(&sheet_on_black(), &config).unwrap();
    let plain = scan_document(&sheet_on_black(), &PipelineConfig::default()).unwrap();

    assert_eq!(output.width, plain.width + 20);
    assert_eq!(output.height, plain.height + 20);
    let rgb = output.image.as_rgb8().unwrap();
    assert_eq!(rgb.get_pixel(0, 0), &Rgb([255, 255, 255]));
    assert_eq!(rgb.get_pixel(output.width - 1, output.height / 2), &Rgb([255, 255, 255]));
}

#[test]
fn small_document_is_rejected_by_area_filter() {
    let mut img = RgbImage::from_pixel(800, 600, Rgb([0, 0, 0]));
    draw_filled_rect_mut(&mut img, Rect::at(300, 250).of_size(120, 80), Rgb([255, 255, 255]));
    let err = scan_document(&DynamicImage::ImageRgb8(img), &PipelineConfig::default())
        .unwrap_err();
    assert!(err.is_detection_failure(), "{:?}", err);
}
