use clap::{Parser, ValueEnum};
use std::path::{Path, PathBuf};

use crate::config::{DetectorKind, EnhanceStyle, Interpolation, PipelineConfig};
use crate::export::{OutputFormat, DEFAULT_JPEG_QUALITY};
use crate::geometry::Point;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FormatArg {
    Jpeg,
    Png,
}

#[derive(Parser, Debug)]
#[command(name = "contents-only")]
#[command(version, about = "Find the document in a photo and flatten it into a clean scan")]
pub struct Cli {
    /// Input image, or a directory of JPEG/PNG images for batch mode
    #[arg(required = true)]
    pub input: PathBuf,

    /// Output file (single image) or directory (batch)
    /// [default: <input>_scan.<ext> / <input>/scanned]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// JSON pipeline configuration (camelCase keys)
    #[arg(long)]
    pub config: Option<PathBuf>,

    #[arg(long, value_enum)]
    pub detector: Option<DetectorKind>,

    /// Longest side of the detection working copy
    #[arg(long)]
    pub max_working_dimension: Option<u32>,

    /// Smallest document area as a fraction of the photo
    #[arg(long)]
    pub min_area_fraction: Option<f64>,

    /// Contour simplification tolerance (fraction of perimeter)
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// White border around the result, in pixels
    #[arg(long)]
    pub margin: Option<u32>,

    /// Catmull-Rom resampling instead of bilinear
    #[arg(long)]
    pub bicubic: bool,

    /// Post-process the result
    #[arg(long, value_enum)]
    pub enhance: Option<EnhanceStyle>,

    #[arg(long, value_enum, default_value = "jpeg")]
    pub format: FormatArg,

    /// JPEG quality (1-100)
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    pub quality: u8,

    /// Skip detection and use these corners: "x,y x,y x,y x,y"
    #[arg(long, value_parser = parse_corners, allow_hyphen_values = true)]
    pub corners: Option<Corners>,

    /// Calibration JSON: narrows detection and supplies fallback corners
    #[arg(long)]
    pub calibration: Option<PathBuf>,

    /// Learn a calibration from this image and --corners, and write it here
    #[arg(long, requires = "corners")]
    pub save_calibration: Option<PathBuf>,

    /// Also write the input with the detected outline drawn on it
    #[arg(long)]
    pub annotate: Option<PathBuf>,

    /// Debug-level logging (overridden by RUST_LOG)
    #[arg(short, long)]
    pub verbose: bool,
}

/// Four manually placed corners, in any order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Corners(pub [Point; 4]);

impl ValueEnum for DetectorKind {
    fn value_variants<'a>() -> &'a [Self] {
        &[DetectorKind::Edges, DetectorKind::Threshold]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            DetectorKind::Edges => clap::builder::PossibleValue::new("edges"),
            DetectorKind::Threshold => clap::builder::PossibleValue::new("threshold"),
        })
    }
}

impl ValueEnum for EnhanceStyle {
    fn value_variants<'a>() -> &'a [Self] {
        &[EnhanceStyle::Contrast, EnhanceStyle::Scan]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            EnhanceStyle::Contrast => clap::builder::PossibleValue::new("contrast"),
            EnhanceStyle::Scan => clap::builder::PossibleValue::new("scan"),
        })
    }
}

impl Cli {
    /// Layer command-line overrides on top of `config`.
    pub fn apply_to(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(detector) = self.detector {
            config.detector = detector;
        }
        if let Some(dim) = self.max_working_dimension {
            config.max_working_dimension = dim;
        }
        if let Some(fraction) = self.min_area_fraction {
            config.min_document_area_fraction = fraction;
        }
        if let Some(tolerance) = self.tolerance {
            config.simplification_tolerance_factor = tolerance;
        }
        if let Some(margin) = self.margin {
            config.margin = margin;
        }
        if self.bicubic {
            config.interpolation = Interpolation::Bicubic;
        }
        if let Some(style) = self.enhance {
            config.enhance_post_processing = true;
            config.enhancement = style;
        }
        config
    }

    pub fn output_format(&self) -> OutputFormat {
        match self.format {
            FormatArg::Jpeg => OutputFormat::Jpeg {
                quality: self.quality,
            },
            FormatArg::Png => OutputFormat::Png,
        }
    }

    /// Output file for single-image mode.
    pub fn output_path(&self) -> PathBuf {
        self.output.clone().unwrap_or_else(|| {
            let stem = self.input.file_stem().unwrap_or_default().to_string_lossy();
            let parent = self.input.parent().unwrap_or(Path::new("."));
            parent.join(format!("{}_scan.{}", stem, self.output_format().extension()))
        })
    }

    /// Output directory for batch mode.
    pub fn output_dir(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.join("scanned"))
    }
}

fn parse_corners(s: &str) -> Result<Corners, String> {
    let points: Vec<&str> = s.split_whitespace().collect();
    if points.len() != 4 {
        return Err(format!(
            "Expected 4 corners \"x,y x,y x,y x,y\", got {}",
            points.len()
        ));
    }

    let mut corners = [Point::origin(); 4];
    for (slot, text) in corners.iter_mut().zip(points) {
        let (x, y) = text
            .split_once(',')
            .ok_or_else(|| format!("Invalid corner '{}', expected x,y", text))?;
        let x: f64 = x
            .trim()
            .parse()
            .map_err(|_| format!("Invalid x coordinate: {}", x))?;
        let y: f64 = y
            .trim()
            .parse()
            .map_err(|_| format!("Invalid y coordinate: {}", y))?;
        if !x.is_finite() || !y.is_finite() {
            return Err(format!("Corner '{}' is not finite", text));
        }
        *slot = Point::new(x, y);
    }

    Ok(Corners(corners))
}
