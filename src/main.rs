use anyhow::{bail, Context, Result};
use clap::Parser;
use image::ImageReader;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use contents_only::{
    annotate, process_directory, save_image, Calibration, Cli, Corners, DocumentScanner,
    PipelineConfig,
};

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let base = match &cli.config {
        Some(path) => PipelineConfig::from_json_file(path)?,
        None => PipelineConfig::default(),
    };
    let mut config = cli.apply_to(base);
    if let Some(path) = &cli.calibration {
        config.calibration = Some(Calibration::from_json_file(path)?);
        info!(path = ?path, "Loaded calibration");
    }
    let scanner = DocumentScanner::new(config)?;

    if cli.input.is_dir() {
        run_batch(&cli, &scanner)
    } else {
        run_single(&cli, &scanner)
    }
}

fn run_single(cli: &Cli, scanner: &DocumentScanner) -> Result<()> {
    let img = ImageReader::open(&cli.input)
        .with_context(|| format!("Failed to open input file: {:?}", cli.input))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read input file: {:?}", cli.input))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", cli.input))?;
    info!(input = ?cli.input, width = img.width(), height = img.height(), "Loaded image");

    if let (Some(path), Some(Corners(corners))) = (&cli.save_calibration, cli.corners) {
        let calibration = Calibration::from_sample(&img, corners)?;
        let json = serde_json::to_string_pretty(&calibration)
            .context("Failed to serialize calibration")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write calibration: {:?}", path))?;
        info!(path = ?path, "Saved calibration");
    }

    let result = match cli.corners {
        Some(Corners(corners)) => scanner.rectify_with_corners(&img, corners),
        None => scanner.scan(&img),
    };
    let output = match result {
        Ok(output) => output,
        Err(err) => {
            error!("{}", err.hint());
            return Err(err).context("Failed to rectify document");
        }
    };

    if let Some(path) = &cli.annotate {
        annotate(&img, &output.quad)
            .save(path)
            .with_context(|| format!("Failed to save annotated image: {:?}", path))?;
        info!(path = ?path, "Saved annotated input");
    }

    let output_path = cli.output_path();
    save_image(&output.image, &output_path, cli.output_format())?;

    let [tl, tr, br, bl] = *output.quad.corners();
    info!(
        "Corners: ({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1}) ({:.1}, {:.1})",
        tl.x, tl.y, tr.x, tr.y, br.x, br.y, bl.x, bl.y
    );
    info!(
        "Saved {:?} ({}x{} -> {}x{})",
        output_path,
        img.width(),
        img.height(),
        output.width,
        output.height
    );
    Ok(())
}

fn run_batch(cli: &Cli, scanner: &DocumentScanner) -> Result<()> {
    if cli.corners.is_some() || cli.annotate.is_some() || cli.save_calibration.is_some() {
        warn!("--corners, --annotate and --save-calibration apply to single images only; ignoring");
    }

    let output_dir = cli.output_dir();
    let report = process_directory(scanner, &cli.input, &output_dir, cli.output_format())?;

    for (path, message) in &report.failed {
        warn!("{:?}: {}", path, message);
    }
    info!(
        "Processed {}/{} images into {:?}",
        report.processed, report.total, output_dir
    );

    if report.all_failed() {
        bail!("All {} images failed", report.total);
    }
    Ok(())
}
