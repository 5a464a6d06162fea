use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::ImageReader;
use rayon::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::export::{disambiguated_output_path, output_path_for, save_image, OutputFormat};
use crate::pipeline::DocumentScanner;
use crate::preprocess::ensure_valid;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Outcome of a directory run. Failures keep their path and message.
#[derive(Debug, Default)]
pub struct BatchReport {
    pub total: usize,
    pub processed: usize,
    pub failed: Vec<(PathBuf, String)>,
}

impl BatchReport {
    pub fn all_failed(&self) -> bool {
        self.total > 0 && self.processed == 0
    }
}

/// JPEG and PNG files directly inside `dir`, sorted by path.
pub fn collect_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries =
        std::fs::read_dir(dir).with_context(|| format!("Failed to read directory: {:?}", dir))?;

    let mut images = Vec::new();
    for entry in entries {
        let path = entry
            .with_context(|| format!("Failed to list directory: {:?}", dir))?
            .path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_image {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// One output path per input. Inputs sharing a stem (compared
/// case-insensitively) keep their source extension in the name so no two
/// results land on the same file.
pub fn output_targets(
    inputs: &[PathBuf],
    output_dir: &Path,
    format: OutputFormat,
) -> Vec<PathBuf> {
    let stem_key = |path: &Path| {
        path.file_stem()
            .unwrap_or_default()
            .to_string_lossy()
            .to_lowercase()
    };
    let mut stems: HashMap<String, usize> = HashMap::new();
    for input in inputs {
        *stems.entry(stem_key(input)).or_default() += 1;
    }

    inputs
        .iter()
        .map(|input| {
            if stems.get(&stem_key(input)).copied().unwrap_or(0) > 1 {
                disambiguated_output_path(input, output_dir, format)
            } else {
                output_path_for(input, output_dir, format)
            }
        })
        .collect()
}

#[instrument(skip_all, fields(input = ?input))]
fn process_one(
    scanner: &DocumentScanner,
    input: &Path,
    target: &Path,
    format: OutputFormat,
) -> Result<()> {
    let img = ImageReader::open(input)
        .with_context(|| format!("Failed to open input file: {:?}", input))?
        .with_guessed_format()
        .with_context(|| format!("Failed to read input file: {:?}", input))?
        .decode()
        .with_context(|| format!("Failed to decode image: {:?}", input))?;
    ensure_valid(&img)?;

    let output = scanner.scan(&img)?;
    save_image(&output.image, target, format)
}

/// Scan every image in `input_dir` in parallel and write results to
/// `output_dir`. A failing file never aborts the rest.
#[instrument(skip(scanner))]
pub fn process_directory(
    scanner: &DocumentScanner,
    input_dir: &Path,
    output_dir: &Path,
    format: OutputFormat,
) -> Result<BatchReport> {
    let inputs = collect_images(input_dir)?;
    std::fs::create_dir_all(output_dir)
        .with_context(|| format!("Failed to create output directory: {:?}", output_dir))?;
    info!(count = inputs.len(), "Processing directory");

    let targets = output_targets(&inputs, output_dir, format);
    let results: Vec<(PathBuf, Result<PathBuf>)> = inputs
        .into_par_iter()
        .zip(targets)
        .map(|(input, target)| {
            let result = process_one(scanner, &input, &target, format).map(|()| target);
            (input, result)
        })
        .collect();

    let mut report = BatchReport {
        total: results.len(),
        ..Default::default()
    };
    for (input, result) in results {
        match result {
            Ok(target) => {
                debug!(?input, ?target, "Processed");
                report.processed += 1;
            }
            Err(err) => {
                let message = format!("{:#}", err);
                warn!(?input, error = %message, "Failed");
                report.failed.push((input, message));
            }
        }
    }

    info!(
        processed = report.processed,
        failed = report.failed.len(),
        "Directory done"
    );
    Ok(report)
}
