pub mod batch;
pub mod calibration;
pub mod cli;
pub mod config;
pub mod detection;
pub mod enhance;
pub mod error;
pub mod export;
pub mod geometry;
pub mod pipeline;
pub mod preprocess;
pub mod resolve;
pub mod transform;

pub use batch::{process_directory, BatchReport};
pub use calibration::Calibration;
pub use cli::{Cli, Corners};
pub use config::{DetectorKind, EnhanceStyle, Interpolation, PipelineConfig};
pub use detection::{ContourDetector, DetectionPass, QuadDetector, ThresholdDetector};
pub use error::{Result, ScanError};
pub use export::{annotate, output_path_for, save_image, OutputFormat};
pub use geometry::{Homography, Point, Quadrilateral};
pub use pipeline::{scan_document, DocumentScanner, ScanOutput};
pub use resolve::ResolvedGeometry;
