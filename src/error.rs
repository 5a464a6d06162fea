use thiserror::Error;

/// Failure kinds surfaced by the scanning pipeline.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ScanError {
    /// Input could not be decoded or has zero dimensions.
    #[error("invalid image: {0}")]
    InvalidImage(String),

    /// No acceptable quadrilateral survived the strict and relaxed passes.
    #[error("no document found ({candidates} candidate(s) examined)")]
    NoDocumentFound { candidates: usize },

    /// The chosen quadrilateral cannot produce a usable transform.
    #[error("degenerate geometry: {0}")]
    DegenerateGeometry(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ScanError {
    /// True for the two kinds a caller handles the same way (offer manual
    /// cropping or ask for a retake).
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            ScanError::NoDocumentFound { .. } | ScanError::DegenerateGeometry(_)
        )
    }

    /// Short actionable message for the UI layer.
    pub fn hint(&self) -> &'static str {
        match self {
            ScanError::InvalidImage(_) => {
                "The file could not be read as an image. Try another photo."
            }
            ScanError::NoDocumentFound { .. } | ScanError::DegenerateGeometry(_) => {
                "No document detected. Try manual adjustment or retake the photo."
            }
            ScanError::InvalidConfig(_) => "Check the processing settings.",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;
