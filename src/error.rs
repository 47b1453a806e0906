//! Error types for the dataset model and the format converters.

use std::path::PathBuf;

/// Rejected values when building model objects.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("confidence must lie in [0, 1], got {0}")]
    Confidence(f64),

    #[error("image dimensions must be positive, got {width}x{height}")]
    Dimensions { width: u32, height: u32 },
}

/// Failures while writing a dataset in one of the supported layouts.
#[derive(Debug, thiserror::Error)]
pub enum ExportError {
    #[error("cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML serialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML serialization failed: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("archive creation failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("CSV report failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("{format} export failed: {message}")]
    Format {
        format: &'static str,
        message: String,
    },
}

/// Failures while reading a dataset back from disk.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("input directory does not exist: {0}")]
    MissingInput(PathBuf),

    #[error("required file is missing: {0}")]
    MissingSidecar(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML parsing failed: {0}")]
    Xml(#[from] quick_xml::DeError),
}

/// A single dataset invariant violation found by [`crate::dataset::Dataset::validate`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("annotations reference undefined classes: {0:?}")]
    UndefinedClasses(Vec<u32>),

    #[error("image file is missing: {0}")]
    MissingImage(PathBuf),

    #[error("invalid bounding box in image {image_id}: {reason}")]
    InvalidBox {
        image_id: String,
        reason: &'static str,
    },
}
