//! YOLO / COCO / Pascal VOC dataset converter
//!
//! This library holds a format-agnostic dataset model and converts it to and from YOLO label
//! files, COCO JSON and Pascal VOC XML, with optional train/val/test partitioning on export.

pub mod coco;
pub mod coco_dataset;
pub mod config;
pub mod conversion;
pub mod dataset;
pub mod error;
pub mod export;
pub mod import;
pub mod io;
pub mod report;
pub mod split;
pub mod types;
pub mod utils;
pub mod voc;
pub mod voc_dataset;
pub mod yolo_dataset;

// Re-export commonly used types and functions
pub use config::{Args, ExportOptions, Format, ImportOptions};
pub use conversion::{Decode, DecodeInput, Encode};
pub use dataset::{ClassMap, Dataset, DatasetStats, ValidationReport};
pub use error::{ExportError, ImportError, ModelError, ValidationError};
pub use export::export_dataset;
pub use import::{import_dataset_config, import_from_local};
pub use split::{split_dataset, SplitRatio, Subset};
pub use types::{Annotation, AnnotationKind, BoundingBox, Image, ImageSource, Location};

// Format-specific exports
pub use coco_dataset::CocoFormat;
pub use voc_dataset::VocFormat;
pub use yolo_dataset::YoloFormat;
