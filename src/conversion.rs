//! Shared encoder/decoder interface and dispatch over [`Format`].

use std::path::{Path, PathBuf};

use crate::coco_dataset::CocoFormat;
use crate::config::{ExportOptions, Format};
use crate::dataset::{ClassMap, Dataset};
use crate::error::{ExportError, ImportError};
use crate::io::{read_image_info, ImageInfoMap, IMAGE_INFO_FILE};
use crate::types::Image;
use crate::voc_dataset::VocFormat;
use crate::yolo_dataset::YoloFormat;

/// Writes a dataset into a format-specific directory tree.
pub trait Encode {
    /// Encode `dataset` under `output_dir`, returning the directory written.
    fn encode(
        &self,
        dataset: &Dataset,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError>;
}

/// Inputs for reading a dataset back.
#[derive(Debug, Clone, Copy)]
pub struct DecodeInput<'a> {
    pub images_dir: &'a Path,
    /// Labels directory (YOLO/VOC) or the annotation file or its directory (COCO).
    pub labels: &'a Path,
    pub classes: &'a ClassMap,
    pub image_info: &'a ImageInfoMap,
}

/// Reads a format-specific tree back into a [`Dataset`].
pub trait Decode {
    fn decode(&self, input: &DecodeInput<'_>) -> Result<Dataset, ImportError>;

    /// Where annotations live relative to the root holding `images/`.
    fn default_labels(&self, root: &Path) -> PathBuf;
}

impl Format {
    pub fn encoder(self) -> &'static dyn Encode {
        match self {
            Format::Yolo => &YoloFormat,
            Format::Coco => &CocoFormat,
            Format::Voc => &VocFormat,
        }
    }

    pub fn decoder(self) -> &'static dyn Decode {
        match self {
            Format::Yolo => &YoloFormat,
            Format::Coco => &CocoFormat,
            Format::Voc => &VocFormat,
        }
    }

    pub fn encode(
        self,
        dataset: &Dataset,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        self.encoder().encode(dataset, output_dir, options)
    }

    /// Decode with provenance read from `image_info.json` beside `images_dir`, if present.
    pub fn decode(
        self,
        images_dir: &Path,
        labels: &Path,
        classes: &ClassMap,
    ) -> Result<Dataset, ImportError> {
        let image_info = sibling_image_info(images_dir)?;
        self.decoder().decode(&DecodeInput {
            images_dir,
            labels,
            classes,
            image_info: &image_info,
        })
    }
}

/// Load `image_info.json` from the parent of `images_dir`; empty when absent.
pub fn sibling_image_info(images_dir: &Path) -> Result<ImageInfoMap, ImportError> {
    match images_dir.parent().map(|parent| parent.join(IMAGE_INFO_FILE)) {
        Some(path) if path.is_file() => {
            let info = read_image_info(&path)?;
            log::info!("Loaded image provenance from {}", path.display());
            Ok(info)
        }
        _ => Ok(ImageInfoMap::new()),
    }
}

/// Stem of the file an image was read from; label files are matched on it.
pub(crate) fn source_stem(image: &Image) -> String {
    image
        .location
        .local_path()
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.file_stem())
}

/// File name an image was read from.
pub(crate) fn source_file_name(image: &Image) -> String {
    image
        .location
        .local_path()
        .and_then(|path| path.file_name())
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| image.file_name())
}

/// Wrap decoded images in a dataset named after the directory that holds `images_dir`.
pub(crate) fn decoded_dataset(images_dir: &Path, classes: ClassMap, images: Vec<Image>) -> Dataset {
    let root = images_dir.parent().unwrap_or(images_dir);
    let name = root
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "imported".to_string());
    let mut dataset = Dataset::new(name, classes);
    dataset.path = Some(root.to_path_buf());
    dataset.images = images;
    dataset
}
