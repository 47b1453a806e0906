//! Import drivers: add a decoded image directory to a dataset, or rebuild a dataset from an
//! exported configuration file.

use log::{info, warn};
use std::path::Path;

use crate::config::ImportOptions;
use crate::conversion::{sibling_image_info, DecodeInput};
use crate::dataset::{ClassMap, Dataset};
use crate::error::ImportError;
use crate::io::{read_classes_txt, read_dataset_config, read_image_info, CLASSES_FILE};

/// Classes from `classes.txt` next to `images_dir`, or an empty map when there is none.
pub fn load_sibling_classes(images_dir: &Path) -> Result<ClassMap, ImportError> {
    let Some(path) = images_dir.parent().map(|root| root.join(CLASSES_FILE)) else {
        return Ok(ClassMap::new());
    };
    if !path.is_file() {
        return Ok(ClassMap::new());
    }
    let classes = read_classes_txt(&path)?;
    info!("Loaded {} classes from {}", classes.len(), path.display());
    Ok(classes)
}

fn log_validation(dataset: &Dataset) {
    let report = dataset.validate();
    for warning in &report.warnings {
        warn!("{}", warning);
    }
    if !report.is_valid() {
        for error in &report.errors {
            warn!("Dataset '{}' failed validation: {}", dataset.name, error);
        }
    }
}

/// Decode `images_dir` with its annotations and append the images to `dataset`.
///
/// Classes come from `dataset` or, when it has none, from a sibling `classes.txt`. The labels
/// location defaults to the format's usual place next to `images_dir`. Returns the number of
/// images added.
pub fn import_from_local(
    dataset: &mut Dataset,
    images_dir: &Path,
    options: &ImportOptions,
) -> Result<usize, ImportError> {
    if !images_dir.is_dir() {
        return Err(ImportError::MissingInput(images_dir.to_path_buf()));
    }
    let root = images_dir.parent().unwrap_or(images_dir);

    if dataset.classes.is_empty() {
        dataset.classes = load_sibling_classes(images_dir)?;
    }

    let decoder = options.format.decoder();
    let labels = options
        .labels
        .clone()
        .unwrap_or_else(|| decoder.default_labels(root));
    let image_info = match &options.image_info {
        Some(path) if path.is_file() => read_image_info(path)?,
        Some(path) => return Err(ImportError::MissingSidecar(path.clone())),
        None => sibling_image_info(images_dir)?,
    };

    info!(
        "Importing {} annotations from {} (images in {})",
        options.format,
        labels.display(),
        images_dir.display()
    );
    let decoded = decoder.decode(&DecodeInput {
        images_dir,
        labels: &labels,
        classes: &dataset.classes,
        image_info: &image_info,
    })?;

    if dataset.classes.is_empty() {
        dataset.classes = decoded.classes;
    }
    let added = decoded.images.len();
    for image in decoded.images {
        dataset.add_image(image);
    }
    if dataset.path.is_none() {
        dataset.path = Some(root.to_path_buf());
    }

    info!("Imported {} images into dataset '{}'", added, dataset.name);
    log_validation(dataset);
    Ok(added)
}

/// Rebuild a dataset from `dataset_config.json` or `<name>_config.json` and import the
/// `images/` directory next to it in the recorded format.
pub fn import_dataset_config(config_path: &Path) -> Result<Dataset, ImportError> {
    if !config_path.is_file() {
        return Err(ImportError::MissingSidecar(config_path.to_path_buf()));
    }
    let config = read_dataset_config(config_path)?;
    let format = config.format();

    let mut dataset = Dataset::new(config.name, config.classes);
    dataset.version = config.version;
    dataset.metadata = config.metadata;

    let root = config_path.parent().unwrap_or_else(|| Path::new("."));
    let images_dir = root.join("images");
    if images_dir.is_dir() {
        import_from_local(
            &mut dataset,
            &images_dir,
            &ImportOptions {
                format,
                ..ImportOptions::default()
            },
        )?;
    } else {
        warn!(
            "No images directory next to {}; dataset '{}' has no images",
            config_path.display(),
            dataset.name
        );
    }

    info!(
        "Dataset '{}' restored from {} ({} images)",
        dataset.name,
        config_path.display(),
        dataset.images.len()
    );
    Ok(dataset)
}
