//! Export driver: optional train/val/test partitioning, per-subset encoding, the
//! `<name>_config.json` summary and optional zip compression.

use log::info;
use std::path::{Path, PathBuf};

use crate::config::{ExportOptions, Format};
use crate::dataset::Dataset;
use crate::error::ExportError;
use crate::io::{compress_directory, export_config_path, write_export_config};
use crate::split::split_dataset;
use crate::utils::create_output_directory;

/// Default export location: `exports/<name>_<format>`.
pub fn default_output_dir(dataset: &Dataset, format: Format) -> PathBuf {
    PathBuf::from("exports").join(format!(
        "{}_{}",
        sanitize_filename::sanitize(&dataset.name),
        format.name()
    ))
}

/// Export `dataset` in `format`.
///
/// When the split ratios sum to more than zero, each non-empty subset is written into its own
/// `<output>/<subset>` directory; otherwise the whole dataset goes into `output`. Returns the
/// export directory, or the zip archive when `options.compress` is set.
pub fn export_dataset(
    dataset: &Dataset,
    format: Format,
    output: Option<&Path>,
    options: &ExportOptions,
) -> Result<PathBuf, ExportError> {
    let output_dir = match output {
        Some(path) => path.to_path_buf(),
        None => default_output_dir(dataset, format),
    };
    create_output_directory(&output_dir)?;

    info!(
        "Exporting dataset '{}' ({} images) as {} to {}",
        dataset.name,
        dataset.images.len(),
        format,
        output_dir.display()
    );

    if options.split.sum() > 0.0 {
        for (subset, part) in split_dataset(dataset, options.split, options.seed) {
            let subset_dir = output_dir.join(subset.name());
            info!("Writing {} subset ({} images)", subset.name(), part.images.len());
            format.encode(&part, &subset_dir, options)?;
        }
    } else {
        format.encode(dataset, &output_dir, options)?;
    }

    write_export_config(
        &export_config_path(&output_dir, dataset),
        dataset,
        format,
        options,
    )?;

    if options.compress {
        return compress_directory(&output_dir);
    }

    info!("Export finished: {}", output_dir.display());
    Ok(output_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::ClassMap;

    #[test]
    fn test_default_output_dir() {
        let dataset = Dataset::new("street signs", ClassMap::new());
        assert_eq!(
            default_output_dir(&dataset, Format::Coco),
            PathBuf::from("exports").join("street signs_coco")
        );
    }

    #[test]
    fn test_unsplit_export_of_empty_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let dataset = Dataset::new("empty", ClassMap::from([(0, "stop".to_string())]));
        let out = dir.path().join("out");
        let written =
            export_dataset(&dataset, Format::Yolo, Some(&out), &ExportOptions::unsplit()).unwrap();
        assert_eq!(written, out);
        assert!(out.join("classes.txt").is_file());
        assert!(out.join("empty_config.json").is_file());
        assert!(!out.join("train").exists());
    }

    #[test]
    fn test_output_dir_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let dataset = Dataset::new("d", ClassMap::new());
        let result = export_dataset(
            &dataset,
            Format::Voc,
            Some(&blocker.join("nested")),
            &ExportOptions::unsplit(),
        );
        assert!(matches!(result, Err(ExportError::OutputDir { .. })));
    }
}
