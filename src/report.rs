//! CSV reports about a dataset: per-image summary, class distribution and annotation sizes.

use log::info;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use crate::dataset::Dataset;
use crate::error::ExportError;
use crate::utils::create_output_directory;

const SUMMARY_HEADERS: [&str; 6] = [
    "image_id",
    "file_name",
    "width",
    "height",
    "source",
    "annotations_count",
];

const DISTRIBUTION_HEADERS: [&str; 6] = [
    "class_id",
    "class_name",
    "annotation_count",
    "image_count",
    "percentage_of_total",
    "avg_per_image",
];

const SIZE_HEADERS: [&str; 11] = [
    "image_id",
    "annotation_index",
    "class_id",
    "class_name",
    "width_normalized",
    "height_normalized",
    "width_px",
    "height_px",
    "area_px",
    "aspect_ratio",
    "relative_size",
];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassDistributionRow {
    pub class_id: u32,
    pub class_name: String,
    pub annotation_count: usize,
    pub image_count: usize,
    pub percentage_of_total: f64,
    pub avg_per_image: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnotationSizeRow {
    pub image_id: String,
    pub annotation_index: usize,
    pub class_id: u32,
    pub class_name: String,
    pub width_normalized: f64,
    pub height_normalized: f64,
    pub width_px: f64,
    pub height_px: f64,
    pub area_px: f64,
    pub aspect_ratio: f64,
    /// Box area as a percentage of the image area.
    pub relative_size: f64,
}

fn csv_writer(path: &Path) -> Result<csv::Writer<BufWriter<File>>, ExportError> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        create_output_directory(parent)?;
    }
    Ok(csv::Writer::from_writer(BufWriter::new(File::create(path)?)))
}

/// One row per image with its annotation count and a count column per class.
pub fn write_summary(dataset: &Dataset, path: &Path) -> Result<PathBuf, ExportError> {
    let mut writer = csv_writer(path)?;

    let mut headers: Vec<String> = SUMMARY_HEADERS.iter().map(|h| h.to_string()).collect();
    headers.extend(
        dataset
            .classes
            .iter()
            .map(|(id, name)| format!("class_{id}_{name}")),
    );
    writer.write_record(&headers)?;

    for image in &dataset.images {
        let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
        for annotation in &image.annotations {
            *counts.entry(annotation.class_id).or_default() += 1;
        }
        let mut record = vec![
            image.id.clone(),
            image.file_name(),
            image.width().to_string(),
            image.height().to_string(),
            image.source.as_str().to_string(),
            image.annotations.len().to_string(),
        ];
        record.extend(
            dataset
                .classes
                .keys()
                .map(|id| counts.get(id).copied().unwrap_or(0).to_string()),
        );
        writer.write_record(&record)?;
    }
    writer.flush()?;
    info!("Dataset summary written to {}", path.display());
    Ok(path.to_path_buf())
}

/// Per-class counts for every defined class, most annotated first.
pub fn class_distribution(dataset: &Dataset) -> Vec<ClassDistributionRow> {
    let mut annotation_counts: BTreeMap<u32, usize> = BTreeMap::new();
    let mut image_counts: BTreeMap<u32, usize> = BTreeMap::new();
    for image in &dataset.images {
        let mut seen = BTreeSet::new();
        for annotation in &image.annotations {
            if dataset.classes.contains_key(&annotation.class_id) {
                *annotation_counts.entry(annotation.class_id).or_default() += 1;
                seen.insert(annotation.class_id);
            }
        }
        for class_id in seen {
            *image_counts.entry(class_id).or_default() += 1;
        }
    }
    let total: usize = annotation_counts.values().sum();

    let mut rows: Vec<ClassDistributionRow> = dataset
        .classes
        .iter()
        .map(|(&class_id, name)| {
            let annotation_count = annotation_counts.get(&class_id).copied().unwrap_or(0);
            let image_count = image_counts.get(&class_id).copied().unwrap_or(0);
            ClassDistributionRow {
                class_id,
                class_name: name.clone(),
                annotation_count,
                image_count,
                percentage_of_total: if total > 0 {
                    annotation_count as f64 / total as f64 * 100.0
                } else {
                    0.0
                },
                avg_per_image: if image_count > 0 {
                    annotation_count as f64 / image_count as f64
                } else {
                    0.0
                },
            }
        })
        .collect();
    // stable sort keeps class id order among ties
    rows.sort_by(|a, b| b.annotation_count.cmp(&a.annotation_count));
    rows
}

pub fn write_class_distribution(dataset: &Dataset, path: &Path) -> Result<PathBuf, ExportError> {
    let rows = class_distribution(dataset);
    let mut writer = csv_writer(path)?;
    if rows.is_empty() {
        writer.write_record(DISTRIBUTION_HEADERS)?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Class distribution written to {}", path.display());
    Ok(path.to_path_buf())
}

/// Pixel size, aspect ratio and relative size of every annotation.
pub fn annotation_sizes(dataset: &Dataset) -> Vec<AnnotationSizeRow> {
    let mut rows = Vec::with_capacity(dataset.total_annotations());
    for image in &dataset.images {
        for (index, annotation) in image.annotations.iter().enumerate() {
            let [_, _, width_px, height_px] =
                annotation.bbox.to_pixels(image.width(), image.height());
            rows.push(AnnotationSizeRow {
                image_id: image.id.clone(),
                annotation_index: index,
                class_id: annotation.class_id,
                class_name: dataset
                    .classes
                    .get(&annotation.class_id)
                    .cloned()
                    .unwrap_or_else(|| format!("class_{}", annotation.class_id)),
                width_normalized: annotation.bbox.width(),
                height_normalized: annotation.bbox.height(),
                width_px,
                height_px,
                area_px: width_px * height_px,
                aspect_ratio: if height_px > 0.0 { width_px / height_px } else { 0.0 },
                relative_size: annotation.bbox.width() * annotation.bbox.height() * 100.0,
            });
        }
    }
    rows
}

pub fn write_annotation_sizes(dataset: &Dataset, path: &Path) -> Result<PathBuf, ExportError> {
    let rows = annotation_sizes(dataset);
    let mut writer = csv_writer(path)?;
    if rows.is_empty() {
        writer.write_record(SIZE_HEADERS)?;
    }
    for row in &rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    info!("Annotation sizes written to {}", path.display());
    Ok(path.to_path_buf())
}

/// Write all three reports into `dir` as `<name>_summary.csv`, `<name>_class_distribution.csv`
/// and `<name>_annotation_sizes.csv`.
pub fn write_reports(dataset: &Dataset, dir: &Path) -> Result<Vec<PathBuf>, ExportError> {
    create_output_directory(dir)?;
    let name = sanitize_filename::sanitize(&dataset.name);
    Ok(vec![
        write_summary(dataset, &dir.join(format!("{name}_summary.csv")))?,
        write_class_distribution(dataset, &dir.join(format!("{name}_class_distribution.csv")))?,
        write_annotation_sizes(dataset, &dir.join(format!("{name}_annotation_sizes.csv")))?,
    ])
}
