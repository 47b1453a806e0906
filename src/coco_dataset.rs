//! COCO dataset processing module
//!
//! Encodes a dataset as a single `annotations.json` with absolute pixel boxes and reads such
//! a file back, matching annotations to image files by file name.

use log::{debug, info, warn};
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::coco::{self, CocoWriter, Info, License};
use crate::config::ExportOptions;
use crate::conversion::{decoded_dataset, source_file_name, Decode, DecodeInput, Encode};
use crate::dataset::{ClassMap, Dataset};
use crate::error::{ExportError, ImportError};
use crate::io::scan_image_directory;
use crate::types::{Annotation, BoundingBox, ProcessingStats};
use crate::utils::{copy_image, create_output_directory, optional_progress_bar};

pub const COCO_ANNOTATIONS_FILE: &str = "annotations.json";

pub struct CocoFormat;

/// Build the COCO document for `dataset`, dropping annotations below `min_area` pixels.
pub fn build_coco_file(
    dataset: &Dataset,
    options: &ExportOptions,
    stats: &mut ProcessingStats,
) -> coco::CocoFile {
    let mut writer = CocoWriter::new();
    writer.add_categories(&dataset.classes);

    for image in &dataset.images {
        let image_id = writer.add_image(
            image.file_name(),
            image.width(),
            image.height(),
            Some(image.created_at.to_rfc3339()),
        );
        for annotation in &image.annotations {
            let bbox = annotation.bbox.to_pixels(image.width(), image.height());
            let area = bbox[2] * bbox[3];
            if area < options.coco.min_area {
                debug!(
                    "Dropping annotation of area {:.2} in image {} (min_area {})",
                    area, image.id, options.coco.min_area
                );
                stats.skipped_annotations += 1;
                continue;
            }
            writer.add_annotation(image_id, annotation.class_id, bbox);
            stats.annotations_written += 1;
        }
        stats.images_processed += 1;
    }

    let info = options
        .coco
        .include_info
        .then(|| Info::new(&dataset.name, &dataset.version, dataset.created_at, &dataset.metadata));
    let licenses = options
        .coco
        .include_licenses
        .then(|| vec![License::from_metadata(&dataset.metadata)]);
    writer.build(info, licenses)
}

impl Encode for CocoFormat {
    fn encode(
        &self,
        dataset: &Dataset,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        create_output_directory(output_dir)?;
        let mut stats = ProcessingStats::new();

        if options.include_images {
            let images_dir = create_output_directory(&output_dir.join("images"))?;
            let pb = optional_progress_bar(options.progress, dataset.images.len(), "COCO");
            for image in &dataset.images {
                let dest = images_dir.join(image.file_name());
                match copy_image(image, &dest, dataset.path.as_deref(), &options.cache_dirs) {
                    Ok(true) => stats.images_copied += 1,
                    Ok(false) => stats.missing_images += 1,
                    Err(e) => {
                        warn!("Failed to copy image {}: {}", image.location, e);
                        stats.missing_images += 1;
                    }
                }
                pb.inc(1);
            }
            pb.finish_and_clear();
        }

        let coco_file = build_coco_file(dataset, options, &mut stats);
        let path = output_dir.join(COCO_ANNOTATIONS_FILE);
        let mut writer = BufWriter::new(File::create(&path)?);
        serde_json::to_writer_pretty(&mut writer, &coco_file)?;
        writer.flush()?;
        info!("Wrote {}", path.display());

        stats.print_summary("COCO export");
        Ok(output_dir.to_path_buf())
    }
}

/// Convert one COCO annotation for an image of the given size.
fn decode_annotation(
    raw: &coco::Annotation,
    width: u32,
    height: u32,
    classes: &ClassMap,
) -> Result<Annotation, String> {
    let [x, y, w, h] = <[f64; 4]>::try_from(raw.bbox.as_slice())
        .map_err(|_| format!("bbox has {} values, expected 4", raw.bbox.len()))?;
    if !classes.contains_key(&raw.category_id) {
        return Err(format!("category {} is not defined", raw.category_id));
    }
    let bbox = BoundingBox::new(
        x / width as f64,
        y / height as f64,
        w / width as f64,
        h / height as f64,
    );
    Annotation::new(raw.category_id, bbox)
        .with_confidence(raw.score.unwrap_or(1.0))
        .map_err(|e| e.to_string())
}

fn coco_file_path(labels: &Path) -> PathBuf {
    if labels.is_dir() {
        labels.join(COCO_ANNOTATIONS_FILE)
    } else {
        labels.to_path_buf()
    }
}

/// Lenient view of a COCO file: entries that fail to parse are skipped individually.
#[derive(serde::Deserialize)]
struct RawCocoFile {
    #[serde(default)]
    images: Vec<serde_json::Value>,
    #[serde(default)]
    annotations: Vec<serde_json::Value>,
    #[serde(default)]
    categories: Vec<serde_json::Value>,
}

fn parse_entries<T: serde::de::DeserializeOwned>(
    values: Vec<serde_json::Value>,
    kind: &str,
    stats: &mut ProcessingStats,
) -> Vec<T> {
    values
        .into_iter()
        .filter_map(|value| match serde_json::from_value(value) {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping malformed COCO {}: {}", kind, e);
                stats.skipped_annotations += 1;
                None
            }
        })
        .collect()
}

impl Decode for CocoFormat {
    fn decode(&self, input: &DecodeInput<'_>) -> Result<Dataset, ImportError> {
        let path = coco_file_path(input.labels);
        if !path.is_file() {
            return Err(ImportError::MissingSidecar(path));
        }
        let raw: RawCocoFile = serde_json::from_reader(BufReader::new(File::open(&path)?))?;

        let mut stats = ProcessingStats::new();
        let coco_images: Vec<coco::Image> = parse_entries(raw.images, "image", &mut stats);
        let coco_annotations: Vec<coco::Annotation> =
            parse_entries(raw.annotations, "annotation", &mut stats);
        let categories: Vec<coco::Category> = parse_entries(raw.categories, "category", &mut stats);

        let classes = if input.classes.is_empty() {
            categories
                .iter()
                .map(|category| (category.id, category.name.clone()))
                .collect()
        } else {
            input.classes.clone()
        };

        let ids_by_file: HashMap<&str, u64> = coco_images
            .iter()
            .map(|image| (image.file_name.as_str(), image.id))
            .collect();
        let mut by_image: HashMap<u64, Vec<&coco::Annotation>> = HashMap::new();
        for annotation in &coco_annotations {
            by_image.entry(annotation.image_id).or_default().push(annotation);
        }

        let mut images = scan_image_directory(input.images_dir, input.image_info)?;
        for image in &mut images {
            let file_name = source_file_name(image);
            let coco_id = ids_by_file
                .get(file_name.as_str())
                .copied()
                .or_else(|| image.id.parse::<u64>().ok().filter(|id| by_image.contains_key(id)));
            let Some(coco_id) = coco_id else {
                debug!("No COCO entry for {}", file_name);
                stats.images_processed += 1;
                continue;
            };

            for raw in by_image.get(&coco_id).into_iter().flatten() {
                match decode_annotation(raw, image.width(), image.height(), &classes) {
                    Ok(annotation) => {
                        image.annotations.push(annotation);
                        stats.annotations_written += 1;
                    }
                    Err(e) => {
                        warn!("Skipping annotation {} of {}: {}", raw.id, file_name, e);
                        stats.skipped_annotations += 1;
                    }
                }
            }
            stats.images_processed += 1;
        }

        stats.print_summary("COCO import");
        Ok(decoded_dataset(input.images_dir, classes, images))
    }

    fn default_labels(&self, root: &Path) -> PathBuf {
        root.join(COCO_ANNOTATIONS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Image, ImageSource, Location};

    fn dataset() -> Dataset {
        let mut dataset = Dataset::new(
            "signs",
            ClassMap::from([(0, "stop".to_string()), (1, "yield".to_string())]),
        );
        let mut image =
            Image::new("1", Location::local("a.jpg"), 200, 100, ImageSource::Local).unwrap();
        image.add_annotation(Annotation::new(0, BoundingBox::new(0.1, 0.2, 0.5, 0.5)));
        image.add_annotation(Annotation::new(1, BoundingBox::new(0.0, 0.0, 0.01, 0.01)));
        dataset.add_image(image);
        dataset
    }

    #[test]
    fn test_build_coco_file_area_and_min_area() {
        let mut options = ExportOptions::unsplit();
        options.coco.min_area = 5.0;
        let mut stats = ProcessingStats::new();
        let file = build_coco_file(&dataset(), &options, &mut stats);

        assert_eq!(file.images.len(), 1);
        assert_eq!(file.images[0].id, 1);
        assert_eq!(file.annotations.len(), 1);
        let annotation = &file.annotations[0];
        assert_eq!(annotation.id, 1);
        assert_eq!(annotation.image_id, 1);
        assert!((annotation.bbox[0] - 20.0).abs() < 1e-9);
        assert!((annotation.bbox[1] - 20.0).abs() < 1e-9);
        assert!((annotation.area - 100.0 * 50.0).abs() < 1e-6);
        assert_eq!(stats.skipped_annotations, 1);
        assert!(file.info.is_some());
        assert_eq!(file.info.as_ref().unwrap().description, "signs");
    }

    #[test]
    fn test_decode_annotation() {
        let classes = ClassMap::from([(0, "stop".to_string())]);
        let raw = coco::Annotation {
            id: 1,
            image_id: 1,
            category_id: 0,
            bbox: vec![20.0, 10.0, 100.0, 50.0],
            area: 5000.0,
            iscrowd: 0,
            segmentation: Vec::new(),
            score: Some(0.75),
        };
        let annotation = decode_annotation(&raw, 200, 100, &classes).unwrap();
        assert!((annotation.bbox.x() - 0.1).abs() < 1e-9);
        assert!((annotation.bbox.width() - 0.5).abs() < 1e-9);
        assert_eq!(annotation.confidence(), Some(0.75));

        let unknown = coco::Annotation {
            category_id: 9,
            ..raw.clone()
        };
        assert!(decode_annotation(&unknown, 200, 100, &classes).is_err());

        let short = coco::Annotation {
            bbox: vec![1.0, 2.0],
            ..raw
        };
        assert!(decode_annotation(&short, 200, 100, &classes).is_err());
    }
}
