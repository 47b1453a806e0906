//! YOLO layout: `images/`, `labels/<stem>.txt`, `classes.txt`, `data.yaml` and provenance files.

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::ExportOptions;
use crate::conversion::{decoded_dataset, source_stem, Decode, DecodeInput, Encode};
use crate::dataset::{ClassMap, Dataset};
use crate::error::{ExportError, ImportError};
use crate::io::{
    create_data_yaml, scan_image_directory, write_classes_txt, write_image_info,
    write_yolo_dataset_config, ImageInfo, ImageInfoMap, CLASSES_FILE,
};
use crate::types::{Annotation, BoundingBox, Image, ProcessingStats};
use crate::utils::{copy_image, create_output_directory, optional_progress_bar};

pub struct YoloFormat;

/// One label line in center form: `class_id cx cy w h`, six decimals.
pub fn format_label_line(annotation: &Annotation) -> String {
    let (x_center, y_center) = annotation.bbox.center();
    format!(
        "{} {:.6} {:.6} {:.6} {:.6}\n",
        annotation.class_id,
        x_center,
        y_center,
        annotation.bbox.width(),
        annotation.bbox.height()
    )
}

/// Convert an image's annotations to the contents of its label file
pub fn convert_to_yolo_format(image: &Image) -> String {
    let mut yolo_data = String::with_capacity(image.annotations.len() * 48);
    for annotation in &image.annotations {
        yolo_data.push_str(&format_label_line(annotation));
    }
    yolo_data
}

/// Parse `class_id cx cy w h` into a class id and a top-left anchored box.
pub fn parse_label_line(line: &str) -> Result<(u32, BoundingBox), String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    if parts.len() != 5 {
        return Err(format!("expected 5 fields, found {}", parts.len()));
    }
    let class_id = parts[0]
        .parse::<u32>()
        .map_err(|e| format!("invalid class id {:?}: {}", parts[0], e))?;
    let mut values = [0.0f64; 4];
    for (value, raw) in values.iter_mut().zip(&parts[1..]) {
        *value = raw
            .parse::<f64>()
            .map_err(|e| format!("invalid coordinate {:?}: {}", raw, e))?;
    }
    let [x_center, y_center, width, height] = values;
    Ok((
        class_id,
        BoundingBox::from_center(x_center, y_center, width, height),
    ))
}

/// Annotations from one label file. Bad lines and unknown classes are skipped with a warning.
pub fn read_label_file(
    path: &Path,
    classes: &ClassMap,
    stats: &mut ProcessingStats,
) -> std::io::Result<Vec<Annotation>> {
    let content = fs::read_to_string(path)?;
    let mut annotations = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match parse_label_line(line) {
            Ok((class_id, _)) if !classes.contains_key(&class_id) => {
                warn!(
                    "Class {} is not defined; skipping {}:{}",
                    class_id,
                    path.display(),
                    line_no + 1
                );
                stats.skipped_annotations += 1;
            }
            Ok((class_id, bbox)) => annotations.push(Annotation::new(class_id, bbox)),
            Err(e) => {
                warn!("Malformed label at {}:{}: {}", path.display(), line_no + 1, e);
                stats.skipped_annotations += 1;
            }
        }
    }
    Ok(annotations)
}

fn write_label_file(path: &Path, image: &Image) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_all(convert_to_yolo_format(image).as_bytes())?;
    writer.flush()
}

impl Encode for YoloFormat {
    fn encode(
        &self,
        dataset: &Dataset,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        let images_dir = create_output_directory(&output_dir.join("images"))?;
        let labels_dir = create_output_directory(&output_dir.join("labels"))?;

        write_classes_txt(&output_dir.join(CLASSES_FILE), &dataset.classes)?;

        if options.yolo.create_data_yaml {
            match create_data_yaml(output_dir, &dataset.classes) {
                Ok(path) => info!("Created {}", path.display()),
                Err(e) => warn!("Failed to create data.yaml: {}", e),
            }
        }

        let mut image_info = ImageInfoMap::new();
        let mut stats = ProcessingStats::new();
        let pb = optional_progress_bar(options.progress, dataset.images.len(), "YOLO");

        for image in &dataset.images {
            let file_name = image.file_name();

            if options.include_images {
                let dest = images_dir.join(&file_name);
                match copy_image(image, &dest, dataset.path.as_deref(), &options.cache_dirs) {
                    Ok(true) => stats.images_copied += 1,
                    Ok(false) => stats.missing_images += 1,
                    Err(e) => {
                        warn!("Failed to copy image {}: {}", image.location, e);
                        stats.missing_images += 1;
                    }
                }
            }
            image_info.insert(file_name, ImageInfo::from_image(image));

            let label_path = labels_dir.join(format!("{}.txt", image.file_stem()));
            write_label_file(&label_path, image)?;
            stats.annotations_written += image.annotations.len();
            stats.images_processed += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        write_image_info(&output_dir.join(crate::io::IMAGE_INFO_FILE), &image_info)?;
        write_yolo_dataset_config(output_dir, dataset)?;

        stats.print_summary("YOLO export");
        info!("YOLO export written to {}", output_dir.display());
        Ok(output_dir.to_path_buf())
    }
}

impl Decode for YoloFormat {
    fn decode(&self, input: &DecodeInput<'_>) -> Result<Dataset, ImportError> {
        let mut images = scan_image_directory(input.images_dir, input.image_info)?;
        let mut stats = ProcessingStats::new();

        for image in &mut images {
            let label_path = input.labels.join(format!("{}.txt", source_stem(image)));
            if !label_path.is_file() {
                debug!("No label file for {}", image.location);
                stats.images_processed += 1;
                continue;
            }
            match read_label_file(&label_path, input.classes, &mut stats) {
                Ok(annotations) => {
                    stats.annotations_written += annotations.len();
                    image.annotations = annotations;
                }
                Err(e) => warn!("Cannot read labels {}: {}", label_path.display(), e),
            }
            stats.images_processed += 1;
        }

        stats.print_summary("YOLO import");
        Ok(decoded_dataset(input.images_dir, input.classes.clone(), images))
    }

    fn default_labels(&self, root: &Path) -> PathBuf {
        root.join("labels")
    }
}
