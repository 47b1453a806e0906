//! Pascal VOC layout: `Annotations/<stem>.xml`, `JPEGImages/`, `ImageSets/Main/*.txt`.

use log::{debug, info, warn};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::config::ExportOptions;
use crate::conversion::{decoded_dataset, source_stem, Decode, DecodeInput, Encode};
use crate::dataset::{class_id_for_name, ClassMap, Dataset};
use crate::error::{ExportError, ImportError};
use crate::io::{scan_image_directory, write_classes_txt, CLASSES_FILE};
use crate::types::{Annotation, BoundingBox, Image, ProcessingStats};
use crate::utils::{copy_image, create_output_directory, optional_progress_bar};
use crate::voc::{parse_voc_xml, VocDocument, VocObject};

pub const ANNOTATIONS_DIR: &str = "Annotations";
pub const JPEG_IMAGES_DIR: &str = "JPEGImages";
pub const IMAGE_SETS_DIR: &str = "ImageSets/Main";

/// Share of `ImageSets/Main/trainval.txt` listed in `train.txt`; the rest goes to `val.txt`.
const IMAGESET_TRAIN_FRACTION: f64 = 0.8;

pub struct VocFormat;

/// Build the annotation document for one image. Classes missing from `classes` are named
/// `class_<id>`.
pub fn voc_document(image: &Image, classes: &ClassMap, segmentation_masks: bool) -> VocDocument {
    let objects = image
        .annotations
        .iter()
        .map(|annotation| {
            let name = classes
                .get(&annotation.class_id)
                .cloned()
                .unwrap_or_else(|| format!("class_{}", annotation.class_id));
            VocObject::new(
                name,
                annotation
                    .bbox
                    .to_pixel_corners(image.width(), image.height()),
            )
        })
        .collect();
    VocDocument {
        filename: image.file_name(),
        width: image.width(),
        height: image.height(),
        depth: 3,
        segmentation_masks,
        objects,
    }
}

fn write_name_list(path: &Path, names: &[String]) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for name in names {
        writeln!(writer, "{name}")?;
    }
    writer.flush()
}

/// Write `trainval.txt` with every stem, then `train.txt`/`val.txt` split in order.
pub fn write_image_sets(dir: &Path, stems: &[String]) -> std::io::Result<()> {
    let train_count = (stems.len() as f64 * IMAGESET_TRAIN_FRACTION).floor() as usize;
    write_name_list(&dir.join("trainval.txt"), stems)?;
    write_name_list(&dir.join("train.txt"), &stems[..train_count])?;
    write_name_list(&dir.join("val.txt"), &stems[train_count..])?;
    info!("Created image sets in {}", dir.display());
    Ok(())
}

fn write_annotation(path: &Path, document: &VocDocument) -> Result<(), ExportError> {
    fs::write(path, document.to_xml()?)?;
    Ok(())
}

impl Encode for VocFormat {
    fn encode(
        &self,
        dataset: &Dataset,
        output_dir: &Path,
        options: &ExportOptions,
    ) -> Result<PathBuf, ExportError> {
        let annotations_dir = create_output_directory(&output_dir.join(ANNOTATIONS_DIR))?;
        let images_dir = if options.include_images {
            Some(create_output_directory(&output_dir.join(JPEG_IMAGES_DIR))?)
        } else {
            None
        };

        let mut stats = ProcessingStats::new();
        let mut stems = Vec::with_capacity(dataset.images.len());
        let pb = optional_progress_bar(options.progress, dataset.images.len(), "VOC");

        for image in &dataset.images {
            let stem = image.file_stem();

            if let Some(images_dir) = &images_dir {
                let dest = images_dir.join(image.file_name());
                match copy_image(image, &dest, dataset.path.as_deref(), &options.cache_dirs) {
                    Ok(true) => stats.images_copied += 1,
                    Ok(false) => stats.missing_images += 1,
                    Err(e) => {
                        warn!("Failed to copy image {}: {}", image.location, e);
                        stats.missing_images += 1;
                    }
                }
            }

            let document = voc_document(image, &dataset.classes, options.voc.segmentation_masks);
            let path = annotations_dir.join(format!("{stem}.xml"));
            match write_annotation(&path, &document) {
                Ok(()) => stats.annotations_written += document.objects.len(),
                Err(e) => warn!("Failed to write VOC annotation for {}: {}", image.id, e),
            }

            stems.push(stem);
            stats.images_processed += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();

        if options.voc.create_imagesets && !stems.is_empty() {
            let sets_dir = create_output_directory(&output_dir.join(IMAGE_SETS_DIR))?;
            if let Err(e) = write_image_sets(&sets_dir, &stems) {
                warn!("Failed to write image sets: {}", e);
            }
        }

        write_classes_txt(&output_dir.join(CLASSES_FILE), &dataset.classes)?;

        stats.print_summary("VOC export");
        info!("VOC export written to {}", output_dir.display());
        Ok(output_dir.to_path_buf())
    }
}

/// Annotations from one XML file, matched to classes by name.
pub fn read_annotation_file(
    path: &Path,
    image: &Image,
    classes: &ClassMap,
    stats: &mut ProcessingStats,
) -> Result<Vec<Annotation>, ImportError> {
    let content = fs::read_to_string(path)?;
    let document = parse_voc_xml(&content)?;

    if let Some((width, height)) = document.size.as_ref().and_then(|size| size.dimensions()) {
        if (width, height) != (image.width(), image.height()) {
            warn!(
                "Size mismatch for {}: XML says {}x{}, image is {}x{}",
                image.location,
                width,
                height,
                image.width(),
                image.height()
            );
        }
    }

    let mut annotations = Vec::with_capacity(document.objects.len());
    for object in &document.objects {
        let (name, [xmin, ymin, xmax, ymax]) = match object.parse() {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("Skipping object in {}: {}", path.display(), e);
                stats.skipped_annotations += 1;
                continue;
            }
        };
        let Some(class_id) = class_id_for_name(classes, name) else {
            warn!("Class '{}' is not defined; skipping object in {}", name, path.display());
            stats.skipped_annotations += 1;
            continue;
        };
        let bbox =
            BoundingBox::from_pixel_corners(xmin, ymin, xmax, ymax, image.width(), image.height());
        annotations.push(Annotation::new(class_id, bbox));
    }
    Ok(annotations)
}

impl Decode for VocFormat {
    fn decode(&self, input: &DecodeInput<'_>) -> Result<Dataset, ImportError> {
        let mut images = scan_image_directory(input.images_dir, input.image_info)?;
        let mut stats = ProcessingStats::new();

        for image in &mut images {
            let xml_path = input.labels.join(format!("{}.xml", source_stem(image)));
            if !xml_path.is_file() {
                debug!("No annotation file for {}", image.location);
                stats.images_processed += 1;
                continue;
            }
            match read_annotation_file(&xml_path, image, input.classes, &mut stats) {
                Ok(annotations) => {
                    stats.annotations_written += annotations.len();
                    image.annotations = annotations;
                }
                Err(e) => {
                    warn!("Cannot read {}: {}", xml_path.display(), e);
                    stats.skipped_annotations += 1;
                }
            }
            stats.images_processed += 1;
        }

        stats.print_summary("VOC import");
        Ok(decoded_dataset(input.images_dir, input.classes.clone(), images))
    }

    fn default_labels(&self, root: &Path) -> PathBuf {
        root.join(ANNOTATIONS_DIR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageSource, Location};

    fn image() -> Image {
        let mut image =
            Image::new("7", Location::local("photos/street.png"), 640, 480, ImageSource::Local)
                .unwrap();
        image.add_annotation(Annotation::new(0, BoundingBox::new(0.1, 0.1, 0.2, 0.2)));
        image.add_annotation(Annotation::new(4, BoundingBox::new(0.5, 0.5, 0.25, 0.25)));
        image
    }

    #[test]
    fn test_voc_document_pixels_and_unknown_class() {
        let classes = ClassMap::from([(0, "stop".to_string())]);
        let document = voc_document(&image(), &classes, false);
        assert_eq!(document.filename, "street.png");
        assert_eq!(document.objects[0].name, "stop");
        assert_eq!(
            (
                document.objects[0].xmin,
                document.objects[0].ymin,
                document.objects[0].xmax,
                document.objects[0].ymax
            ),
            (64, 48, 192, 144)
        );
        assert_eq!(document.objects[1].name, "class_4");
    }

    #[test]
    fn test_write_image_sets_split() {
        let dir = tempfile::tempdir().unwrap();
        let stems: Vec<String> = (0..6).map(|i| format!("img{i}")).collect();
        write_image_sets(dir.path(), &stems).unwrap();
        let read = |name: &str| fs::read_to_string(dir.path().join(name)).unwrap();
        assert_eq!(read("trainval.txt").lines().count(), 6);
        assert_eq!(read("train.txt"), "img0\nimg1\nimg2\nimg3\n");
        assert_eq!(read("val.txt"), "img4\nimg5\n");
    }

    #[test]
    fn test_read_annotation_file_resolves_names() {
        let dir = tempfile::tempdir().unwrap();
        let classes = ClassMap::from([(0, "stop".to_string()), (1, "yield".to_string())]);
        let image = image();
        let mut document = voc_document(&image, &classes, true);
        document.objects.push(VocObject::new("yield", (320, 240, 480, 360)));
        let path = dir.path().join("street.xml");
        fs::write(&path, document.to_xml().unwrap()).unwrap();

        let mut stats = ProcessingStats::new();
        let annotations = read_annotation_file(&path, &image, &classes, &mut stats).unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[0].class_id, 0);
        assert!((annotations[0].bbox.x() - 0.1).abs() < 1.0 / 640.0);
        assert_eq!(annotations[1].class_id, 1);
        assert!((annotations[1].bbox.width() - 0.25).abs() < 1.0 / 640.0);
        assert_eq!(stats.skipped_annotations, 1);
    }
}
