//! Sidecar files shared by the encoders and decoders, image discovery and archiving.

use chrono::{DateTime, Utc};
use glob::glob;
use log::{info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::{ExportOptions, Format};
use crate::dataset::{ClassMap, Dataset};
use crate::error::{ExportError, ImportError};
use crate::types::{get_image_extensions_set, Image, ImageSource, Location};
use crate::utils::image_dimensions;

pub const CLASSES_FILE: &str = "classes.txt";
pub const IMAGE_INFO_FILE: &str = "image_info.json";
pub const DATASET_CONFIG_FILE: &str = "dataset_config.json";
pub const DATA_YAML_FILE: &str = "data.yaml";

fn placeholder_class_name(id: u32) -> String {
    format!("class_{id}")
}

/// Write `classes.txt` so that line index equals class id.
///
/// Gaps in sparse class maps are filled with `class_<id>` placeholders.
pub fn write_classes_txt(path: &Path, classes: &ClassMap) -> std::io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    let Some(&max_id) = classes.keys().next_back() else {
        return writer.flush();
    };
    if classes.len() as u64 != u64::from(max_id) + 1 {
        warn!(
            "Class ids are not contiguous; filling gaps in {} with placeholders",
            path.display()
        );
    }
    for id in 0..=max_id {
        match classes.get(&id) {
            Some(name) => writeln!(writer, "{name}")?,
            None => writeln!(writer, "{}", placeholder_class_name(id))?,
        }
    }
    writer.flush()
}

/// Read `classes.txt`; line index is the class id. Blank and placeholder lines are skipped.
pub fn read_classes_txt(path: &Path) -> std::io::Result<ClassMap> {
    let reader = BufReader::new(File::open(path)?);
    let mut classes = ClassMap::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let name = line.trim();
        let id = index as u32;
        if name.is_empty() || name == placeholder_class_name(id) {
            continue;
        }
        classes.insert(id, name.to_string());
    }
    Ok(classes)
}

/// Contents of the data.yaml manifest read by YOLO training tools.
#[derive(Debug, Serialize, Deserialize)]
pub struct DataYaml {
    pub path: PathBuf,
    pub train: PathBuf,
    pub val: PathBuf,
    pub nc: u32,
    pub names: BTreeMap<u32, String>,
}

impl DataYaml {
    /// `names` is dense over 0..nc so every label id has an entry.
    pub fn new(root: PathBuf, classes: &ClassMap) -> Self {
        let nc = classes.keys().next_back().map_or(0, |&max_id| max_id + 1);
        let names = (0..nc)
            .map(|id| {
                let name = classes
                    .get(&id)
                    .cloned()
                    .unwrap_or_else(|| placeholder_class_name(id));
                (id, name)
            })
            .collect();
        let images = root.join("images");
        Self {
            path: root,
            train: images.clone(),
            val: images,
            nc,
            names,
        }
    }
}

/// Create the data.yaml manifest used by YOLO training tools
pub fn create_data_yaml(output_dir: &Path, classes: &ClassMap) -> Result<PathBuf, ExportError> {
    let yaml_path = output_dir.join(DATA_YAML_FILE);
    let manifest = DataYaml::new(fs::canonicalize(output_dir)?, classes);

    let mut writer = BufWriter::new(File::create(&yaml_path)?);
    serde_yaml::to_writer(&mut writer, &manifest)?;
    writer.flush()?;
    Ok(yaml_path)
}

/// Provenance of one exported image, keyed by its file name in the export tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: String,
    pub width: u32,
    pub height: u32,
    pub source: ImageSource,
    pub original_path: String,
}

impl ImageInfo {
    pub fn from_image(image: &Image) -> Self {
        Self {
            id: image.id.clone(),
            width: image.width(),
            height: image.height(),
            source: image.source,
            original_path: image.location.to_string(),
        }
    }
}

pub type ImageInfoMap = BTreeMap<String, ImageInfo>;

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush()?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, ImportError> {
    let file = File::open(path)?;
    Ok(serde_json::from_reader(BufReader::new(file))?)
}

pub fn write_image_info(path: &Path, info: &ImageInfoMap) -> Result<(), ExportError> {
    write_json(path, info)
}

pub fn read_image_info(path: &Path) -> Result<ImageInfoMap, ImportError> {
    read_json(path)
}

/// Layout description written next to a YOLO export so it can be imported again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YoloDatasetConfig {
    pub name: String,
    pub version: String,
    pub images_dir: String,
    pub labels_dir: String,
    pub classes: ClassMap,
    pub format: String,
}

pub fn write_yolo_dataset_config(output_dir: &Path, dataset: &Dataset) -> Result<(), ExportError> {
    let config = YoloDatasetConfig {
        name: dataset.name.clone(),
        version: dataset.version.clone(),
        images_dir: "images".to_string(),
        labels_dir: "labels".to_string(),
        classes: dataset.classes.clone(),
        format: "YOLO".to_string(),
    };
    write_json(&output_dir.join(DATASET_CONFIG_FILE), &config)
}

/// Summary of an export, written as `<dataset name>_config.json` at the export root.
#[derive(Debug, Clone, Serialize)]
pub struct ExportConfig<'a> {
    pub name: &'a str,
    pub version: &'a str,
    pub format: Format,
    pub classes: &'a ClassMap,
    pub metadata: &'a crate::types::Metadata,
    pub created_at: DateTime<Utc>,
    pub modified_at: Option<DateTime<Utc>>,
    pub total_images: usize,
    pub total_annotations: usize,
    pub export_timestamp: DateTime<Utc>,
    pub export_options: &'a ExportOptions,
}

pub fn export_config_path(output_dir: &Path, dataset: &Dataset) -> PathBuf {
    output_dir.join(format!(
        "{}_config.json",
        sanitize_filename::sanitize(&dataset.name)
    ))
}

pub fn write_export_config(
    path: &Path,
    dataset: &Dataset,
    format: Format,
    options: &ExportOptions,
) -> Result<(), ExportError> {
    let config = ExportConfig {
        name: &dataset.name,
        version: &dataset.version,
        format,
        classes: &dataset.classes,
        metadata: &dataset.metadata,
        created_at: dataset.created_at,
        modified_at: dataset.modified_at,
        total_images: dataset.images.len(),
        total_annotations: dataset.total_annotations(),
        export_timestamp: Utc::now(),
        export_options: options,
    };
    write_json(path, &config)?;
    info!("Wrote {}", path.display());
    Ok(())
}

/// Either configuration file, read back leniently.
#[derive(Debug, Clone, Deserialize)]
pub struct DatasetConfigFile {
    #[serde(default = "unnamed")]
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub classes: ClassMap,
    #[serde(default)]
    pub metadata: crate::types::Metadata,
    #[serde(default)]
    pub format: Option<String>,
}

fn unnamed() -> String {
    "Unnamed Dataset".to_string()
}

fn default_version() -> String {
    "1.0.0".to_string()
}

impl DatasetConfigFile {
    pub fn format(&self) -> Format {
        match self.format.as_deref().map(str::to_lowercase).as_deref() {
            Some("coco") => Format::Coco,
            Some("voc") => Format::Voc,
            _ => Format::Yolo,
        }
    }
}

pub fn read_dataset_config(path: &Path) -> Result<DatasetConfigFile, ImportError> {
    read_json(path)
}

pub fn read_dataset_json(path: &Path) -> Result<Dataset, ImportError> {
    read_json(path)
}

pub fn write_dataset_json(path: &Path, dataset: &Dataset) -> Result<(), ExportError> {
    write_json(path, dataset)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| get_image_extensions_set().contains(&ext.to_lowercase()))
}

/// Image files directly inside `dir`, sorted by name.
pub fn collect_image_files(dir: &Path) -> Vec<PathBuf> {
    let pattern = format!("{}/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = match glob(&pattern) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect(),
        Err(e) => {
            warn!("Invalid image pattern {}: {}", pattern, e);
            Vec::new()
        }
    };
    files.sort();
    files
}

/// Build un-annotated [`Image`]s for every readable image file in `images_dir`.
///
/// Ids and sources are restored from `image_info` when the file name is listed there.
/// Files whose dimensions cannot be read are skipped with a warning.
pub fn scan_image_directory(images_dir: &Path, image_info: &ImageInfoMap) -> Result<Vec<Image>, ImportError> {
    if !images_dir.is_dir() {
        return Err(ImportError::MissingInput(images_dir.to_path_buf()));
    }

    let files = collect_image_files(images_dir);
    info!("Found {} images in {}", files.len(), images_dir.display());

    let images = files
        .par_iter()
        .filter_map(|file| {
            let (width, height) = match image_dimensions(file) {
                Ok(dims) => dims,
                Err(e) => {
                    warn!("Cannot read image {}: {}", file.display(), e);
                    return None;
                }
            };
            let file_name = file.file_name()?.to_string_lossy().into_owned();
            let stem = file.file_stem()?.to_string_lossy().into_owned();

            let (id, source, location) = match image_info.get(&file_name) {
                Some(info) => {
                    let location = match Location::parse(&info.original_path) {
                        Location::Remote { url, .. } => Location::Remote {
                            url,
                            cached: Some(file.clone()),
                        },
                        Location::Local { .. } => Location::local(file.clone()),
                    };
                    (info.id.clone(), info.source, location)
                }
                None => (stem, ImageSource::Local, Location::local(file.clone())),
            };

            match Image::new(id, location, width, height, source) {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!("Skipping {}: {}", file.display(), e);
                    None
                }
            }
        })
        .collect();
    Ok(images)
}

/// Zip `dir` into `<dir>.zip`; entry names are relative to the parent of `dir`.
pub fn compress_directory(dir: &Path) -> Result<PathBuf, ExportError> {
    let dir_name = dir
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "export".to_string());
    let zip_path = dir.with_file_name(format!("{dir_name}.zip"));
    let base = dir.parent().unwrap_or_else(|| Path::new(""));
    let mut zip = ZipWriter::new(BufWriter::new(File::create(&zip_path)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let pattern = format!("{}/**/*", glob::Pattern::escape(&dir.to_string_lossy()));
    let mut files: Vec<PathBuf> = glob(&pattern)
        .map_err(|e| ExportError::Format {
            format: "zip",
            message: e.to_string(),
        })?
        .filter_map(|entry| entry.ok())
        .filter(|path| path.is_file())
        .collect();
    files.sort();

    for file in files {
        let name = file
            .strip_prefix(base)
            .unwrap_or(&file)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        let mut reader = BufReader::new(File::open(&file)?);
        std::io::copy(&mut reader, &mut zip)?;
    }
    zip.finish()?;
    info!("Compressed export to {}", zip_path.display());
    Ok(zip_path)
}
