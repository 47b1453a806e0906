use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

use crate::split::SplitRatio;

/// Command-line interface for converting and inspecting annotation datasets.
#[derive(Parser, Debug, Clone)]
#[command(version, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Write a dataset document out as a YOLO, COCO or VOC tree
    Export(ExportArgs),
    /// Read an image directory plus labels into a dataset document
    Import(ImportArgs),
    /// Rebuild a dataset document from an exported configuration file
    ImportConfig(ImportConfigArgs),
    /// Check class references, image files and box bounds
    Validate(DatasetArg),
    /// Print statistics and optionally write CSV reports
    Stats(StatsArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DatasetArg {
    /// Dataset document (JSON)
    #[arg(short = 'd', long = "dataset")]
    pub dataset: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ExportArgs {
    #[command(flatten)]
    pub input: DatasetArg,

    /// Output layout
    #[arg(short = 'f', long = "format", value_enum, default_value = "yolo")]
    pub format: Format,

    /// Output directory; defaults to exports/<name>_<format>
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Proportion of images for training
    #[arg(long = "train_size", default_value_t = 0.8, value_parser = validate_size)]
    pub train_size: f64,

    /// Proportion of images for validation
    #[arg(long = "val_size", default_value_t = 0.2, value_parser = validate_size)]
    pub val_size: f64,

    /// Proportion of images for testing
    #[arg(long = "test_size", default_value_t = 0.0, value_parser = validate_size)]
    pub test_size: f64,

    /// Seed for random shuffling; omitted means a fresh shuffle every run
    #[arg(long = "seed")]
    pub seed: Option<u64>,

    /// Only write annotation files, do not copy image files
    #[arg(long = "no_images")]
    pub no_images: bool,

    /// Zip the export directory
    #[arg(long = "compress")]
    pub compress: bool,

    /// Extra directories searched for downloaded copies of remote images
    #[arg(long = "cache_dir")]
    pub cache_dirs: Vec<PathBuf>,

    /// COCO: drop annotations whose pixel area is below this value
    #[arg(long = "min_area", default_value_t = 0.0)]
    pub min_area: f64,

    /// YOLO: skip writing data.yaml
    #[arg(long = "no_data_yaml")]
    pub no_data_yaml: bool,

    /// VOC: skip writing ImageSets/Main lists
    #[arg(long = "no_imagesets")]
    pub no_imagesets: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ImportArgs {
    /// Directory containing the image files
    #[arg(short = 'i', long = "images")]
    pub images: PathBuf,

    /// Annotation layout
    #[arg(short = 'f', long = "format", value_enum, default_value = "yolo")]
    pub format: Format,

    /// Labels directory (YOLO/VOC) or annotation file (COCO)
    #[arg(short = 'l', long = "labels")]
    pub labels: Option<PathBuf>,

    /// Dataset name
    #[arg(short = 'n', long = "name", default_value = "imported")]
    pub name: String,

    /// Where to write the resulting dataset document
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,

    /// Ordered class names; index is the class id. Read from classes.txt when omitted
    #[arg(long = "classes", use_value_delimiter = true)]
    pub classes: Vec<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ImportConfigArgs {
    /// dataset_config.json or <name>_config.json written by an export
    #[arg(short = 'c', long = "config")]
    pub config: PathBuf,

    /// Where to write the resulting dataset document
    #[arg(short = 'o', long = "output")]
    pub output: PathBuf,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct StatsArgs {
    #[command(flatten)]
    pub input: DatasetArg,

    /// Write summary, class distribution and annotation size CSVs here
    #[arg(long = "report_dir")]
    pub report_dir: Option<PathBuf>,
}

// Supported annotation layouts
#[derive(
    Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, ValueEnum, Debug, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    Yolo,
    Coco,
    Voc,
}

impl Format {
    pub fn name(&self) -> &'static str {
        match self {
            Format::Yolo => "yolo",
            Format::Coco => "coco",
            Format::Voc => "voc",
        }
    }
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct YoloOptions {
    pub create_data_yaml: bool,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            create_data_yaml: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CocoOptions {
    pub min_area: f64,
    pub include_info: bool,
    pub include_licenses: bool,
}

impl Default for CocoOptions {
    fn default() -> Self {
        Self {
            min_area: 0.0,
            include_info: true,
            include_licenses: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VocOptions {
    pub create_imagesets: bool,
    pub segmentation_masks: bool,
}

impl Default for VocOptions {
    fn default() -> Self {
        Self {
            create_imagesets: true,
            segmentation_masks: false,
        }
    }
}

/// Everything an export needs besides the dataset and the output directory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    pub split: SplitRatio,
    pub seed: Option<u64>,
    pub include_images: bool,
    pub compress: bool,
    #[serde(skip)]
    pub progress: bool,
    /// Searched in order for downloaded copies of remote images.
    pub cache_dirs: Vec<PathBuf>,
    pub yolo: YoloOptions,
    pub coco: CocoOptions,
    pub voc: VocOptions,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            split: SplitRatio::default(),
            seed: None,
            include_images: true,
            compress: false,
            progress: false,
            cache_dirs: vec![PathBuf::from("downloads"), PathBuf::from("data/downloads")],
            yolo: YoloOptions::default(),
            coco: CocoOptions::default(),
            voc: VocOptions::default(),
        }
    }
}

impl ExportOptions {
    /// Options for exporting the whole dataset into one tree, without partitioning.
    pub fn unsplit() -> Self {
        Self {
            split: SplitRatio::new(0.0, 0.0, 0.0),
            ..Self::default()
        }
    }
}

impl From<&ExportArgs> for ExportOptions {
    fn from(args: &ExportArgs) -> Self {
        let mut options = ExportOptions {
            split: SplitRatio::new(args.train_size, args.val_size, args.test_size),
            seed: args.seed,
            include_images: !args.no_images,
            compress: args.compress,
            progress: true,
            ..ExportOptions::default()
        };
        options.cache_dirs.extend(args.cache_dirs.iter().cloned());
        options.yolo.create_data_yaml = !args.no_data_yaml;
        options.coco.min_area = args.min_area;
        options.voc.create_imagesets = !args.no_imagesets;
        options
    }
}

/// Where to find annotations when reading a dataset back.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportOptions {
    pub format: Format,
    /// Labels directory (YOLO/VOC) or annotation file (COCO). Inferred from the images
    /// directory's parent when unset.
    pub labels: Option<PathBuf>,
    /// Provenance file; defaults to `image_info.json` next to the images directory.
    pub image_info: Option<PathBuf>,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            format: Format::Yolo,
            labels: None,
            image_info: None,
        }
    }
}

// Validate that the size is between 0.0 and 1.0
fn validate_size(s: &str) -> Result<f64, String> {
    match f64::from_str(s) {
        Ok(val) if (0.0..=1.0).contains(&val) => Ok(val),
        _ => Err("SIZE must be between 0.0 and 1.0".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_size() {
        assert!(validate_size("0.5").is_ok());
        assert!(validate_size("1.0").is_ok());
        assert!(validate_size("0.0").is_ok());
        assert!(validate_size("-0.1").is_err());
        assert!(validate_size("1.1").is_err());
        assert!(validate_size("abc").is_err());
    }

    #[test]
    fn test_export_args_to_options() {
        let args = Args::parse_from([
            "yolo-dataset-manager",
            "export",
            "-d",
            "set.json",
            "--format",
            "coco",
            "--test_size",
            "0.1",
            "--seed",
            "9",
            "--min_area",
            "25",
            "--no_images",
        ]);
        let Command::Export(export) = args.command else {
            panic!("expected export subcommand");
        };
        assert_eq!(export.format, Format::Coco);
        let options = ExportOptions::from(&export);
        assert_eq!(options.seed, Some(9));
        assert!(!options.include_images);
        assert_eq!(options.coco.min_area, 25.0);
        assert_eq!(options.split, SplitRatio::new(0.8, 0.2, 0.1));
    }

    #[test]
    fn test_options_deserialize_with_defaults() {
        let options: ExportOptions = serde_json::from_str(r#"{"compress": true}"#).unwrap();
        assert!(options.compress);
        assert!(options.include_images);
        assert!(options.yolo.create_data_yaml);
    }
}
