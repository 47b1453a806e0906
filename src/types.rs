use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use crate::error::ModelError;

// Image extensions picked up when scanning an import directory
pub const IMG_FORMATS: &[&str] = &["jpg", "jpeg", "png"];

// Precomputed HashSet of image extensions for fast lookup
pub static IMAGE_EXTENSIONS_SET: OnceLock<HashSet<String>> = OnceLock::new();

/// Get the image extensions set
pub fn get_image_extensions_set() -> &'static HashSet<String> {
    IMAGE_EXTENSIONS_SET.get_or_init(|| IMG_FORMATS.iter().map(|ext| ext.to_lowercase()).collect())
}

/// Smallest extent a box may collapse to after clamping.
pub const MIN_BOX_EXTENT: f64 = 0.001;

pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Axis-aligned box in normalized image coordinates, anchored at its top-left corner.
///
/// Out-of-range inputs are clamped rather than rejected, so every stored box satisfies
/// `0 <= x`, `0 <= y`, `0 < width`, `0 < height`, `x + width <= 1` and `y + height <= 1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawBoundingBox")]
pub struct BoundingBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

#[derive(Deserialize)]
struct RawBoundingBox {
    x: f64,
    y: f64,
    width: f64,
    height: f64,
}

impl From<RawBoundingBox> for BoundingBox {
    fn from(raw: RawBoundingBox) -> Self {
        BoundingBox::new(raw.x, raw.y, raw.width, raw.height)
    }
}

fn clamp_unit(v: f64, max: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, max)
    }
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        let x = clamp_unit(x, 1.0 - MIN_BOX_EXTENT);
        let y = clamp_unit(y, 1.0 - MIN_BOX_EXTENT);
        let width = clamp_unit(width, 1.0 - x).max(MIN_BOX_EXTENT);
        let height = clamp_unit(height, 1.0 - y).max(MIN_BOX_EXTENT);
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Build from the YOLO center form `(cx, cy, w, h)`.
    pub fn from_center(cx: f64, cy: f64, width: f64, height: f64) -> Self {
        Self::new(cx - width / 2.0, cy - height / 2.0, width, height)
    }

    /// Build from absolute pixel corners.
    pub fn from_pixel_corners(
        xmin: f64,
        ymin: f64,
        xmax: f64,
        ymax: f64,
        image_width: u32,
        image_height: u32,
    ) -> Self {
        let w = image_width as f64;
        let h = image_height as f64;
        Self::new(xmin / w, ymin / h, (xmax - xmin) / w, (ymax - ymin) / h)
    }

    pub fn x(&self) -> f64 {
        self.x
    }

    pub fn y(&self) -> f64 {
        self.y
    }

    pub fn width(&self) -> f64 {
        self.width
    }

    pub fn height(&self) -> f64 {
        self.height
    }

    pub fn center(&self) -> (f64, f64) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Absolute `[x, y, w, h]` for an image of the given size.
    pub fn to_pixels(&self, image_width: u32, image_height: u32) -> [f64; 4] {
        let w = image_width as f64;
        let h = image_height as f64;
        [self.x * w, self.y * h, self.width * w, self.height * h]
    }

    /// Rounded `(xmin, ymin, xmax, ymax)` pixel corners.
    pub fn to_pixel_corners(&self, image_width: u32, image_height: u32) -> (u32, u32, u32, u32) {
        let w = image_width as f64;
        let h = image_height as f64;
        (
            (self.x * w).round() as u32,
            (self.y * h).round() as u32,
            ((self.x + self.width) * w).round() as u32,
            ((self.y + self.height) * h).round() as u32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnotationKind {
    #[default]
    Bbox,
    Segmentation,
    Keypoint,
}

/// A labelled region of an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub class_id: u32,
    pub bbox: BoundingBox,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    confidence: Option<f64>,
    #[serde(default, rename = "type")]
    pub kind: AnnotationKind,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Annotation {
    pub fn new(class_id: u32, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            bbox,
            confidence: None,
            kind: AnnotationKind::Bbox,
            metadata: Metadata::new(),
        }
    }

    pub fn with_confidence(mut self, confidence: f64) -> Result<Self, ModelError> {
        if !(0.0..=1.0).contains(&confidence) {
            return Err(ModelError::Confidence(confidence));
        }
        self.confidence = Some(confidence);
        Ok(self)
    }

    pub fn confidence(&self) -> Option<f64> {
        self.confidence
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageSource {
    Local,
    Remote,
    Imported,
    Mapillary,
}

impl ImageSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSource::Local => "local",
            ImageSource::Remote => "remote",
            ImageSource::Imported => "imported",
            ImageSource::Mapillary => "mapillary",
        }
    }
}

/// Where the pixels of an image live.
///
/// Resolved once when the image is built so later stages never sniff string prefixes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Location {
    Local {
        path: PathBuf,
    },
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cached: Option<PathBuf>,
    },
}

impl Location {
    /// Classify a raw path string: `http://` and `https://` prefixes are remote.
    pub fn parse(raw: &str) -> Self {
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Location::Remote {
                url: raw.to_string(),
                cached: None,
            }
        } else {
            Location::Local {
                path: PathBuf::from(raw),
            }
        }
    }

    pub fn local(path: impl Into<PathBuf>) -> Self {
        Location::Local { path: path.into() }
    }

    /// The path to read pixels from, if one is known on this machine.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Location::Local { path } => Some(path),
            Location::Remote { cached, .. } => cached.as_deref(),
        }
    }

    /// Last path component, ignoring URL query and fragment.
    pub fn file_name(&self) -> Option<String> {
        match self {
            Location::Local { path } => path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned()),
            Location::Remote { url, .. } => {
                let without_scheme = url.split_once("://").map_or(url.as_str(), |(_, rest)| rest);
                let path_part = without_scheme
                    .split(['?', '#'])
                    .next()
                    .unwrap_or_default();
                let (_, path) = path_part.split_once('/')?;
                path.rsplit('/')
                    .next()
                    .filter(|segment| !segment.is_empty())
                    .map(str::to_string)
            }
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Location::Local { path } => write!(f, "{}", path.display()),
            Location::Remote { url, .. } => f.write_str(url),
        }
    }
}

/// An image and the annotations it owns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    pub id: String,
    pub location: Location,
    width: u32,
    height: u32,
    pub source: ImageSource,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
}

impl Image {
    pub fn new(
        id: impl Into<String>,
        location: Location,
        width: u32,
        height: u32,
        source: ImageSource,
    ) -> Result<Self, ModelError> {
        if width == 0 || height == 0 {
            return Err(ModelError::Dimensions { width, height });
        }
        Ok(Self {
            id: id.into(),
            location,
            width,
            height,
            source,
            annotations: Vec::new(),
            metadata: Metadata::new(),
            created_at: Utc::now(),
            modified_at: None,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn add_annotation(&mut self, annotation: Annotation) {
        self.annotations.push(annotation);
        self.modified_at = Some(Utc::now());
    }

    /// Remove the annotation at `index`, returning it if it existed.
    pub fn remove_annotation(&mut self, index: usize) -> Option<Annotation> {
        if index >= self.annotations.len() {
            return None;
        }
        self.modified_at = Some(Utc::now());
        Some(self.annotations.remove(index))
    }

    /// File name used for this image inside an export tree.
    pub fn file_name(&self) -> String {
        let name = self
            .location
            .file_name()
            .map(|name| sanitize_filename::sanitize(name))
            .filter(|name| !name.is_empty());
        name.unwrap_or_else(|| format!("{}.jpg", sanitize_filename::sanitize(&self.id)))
    }

    /// File name without its extension; label and XML files are named after it.
    pub fn file_stem(&self) -> String {
        let file_name = self.file_name();
        Path::new(&file_name)
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or(file_name)
    }
}

// Counters collected while converting a dataset
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProcessingStats {
    pub images_processed: usize,
    pub images_copied: usize,
    pub missing_images: usize,
    pub annotations_written: usize,
    pub skipped_annotations: usize,
}

impl ProcessingStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn print_summary(&self, label: &str) {
        log::info!("=== {} Summary ===", label);
        log::info!("Images processed: {}", self.images_processed);
        log::info!("Images copied: {}", self.images_copied);
        log::info!("Annotations written: {}", self.annotations_written);

        if self.missing_images > 0 || self.skipped_annotations > 0 {
            log::warn!(
                "Skipped {} annotations; {} images could not be located",
                self.skipped_annotations,
                self.missing_images
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_in_bounds(b: &BoundingBox) {
        assert!(b.x() >= 0.0 && b.x() <= 1.0);
        assert!(b.y() >= 0.0 && b.y() <= 1.0);
        assert!(b.width() > 0.0 && b.width() <= 1.0);
        assert!(b.height() > 0.0 && b.height() <= 1.0);
        assert!(b.x() + b.width() <= 1.0 + 1e-12);
        assert!(b.y() + b.height() <= 1.0 + 1e-12);
    }

    #[test]
    fn test_bbox_clamps_out_of_range_values() {
        let cases = [
            (-0.5, -0.5, 2.0, 2.0),
            (1.0, 1.0, 0.5, 0.5),
            (0.9, 0.9, 0.5, 0.5),
            (0.2, 0.3, 0.0, -1.0),
            (f64::NAN, 0.5, f64::NAN, 0.1),
            (0.5, 0.5, 0.2, 0.2),
        ];
        for (x, y, w, h) in cases {
            assert_in_bounds(&BoundingBox::new(x, y, w, h));
        }
    }

    #[test]
    fn test_bbox_keeps_valid_values() {
        let b = BoundingBox::new(0.1, 0.2, 0.3, 0.4);
        assert_eq!((b.x(), b.y(), b.width(), b.height()), (0.1, 0.2, 0.3, 0.4));
        let (cx, cy) = b.center();
        assert!((cx - 0.25).abs() < 1e-12);
        assert!((cy - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_bbox_deserialize_clamps() {
        let b: BoundingBox =
            serde_json::from_str(r#"{"x": 0.8, "y": -0.1, "width": 0.5, "height": 0.2}"#).unwrap();
        assert!((b.width() - 0.2).abs() < 1e-12);
        assert_eq!(b.y(), 0.0);
    }

    #[test]
    fn test_confidence_range() {
        let bbox = BoundingBox::new(0.1, 0.1, 0.2, 0.2);
        assert!(Annotation::new(0, bbox).with_confidence(0.5).is_ok());
        assert!(Annotation::new(0, bbox).with_confidence(1.5).is_err());
        assert!(Annotation::new(0, bbox).with_confidence(-0.1).is_err());
    }

    #[test]
    fn test_location_parse_and_file_name() {
        let remote = Location::parse("https://cdn.example.com/imgs/abc.jpg?sig=1");
        assert!(matches!(remote, Location::Remote { .. }));
        assert_eq!(remote.file_name().as_deref(), Some("abc.jpg"));
        assert_eq!(remote.local_path(), None);

        let bare = Location::parse("https://cdn.example.com/");
        assert_eq!(bare.file_name(), None);

        let local = Location::parse("/data/set/img_01.png");
        assert_eq!(local.file_name().as_deref(), Some("img_01.png"));
        assert_eq!(local.local_path(), Some(Path::new("/data/set/img_01.png")));
    }

    #[test]
    fn test_image_file_name_falls_back_to_id() {
        let image = Image::new(
            "42",
            Location::parse("https://example.com/"),
            10,
            10,
            ImageSource::Remote,
        )
        .unwrap();
        assert_eq!(image.file_name(), "42.jpg");
        assert_eq!(image.file_stem(), "42");
    }

    #[test]
    fn test_image_rejects_zero_dimensions() {
        assert!(Image::new("a", Location::local("a.jpg"), 0, 10, ImageSource::Local).is_err());
    }

    #[test]
    fn test_annotation_edit_updates_timestamp() {
        let mut image =
            Image::new("a", Location::local("a.jpg"), 10, 10, ImageSource::Local).unwrap();
        assert!(image.modified_at.is_none());
        image.add_annotation(Annotation::new(0, BoundingBox::new(0.1, 0.1, 0.2, 0.2)));
        assert!(image.modified_at.is_some());
        assert!(image.remove_annotation(3).is_none());
        assert!(image.remove_annotation(0).is_some());
        assert!(image.annotations.is_empty());
    }
}
