//! The format-agnostic dataset every converter reads from and writes into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::ValidationError;
use crate::types::{Image, Location, Metadata};

/// Class id to display name. Ids need not be contiguous.
pub type ClassMap = BTreeMap<u32, String>;

/// Reverse lookup of a class id by its display name.
pub fn class_id_for_name(classes: &ClassMap, name: &str) -> Option<u32> {
    classes
        .iter()
        .find(|(_, class_name)| class_name.as_str() == name)
        .map(|(&id, _)| id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    /// Working directory of the dataset; used to find locally cached copies of remote images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub classes: ClassMap,
    #[serde(default)]
    pub images: Vec<Image>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

/// Outcome of [`Dataset::validate`]. Validation is advisory; callers decide whether to abort.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ValidationReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Turn the report into a hard gate, yielding the first error.
    pub fn into_result(self) -> Result<Vec<String>, ValidationError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error),
            None => Ok(self.warnings),
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct DatasetStats {
    pub total_images: usize,
    pub total_annotations: usize,
    pub annotations_per_class: BTreeMap<u32, usize>,
    pub images_per_class: BTreeMap<u32, usize>,
    pub avg_annotations_per_image: f64,
    pub classes: usize,
}

impl Dataset {
    pub fn new(name: impl Into<String>, classes: ClassMap) -> Self {
        Self {
            name: name.into(),
            version: default_version(),
            path: None,
            classes,
            images: Vec::new(),
            created_at: Utc::now(),
            modified_at: None,
            metadata: Metadata::new(),
        }
    }

    pub fn add_image(&mut self, image: Image) {
        self.images.push(image);
        self.modified_at = Some(Utc::now());
    }

    /// Remove the image with `id`, returning it if it was present.
    pub fn remove_image(&mut self, id: &str) -> Option<Image> {
        let index = self.images.iter().position(|image| image.id == id)?;
        self.modified_at = Some(Utc::now());
        Some(self.images.remove(index))
    }

    pub fn total_annotations(&self) -> usize {
        self.images.iter().map(|image| image.annotations.len()).sum()
    }

    /// A dataset sharing this one's name, classes and metadata but holding `images`.
    pub fn with_images(&self, name: impl Into<String>, images: Vec<Image>) -> Self {
        Self {
            name: name.into(),
            version: self.version.clone(),
            path: self.path.clone(),
            classes: self.classes.clone(),
            images,
            created_at: self.created_at,
            modified_at: self.modified_at,
            metadata: self.metadata.clone(),
        }
    }

    pub fn stats(&self) -> DatasetStats {
        let mut stats = DatasetStats {
            total_images: self.images.len(),
            total_annotations: self.total_annotations(),
            classes: self.classes.len(),
            ..Default::default()
        };

        for image in &self.images {
            let mut seen = BTreeSet::new();
            for annotation in &image.annotations {
                *stats
                    .annotations_per_class
                    .entry(annotation.class_id)
                    .or_default() += 1;
                seen.insert(annotation.class_id);
            }
            for class_id in seen {
                *stats.images_per_class.entry(class_id).or_default() += 1;
            }
        }

        if stats.total_images > 0 {
            stats.avg_annotations_per_image =
                stats.total_annotations as f64 / stats.total_images as f64;
        }
        stats
    }

    /// Check class references, image files and box bounds.
    pub fn validate(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        let undefined: BTreeSet<u32> = self
            .images
            .iter()
            .flat_map(|image| image.annotations.iter())
            .map(|annotation| annotation.class_id)
            .filter(|class_id| !self.classes.contains_key(class_id))
            .collect();
        if !undefined.is_empty() {
            report
                .errors
                .push(ValidationError::UndefinedClasses(undefined.into_iter().collect()));
        }

        for image in &self.images {
            match &image.location {
                Location::Local { path } => {
                    if !path.exists() {
                        report.errors.push(ValidationError::MissingImage(path.clone()));
                    }
                }
                Location::Remote { url, cached } => match cached {
                    Some(path) if !path.exists() => {
                        report.errors.push(ValidationError::MissingImage(path.clone()));
                    }
                    Some(_) => {}
                    None => report
                        .warnings
                        .push(format!("cannot verify remote image without a local copy: {url}")),
                },
            }
        }

        for image in &self.images {
            for annotation in &image.annotations {
                let b = annotation.bbox;
                let reason = if b.x() < 0.0 || b.y() < 0.0 || b.width() <= 0.0 || b.height() <= 0.0
                {
                    Some("negative coordinates or empty extent")
                } else if b.x() + b.width() > 1.0 + f64::EPSILON
                    || b.y() + b.height() > 1.0 + f64::EPSILON
                {
                    Some("box exceeds image bounds")
                } else {
                    None
                };
                if let Some(reason) = reason {
                    report.errors.push(ValidationError::InvalidBox {
                        image_id: image.id.clone(),
                        reason,
                    });
                }
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Annotation, BoundingBox, ImageSource};

    fn sample_image(id: &str, path: PathBuf, class_ids: &[u32]) -> Image {
        let mut image = Image::new(id, Location::local(path), 100, 100, ImageSource::Local).unwrap();
        for &class_id in class_ids {
            image.add_annotation(Annotation::new(class_id, BoundingBox::new(0.1, 0.1, 0.2, 0.2)));
        }
        image
    }

    #[test]
    fn test_class_reverse_lookup() {
        let classes = ClassMap::from([(0, "stop".to_string()), (4, "yield".to_string())]);
        assert_eq!(class_id_for_name(&classes, "yield"), Some(4));
        assert_eq!(class_id_for_name(&classes, "speed"), None);
    }

    #[test]
    fn test_stats() {
        let mut dataset = Dataset::new("d", ClassMap::from([(0, "a".into()), (1, "b".into())]));
        dataset.add_image(sample_image("1", "1.jpg".into(), &[0, 0, 1]));
        dataset.add_image(sample_image("2", "2.jpg".into(), &[1]));

        let stats = dataset.stats();
        assert_eq!(stats.total_images, 2);
        assert_eq!(stats.total_annotations, 4);
        assert_eq!(stats.annotations_per_class[&0], 2);
        assert_eq!(stats.images_per_class[&0], 1);
        assert_eq!(stats.images_per_class[&1], 2);
        assert!((stats.avg_annotations_per_image - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_validate_reports_undefined_classes_and_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("present.jpg");
        std::fs::write(&present, b"x").unwrap();

        let mut dataset = Dataset::new("d", ClassMap::from([(0, "a".into())]));
        dataset.add_image(sample_image("1", present, &[0]));
        assert!(dataset.validate().is_valid());

        dataset.add_image(sample_image("2", dir.path().join("absent.jpg"), &[7]));
        let report = dataset.validate();
        assert!(!report.is_valid());
        assert!(report
            .errors
            .contains(&ValidationError::UndefinedClasses(vec![7])));
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::MissingImage(_))));
        assert!(report.into_result().is_err());
    }

    #[test]
    fn test_validate_warns_on_uncached_remote() {
        let mut dataset = Dataset::new("d", ClassMap::new());
        dataset.add_image(
            Image::new(
                "r",
                Location::parse("https://example.com/r.jpg"),
                10,
                10,
                ImageSource::Remote,
            )
            .unwrap(),
        );
        let report = dataset.validate();
        assert!(report.is_valid());
        assert_eq!(report.warnings.len(), 1);
    }

    #[test]
    fn test_remove_image() {
        let mut dataset = Dataset::new("d", ClassMap::new());
        dataset.add_image(sample_image("1", "1.jpg".into(), &[]));
        assert!(dataset.remove_image("missing").is_none());
        assert!(dataset.remove_image("1").is_some());
        assert!(dataset.images.is_empty());
    }
}
