//! COCO format data structures and utilities
//!
//! This module holds the serde model of a COCO detection file and a writer that hands out
//! sequential image and annotation ids while a dataset is being encoded.

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::ClassMap;
use crate::types::Metadata;

/// COCO dataset information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Info {
    pub year: i32,
    pub version: String,
    pub description: String,
    pub contributor: String,
    #[serde(default)]
    pub url: String,
    pub date_created: String,
}

impl Info {
    pub fn new(name: &str, version: &str, created_at: DateTime<Utc>, metadata: &Metadata) -> Self {
        Self {
            year: created_at.year(),
            version: version.to_string(),
            description: name.to_string(),
            contributor: metadata_str(metadata, "contributor").to_string(),
            url: String::new(),
            date_created: created_at.to_rfc3339(),
        }
    }
}

/// COCO license information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct License {
    pub id: u32,
    pub name: String,
    pub url: String,
}

impl License {
    pub fn from_metadata(metadata: &Metadata) -> Self {
        let name = metadata_str(metadata, "license_name");
        Self {
            id: 1,
            name: if name.is_empty() { "Unknown" } else { name }.to_string(),
            url: metadata_str(metadata, "license_url").to_string(),
        }
    }
}

fn metadata_str<'a>(metadata: &'a Metadata, key: &str) -> &'a str {
    metadata
        .get(key)
        .and_then(|value| value.as_str())
        .unwrap_or_default()
}

/// COCO category information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: u32,
    pub name: String,
    #[serde(default = "default_supercategory")]
    pub supercategory: String,
}

fn default_supercategory() -> String {
    "none".to_string()
}

/// COCO image information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Image {
    pub id: u64,
    pub file_name: String,
    pub width: u32,
    pub height: u32,
    #[serde(default = "default_license")]
    pub license: u32,
    #[serde(default)]
    pub coco_url: String,
    #[serde(default)]
    pub flickr_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_captured: Option<String>,
}

fn default_license() -> u32 {
    1
}

/// COCO annotation information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Annotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u32,
    pub bbox: Vec<f64>, // [x, y, width, height]
    #[serde(default)]
    pub area: f64,
    #[serde(default)]
    pub iscrowd: u32,
    #[serde(default)]
    pub segmentation: Vec<Vec<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Complete COCO dataset structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CocoFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub info: Option<Info>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub licenses: Option<Vec<License>>,
    pub images: Vec<Image>,
    pub annotations: Vec<Annotation>,
    pub categories: Vec<Category>,
}

/// Writer for COCO format datasets; ids start at 1
pub struct CocoWriter {
    next_image_id: u64,
    next_annotation_id: u64,
    categories: Vec<Category>,
    images: Vec<Image>,
    annotations: Vec<Annotation>,
}

impl Default for CocoWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl CocoWriter {
    pub fn new() -> Self {
        Self {
            next_image_id: 1,
            next_annotation_id: 1,
            categories: Vec::new(),
            images: Vec::new(),
            annotations: Vec::new(),
        }
    }

    /// Add categories to the COCO dataset, keeping the dataset's class ids
    pub fn add_categories(&mut self, classes: &ClassMap) {
        self.categories = classes
            .iter()
            .map(|(&id, name)| Category {
                id,
                name: name.clone(),
                supercategory: default_supercategory(),
            })
            .collect();
    }

    /// Add an image to the COCO dataset
    pub fn add_image(
        &mut self,
        file_name: String,
        width: u32,
        height: u32,
        date_captured: Option<String>,
    ) -> u64 {
        let image_id = self.next_image_id;
        self.next_image_id += 1;
        self.images.push(Image {
            id: image_id,
            file_name,
            width,
            height,
            license: default_license(),
            coco_url: String::new(),
            flickr_url: String::new(),
            date_captured,
        });
        image_id
    }

    /// Add an annotation to the COCO dataset
    pub fn add_annotation(&mut self, image_id: u64, category_id: u32, bbox: [f64; 4]) -> u64 {
        let annotation_id = self.next_annotation_id;
        self.next_annotation_id += 1;
        self.annotations.push(Annotation {
            id: annotation_id,
            image_id,
            category_id,
            bbox: bbox.to_vec(),
            area: bbox[2] * bbox[3],
            iscrowd: 0,
            segmentation: Vec::new(),
            score: None,
        });
        annotation_id
    }

    /// Build the complete COCO dataset structure
    pub fn build(self, info: Option<Info>, licenses: Option<Vec<License>>) -> CocoFile {
        CocoFile {
            info,
            licenses,
            images: self.images,
            annotations: self.annotations,
            categories: self.categories,
        }
    }
}
