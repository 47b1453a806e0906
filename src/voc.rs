//! Pascal VOC annotation documents: an event-based XML writer and a lenient serde reader.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use serde::Deserialize;
use std::io::Cursor;

use crate::error::ExportError;

pub const VOC_FOLDER: &str = "JPEGImages";
pub const VOC_DATABASE: &str = "YOLO Dataset Manager";

/// One `<object>` entry with pixel corners.
#[derive(Debug, Clone, PartialEq)]
pub struct VocObject {
    pub name: String,
    pub pose: String,
    pub truncated: bool,
    pub difficult: bool,
    pub xmin: u32,
    pub ymin: u32,
    pub xmax: u32,
    pub ymax: u32,
}

impl VocObject {
    pub fn new(name: impl Into<String>, corners: (u32, u32, u32, u32)) -> Self {
        let (xmin, ymin, xmax, ymax) = corners;
        Self {
            name: name.into(),
            pose: "Unspecified".to_string(),
            truncated: false,
            difficult: false,
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }
}

/// A complete `<annotation>` document for one image.
#[derive(Debug, Clone, PartialEq)]
pub struct VocDocument {
    pub filename: String,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    /// Emits `<segmented>` and an empty `<segmentation/>` per object when set.
    pub segmentation_masks: bool,
    pub objects: Vec<VocObject>,
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn write_element<W: std::io::Write>(
    writer: &mut Writer<W>,
    name: &str,
    value: &str,
) -> Result<(), ExportError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    writer.write_event(Event::Text(BytesText::new(value)))?;
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

fn start<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), ExportError> {
    writer.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

fn end<W: std::io::Write>(writer: &mut Writer<W>, name: &str) -> Result<(), ExportError> {
    writer.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

impl VocDocument {
    /// Render the document with two-space indentation.
    pub fn to_xml(&self) -> Result<String, ExportError> {
        let mut writer = Writer::new_with_indent(Cursor::new(Vec::new()), b' ', 2);
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

        start(&mut writer, "annotation")?;
        write_element(&mut writer, "folder", VOC_FOLDER)?;
        write_element(&mut writer, "filename", &self.filename)?;

        start(&mut writer, "source")?;
        write_element(&mut writer, "database", VOC_DATABASE)?;
        end(&mut writer, "source")?;

        start(&mut writer, "size")?;
        write_element(&mut writer, "width", &self.width.to_string())?;
        write_element(&mut writer, "height", &self.height.to_string())?;
        write_element(&mut writer, "depth", &self.depth.to_string())?;
        end(&mut writer, "size")?;

        if self.segmentation_masks {
            write_element(&mut writer, "segmented", "0")?;
        }

        for object in &self.objects {
            start(&mut writer, "object")?;
            write_element(&mut writer, "name", &object.name)?;
            write_element(&mut writer, "pose", &object.pose)?;
            write_element(&mut writer, "truncated", flag(object.truncated))?;
            write_element(&mut writer, "difficult", flag(object.difficult))?;

            start(&mut writer, "bndbox")?;
            write_element(&mut writer, "xmin", &object.xmin.to_string())?;
            write_element(&mut writer, "ymin", &object.ymin.to_string())?;
            write_element(&mut writer, "xmax", &object.xmax.to_string())?;
            write_element(&mut writer, "ymax", &object.ymax.to_string())?;
            end(&mut writer, "bndbox")?;

            if self.segmentation_masks {
                writer.write_event(Event::Empty(BytesStart::new("segmentation")))?;
            }
            end(&mut writer, "object")?;
        }
        end(&mut writer, "annotation")?;

        String::from_utf8(writer.into_inner().into_inner()).map_err(|e| ExportError::Format {
            format: "voc",
            message: e.to_string(),
        })
    }
}

/// `<annotation>` as found on disk. Every field is optional so one bad object does not
/// reject the whole file.
#[derive(Debug, Default, Deserialize)]
pub struct RawVocDocument {
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub size: Option<RawVocSize>,
    #[serde(default, rename = "object")]
    pub objects: Vec<RawVocObject>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawVocSize {
    #[serde(default)]
    pub width: Option<String>,
    #[serde(default)]
    pub height: Option<String>,
}

impl RawVocSize {
    /// Declared `(width, height)`, if both parse.
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        let width = self.width.as_deref()?.trim().parse().ok()?;
        let height = self.height.as_deref()?.trim().parse().ok()?;
        Some((width, height))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RawVocObject {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub bndbox: Option<RawVocBox>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawVocBox {
    #[serde(default)]
    pub xmin: Option<String>,
    #[serde(default)]
    pub ymin: Option<String>,
    #[serde(default)]
    pub xmax: Option<String>,
    #[serde(default)]
    pub ymax: Option<String>,
}

fn parse_coordinate(value: &Option<String>, field: &str) -> Result<f64, String> {
    let raw = value
        .as_deref()
        .ok_or_else(|| format!("missing <{field}>"))?;
    raw.trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid <{field}> {raw:?}: {e}"))
}

impl RawVocObject {
    /// Class name and `(xmin, ymin, xmax, ymax)` pixel corners.
    pub fn parse(&self) -> Result<(&str, [f64; 4]), String> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or("missing <name>")?;
        let bndbox = self.bndbox.as_ref().ok_or("missing <bndbox>")?;
        let corners = [
            parse_coordinate(&bndbox.xmin, "xmin")?,
            parse_coordinate(&bndbox.ymin, "ymin")?,
            parse_coordinate(&bndbox.xmax, "xmax")?,
            parse_coordinate(&bndbox.ymax, "ymax")?,
        ];
        if corners[2] <= corners[0] || corners[3] <= corners[1] {
            return Err(format!("degenerate box {corners:?}"));
        }
        Ok((name, corners))
    }
}

/// Parse an annotation document.
pub fn parse_voc_xml(xml: &str) -> Result<RawVocDocument, quick_xml::DeError> {
    quick_xml::de::from_str(xml)
}
