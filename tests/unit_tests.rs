use std::fs;
use std::path::{Path, PathBuf};

use yolo_dataset_manager::io::{read_classes_txt, read_image_info};
use yolo_dataset_manager::{
    export_dataset, import_dataset_config, import_from_local, Annotation, BoundingBox, ClassMap,
    Dataset, ExportOptions, Format, Image, ImportOptions, ImageSource, Location, SplitRatio,
};

fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    image::RgbImage::new(width, height).save(&path).unwrap();
    path
}

fn sign_classes() -> ClassMap {
    ClassMap::from([(0, "stop".to_string()), (1, "yield".to_string())])
}

fn local_image(id: &str, path: PathBuf, width: u32, height: u32) -> Image {
    Image::new(id, Location::local(path), width, height, ImageSource::Local).unwrap()
}

fn assert_close(a: f64, b: f64, eps: f64) {
    assert!((a - b).abs() < eps, "{a} != {b} (eps {eps})");
}

fn assert_same_boxes(original: &Image, decoded: &Image, eps: f64) {
    assert_eq!(original.annotations.len(), decoded.annotations.len());
    for (a, b) in original.annotations.iter().zip(&decoded.annotations) {
        assert_eq!(a.class_id, b.class_id);
        assert_close(a.bbox.x(), b.bbox.x(), eps);
        assert_close(a.bbox.y(), b.bbox.y(), eps);
        assert_close(a.bbox.width(), b.bbox.width(), eps);
        assert_close(a.bbox.height(), b.bbox.height(), eps);
    }
}

/// Three images with a couple of boxes each, stored under `<root>/source`.
fn sample_dataset(root: &Path) -> Dataset {
    let source = root.join("source");
    let mut dataset = Dataset::new("signs", sign_classes());
    let boxes = [
        vec![(0, 0.123456, 0.234567, 0.3, 0.4), (1, 0.5, 0.5, 0.25, 0.125)],
        vec![(1, 0.05, 0.6, 0.33, 0.2)],
        vec![(0, 0.7, 0.1, 0.2, 0.2), (0, 0.0, 0.0, 0.5, 0.5), (1, 0.4, 0.4, 0.1, 0.3)],
    ];
    for (index, image_boxes) in boxes.iter().enumerate() {
        let path = write_png(&source, &format!("img{index}.png"), 640, 480);
        let mut image = local_image(&format!("id{index}"), path, 640, 480);
        for &(class_id, x, y, w, h) in image_boxes {
            image.add_annotation(Annotation::new(class_id, BoundingBox::new(x, y, w, h)));
        }
        dataset.add_image(image);
    }
    dataset
}

fn find<'a>(dataset: &'a Dataset, file_stem: &str) -> &'a Image {
    dataset
        .images
        .iter()
        .find(|image| image.file_stem() == file_stem)
        .unwrap()
}

#[test]
fn test_yolo_export_example_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_png(&dir.path().join("source"), "sign.png", 100, 100);
    let mut image = local_image("1", path, 100, 100);
    image.add_annotation(Annotation::new(0, BoundingBox::new(0.1, 0.1, 0.2, 0.2)));
    let mut dataset = Dataset::new("example", sign_classes());
    dataset.add_image(image);

    let out = dir.path().join("out");
    export_dataset(&dataset, Format::Yolo, Some(&out), &ExportOptions::unsplit()).unwrap();

    assert_eq!(
        fs::read_to_string(out.join("labels/sign.txt")).unwrap(),
        "0 0.200000 0.200000 0.200000 0.200000\n"
    );
    assert_eq!(fs::read_to_string(out.join("classes.txt")).unwrap(), "stop\nyield\n");
    assert!(out.join("images/sign.png").is_file());
    assert!(out.join("data.yaml").is_file());
    assert!(out.join("dataset_config.json").is_file());
    assert!(out.join("example_config.json").is_file());

    let info = read_image_info(&out.join("image_info.json")).unwrap();
    assert_eq!(info["sign.png"].id, "1");
    assert_eq!((info["sign.png"].width, info["sign.png"].height), (100, 100));
}

#[test]
fn test_yolo_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = sample_dataset(dir.path());
    let out = dir.path().join("yolo");
    export_dataset(&dataset, Format::Yolo, Some(&out), &ExportOptions::unsplit()).unwrap();

    let decoded = Format::Yolo
        .decode(&out.join("images"), &out.join("labels"), &dataset.classes)
        .unwrap();
    assert_eq!(decoded.images.len(), 3);
    for original in &dataset.images {
        let restored = find(&decoded, &original.file_stem());
        assert_eq!(restored.id, original.id);
        assert_same_boxes(original, restored, 1e-4);
    }
}

#[test]
fn test_yolo_unknown_class_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("images"), "a.png", 64, 64);
    fs::create_dir_all(dir.path().join("labels")).unwrap();
    fs::write(dir.path().join("labels/a.txt"), "5 0.5 0.5 0.2 0.2\n").unwrap();

    let mut dataset = Dataset::new("unknown", sign_classes());
    let added = import_from_local(
        &mut dataset,
        &dir.path().join("images"),
        &ImportOptions::default(),
    )
    .unwrap();
    assert_eq!(added, 1);
    assert_eq!(dataset.images.len(), 1);
    assert!(dataset.images[0].annotations.is_empty());
}

#[test]
fn test_import_reads_sibling_classes() {
    let dir = tempfile::tempdir().unwrap();
    write_png(&dir.path().join("images"), "a.png", 50, 40);
    fs::create_dir_all(dir.path().join("labels")).unwrap();
    fs::write(dir.path().join("labels/a.txt"), "1 0.5 0.5 0.2 0.5\n").unwrap();
    fs::write(dir.path().join("classes.txt"), "stop\nyield\n").unwrap();

    let mut dataset = Dataset::new("sibling", ClassMap::new());
    import_from_local(&mut dataset, &dir.path().join("images"), &ImportOptions::default())
        .unwrap();
    assert_eq!(dataset.classes, sign_classes());
    let annotation = &dataset.images[0].annotations[0];
    assert_eq!(annotation.class_id, 1);
    assert_close(annotation.bbox.x(), 0.4, 1e-9);
    assert_close(annotation.bbox.y(), 0.25, 1e-9);
    assert!(dataset.validate().is_valid());
}

#[test]
fn test_coco_export_area_min_area_and_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut dataset = sample_dataset(dir.path());
    dataset.images[1].add_annotation(Annotation::new(0, BoundingBox::new(0.9, 0.9, 0.002, 0.002)));

    let out = dir.path().join("coco");
    let mut options = ExportOptions::unsplit();
    options.coco.min_area = 4.0;
    export_dataset(&dataset, Format::Coco, Some(&out), &options).unwrap();

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(out.join("annotations.json")).unwrap()).unwrap();
    let images = json["images"].as_array().unwrap();
    let annotations = json["annotations"].as_array().unwrap();
    assert_eq!(images.len(), 3);
    assert_eq!(images[0]["id"], 1);
    assert_eq!(annotations.len(), 6);
    assert_eq!(json["categories"][1]["name"], "yield");
    assert!(json["info"].is_object());

    for (index, annotation) in annotations.iter().enumerate() {
        assert_eq!(annotation["id"], index as u64 + 1);
        assert_eq!(annotation["iscrowd"], 0);
        let bbox: Vec<f64> = annotation["bbox"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_f64().unwrap())
            .collect();
        let area = annotation["area"].as_f64().unwrap();
        assert_close(area, bbox[2] * bbox[3], 1e-6);
        assert!(area >= 4.0);
    }

    let decoded = Format::Coco
        .decode(&out.join("images"), &out, &ClassMap::new())
        .unwrap();
    assert_eq!(decoded.classes, sign_classes());
    let mut original = dataset.images[1].clone();
    original.annotations.pop();
    let restored = find(&decoded, "img1");
    assert_same_boxes(&original, restored, 1e-9);
    assert_eq!(restored.annotations[0].confidence(), Some(1.0));
}

#[test]
fn test_voc_round_trip_within_one_pixel() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = sample_dataset(dir.path());
    let out = dir.path().join("voc");
    export_dataset(&dataset, Format::Voc, Some(&out), &ExportOptions::unsplit()).unwrap();

    assert!(out.join("Annotations/img0.xml").is_file());
    assert!(out.join("JPEGImages/img0.png").is_file());
    assert_eq!(
        fs::read_to_string(out.join("ImageSets/Main/trainval.txt")).unwrap(),
        "img0\nimg1\nimg2\n"
    );
    assert_eq!(read_classes_txt(&out.join("classes.txt")).unwrap(), sign_classes());

    let decoded = Format::Voc
        .decode(&out.join("JPEGImages"), &out.join("Annotations"), &dataset.classes)
        .unwrap();
    for original in &dataset.images {
        let restored = find(&decoded, &original.file_stem());
        assert_same_boxes(original, restored, 1.0 / 480.0 + 1e-9);
    }
}

#[test]
fn test_split_export_omits_empty_test_partition() {
    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source");
    let mut dataset = Dataset::new("split", sign_classes());
    for index in 0..10 {
        let path = write_png(&source, &format!("s{index}.png"), 32, 32);
        let mut image = local_image(&index.to_string(), path, 32, 32);
        image.add_annotation(Annotation::new(index % 2, BoundingBox::new(0.25, 0.25, 0.5, 0.5)));
        dataset.add_image(image);
    }

    let out = dir.path().join("out");
    let options = ExportOptions {
        split: SplitRatio::new(0.8, 0.2, 0.0),
        seed: Some(7),
        ..ExportOptions::unsplit()
    };
    export_dataset(&dataset, Format::Yolo, Some(&out), &options).unwrap();

    let count = |subset: &str| fs::read_dir(out.join(subset).join("labels")).unwrap().count();
    assert_eq!(count("train"), 8);
    assert_eq!(count("val"), 2);
    assert!(!out.join("test").exists());
    assert!(out.join("split_config.json").is_file());
}

#[test]
fn test_import_dataset_config_restores_dataset() {
    let dir = tempfile::tempdir().unwrap();
    let mut dataset = sample_dataset(dir.path());
    dataset.version = "2.1.0".to_string();
    let out = dir.path().join("yolo");
    export_dataset(&dataset, Format::Yolo, Some(&out), &ExportOptions::unsplit()).unwrap();

    let restored = import_dataset_config(&out.join("dataset_config.json")).unwrap();
    assert_eq!(restored.name, "signs");
    assert_eq!(restored.version, "2.1.0");
    assert_eq!(restored.classes, sign_classes());
    assert_eq!(restored.images.len(), 3);
    assert_eq!(restored.total_annotations(), dataset.total_annotations());
}

#[test]
fn test_compressed_export() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = sample_dataset(dir.path());
    let out = dir.path().join("packed");
    let options = ExportOptions {
        compress: true,
        include_images: false,
        ..ExportOptions::unsplit()
    };
    let archive_path = export_dataset(&dataset, Format::Voc, Some(&out), &options).unwrap();
    assert_eq!(archive_path, dir.path().join("packed.zip"));

    let archive = zip::ZipArchive::new(fs::File::open(&archive_path).unwrap()).unwrap();
    let names: Vec<&str> = archive.file_names().collect();
    assert!(names.contains(&"packed/classes.txt"));
    assert!(names.contains(&"packed/Annotations/img2.xml"));
    assert!(!names.iter().any(|name| name.starts_with("packed/JPEGImages")));
}
