use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ExportError;
use crate::types::{Image, Location};

/// Create a progress bar with the given length and label
pub fn create_progress_bar(len: u64, label: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::default_bar()
            .template(&format!(
                "{{spinner:.green}} [{}] [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} ({{eta}})",
                label
            ))
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb
}

/// A progress bar when `enabled`, otherwise a hidden one.
pub fn optional_progress_bar(enabled: bool, len: usize, label: &str) -> ProgressBar {
    if enabled {
        create_progress_bar(len as u64, label)
    } else {
        ProgressBar::hidden()
    }
}

/// Create `path` and its parents if missing.
pub fn create_output_directory(path: &Path) -> Result<PathBuf, ExportError> {
    fs::create_dir_all(path).map_err(|source| ExportError::OutputDir {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(path.to_path_buf())
}

/// Width and height of an image file, read from its header.
pub fn image_dimensions(path: &Path) -> image::ImageResult<(u32, u32)> {
    image::image_dimensions(path)
}

/// Candidate local files holding the pixels of `image`, in search order.
///
/// Remote images are never downloaded here: the known cached path comes first, then each
/// cache directory, then the dataset's own `images/` folder.
pub fn candidate_paths(image: &Image, dataset_root: Option<&Path>, cache_dirs: &[PathBuf]) -> Vec<PathBuf> {
    match &image.location {
        Location::Local { path } => vec![path.clone()],
        Location::Remote { cached, .. } => {
            let file_name = image.file_name();
            let by_id = format!("{}.jpg", sanitize_filename::sanitize(&image.id));
            let mut candidates: Vec<PathBuf> = cached.iter().cloned().collect();
            for dir in cache_dirs {
                candidates.push(dir.join(&file_name));
                candidates.push(dir.join(&by_id));
            }
            if let Some(root) = dataset_root {
                candidates.push(root.join("images").join(&file_name));
                candidates.push(root.join("images").join(&by_id));
            }
            candidates
        }
    }
}

/// First existing candidate for `image`, if any.
pub fn locate_image(image: &Image, dataset_root: Option<&Path>, cache_dirs: &[PathBuf]) -> Option<PathBuf> {
    candidate_paths(image, dataset_root, cache_dirs)
        .into_iter()
        .find(|candidate| candidate.is_file())
}

/// Copy the pixels of `image` to `dest`. Returns `false` with a warning when no local copy exists.
pub fn copy_image(
    image: &Image,
    dest: &Path,
    dataset_root: Option<&Path>,
    cache_dirs: &[PathBuf],
) -> std::io::Result<bool> {
    match locate_image(image, dataset_root, cache_dirs) {
        Some(source) => {
            if source != dest {
                fs::copy(&source, dest)?;
            }
            debug!("Copied {} to {}", source.display(), dest.display());
            Ok(true)
        }
        None => {
            match &image.location {
                Location::Local { path } => {
                    warn!("Source image not found: {}", path.display())
                }
                Location::Remote { url, .. } => {
                    warn!("No local copy found for remote image {}", url)
                }
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageSource;

    fn remote_image() -> Image {
        Image::new(
            "img7",
            Location::parse("https://example.com/a/photo.jpg"),
            4,
            4,
            ImageSource::Remote,
        )
        .unwrap()
    }

    #[test]
    fn test_candidate_paths_order() {
        let cache = vec![PathBuf::from("downloads")];
        let candidates = candidate_paths(&remote_image(), Some(Path::new("/ds")), &cache);
        assert_eq!(
            candidates,
            vec![
                PathBuf::from("downloads/photo.jpg"),
                PathBuf::from("downloads/img7.jpg"),
                PathBuf::from("/ds/images/photo.jpg"),
                PathBuf::from("/ds/images/img7.jpg"),
            ]
        );
    }

    #[test]
    fn test_locate_image_in_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache = dir.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("img7.jpg"), b"jpeg").unwrap();

        let found = locate_image(&remote_image(), None, &[cache.clone()]);
        assert_eq!(found, Some(cache.join("img7.jpg")));

        let dest = dir.path().join("out.jpg");
        assert!(copy_image(&remote_image(), &dest, None, &[cache]).unwrap());
        assert_eq!(fs::read(dest).unwrap(), b"jpeg");
    }

    #[test]
    fn test_copy_missing_image_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.jpg");
        assert!(!copy_image(&remote_image(), &dest, None, &[]).unwrap());
        assert!(!dest.exists());
    }
}
