//! Check that the output directory holds exactly one image.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, instrument};

use super::ImageError;
use super::fragment::is_image_file;

/// Return the single image in `dir`.
///
/// Zero images is [`ImageError::Missing`], more than one is
/// [`ImageError::Ambiguous`] listing all of them. A missing directory counts
/// as empty.
#[instrument]
pub fn verify_single_image(dir: &Path) -> Result<PathBuf, ImageError> {
    let mut images = list_images(dir).map_err(|source| ImageError::Io {
        dir: dir.to_path_buf(),
        source,
    })?;

    match images.len() {
        0 => Err(ImageError::Missing {
            dir: dir.to_path_buf(),
        }),
        1 => {
            let image = images.remove(0);
            info!("Using the following ISO: {}", image.display());
            Ok(image)
        }
        _ => Err(ImageError::Ambiguous {
            dir: dir.to_path_buf(),
            files: images,
        }),
    }
}

fn list_images(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut images = Vec::new();
    for entry in entries {
        let entry = entry?;
        let is_image = entry.file_name().to_str().is_some_and(is_image_file);
        if is_image && entry.file_type()?.is_file() {
            images.push(entry.path());
        }
    }
    images.sort();
    Ok(images)
}
