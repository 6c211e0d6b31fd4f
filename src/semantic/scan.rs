//! Corpus discovery and image decoding.
//!
//! Walks an image directory recursively, keeps files with an accepted image
//! extension and decodes them into RGB on a rayon pool.

use image::{ImageReader, RgbImage};
use rayon::prelude::*;
use std::path::{Path, PathBuf};

/// File extensions accepted as corpus images (compared case-insensitively).
pub const ACCEPTED_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// A successfully decoded corpus image.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    /// Stable identifier reported in search results (the path as discovered)
    pub identifier: String,
    pub path: PathBuf,
    /// Pixels in the canonical RGB8 color model
    pub image: RgbImage,
}

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("Cannot read image directory {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),
}

/// A candidate file that could not be decoded. Recovered per item.
#[derive(Debug, thiserror::Error)]
#[error("Failed to decode {path}: {source}")]
pub struct ImageDecodeError {
    pub path: PathBuf,
    #[source]
    pub source: image::ImageError,
}

/// Check whether a path carries an accepted image extension.
pub fn is_accepted_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            ACCEPTED_EXTENSIONS
                .iter()
                .any(|accepted| ext.eq_ignore_ascii_case(accepted))
        })
        .unwrap_or(false)
}

/// Recursively enumerate candidate images under `dir`, sorted by path.
///
/// The root must be a readable directory. Unreadable subdirectories are
/// logged and skipped. Symlinked directories are not followed.
pub fn discover_images(dir: &Path) -> Result<Vec<PathBuf>, ScanError> {
    if !dir.is_dir() {
        return Err(ScanError::NotADirectory(dir.to_path_buf()));
    }

    let root = std::fs::read_dir(dir).map_err(|source| ScanError::Unreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut found = Vec::new();
    let mut pending = vec![root];

    while let Some(entries) = pending.pop() {
        for entry in entries.filter_map(|entry| entry.ok()) {
            let path = entry.path();
            let is_dir = entry.file_type().map(|ft| ft.is_dir()).unwrap_or(false);

            if is_dir {
                match std::fs::read_dir(&path) {
                    Ok(sub) => pending.push(sub),
                    Err(e) => log::warn!("Skipping unreadable directory {}: {}", path.display(), e),
                }
            } else if path.is_file() && is_accepted_image(&path) {
                found.push(path);
            }
        }
    }

    found.sort();
    Ok(found)
}

/// Decode a single file into RGB, sniffing the real format from its content.
pub fn decode_image(path: &Path) -> Result<DecodedImage, ImageDecodeError> {
    let to_err = |source: image::ImageError| ImageDecodeError {
        path: path.to_path_buf(),
        source,
    };

    let image = ImageReader::open(path)
        .map_err(|e| to_err(image::ImageError::IoError(e)))?
        .with_guessed_format()
        .map_err(|e| to_err(image::ImageError::IoError(e)))?
        .decode()
        .map_err(to_err)?
        .to_rgb8();

    Ok(DecodedImage {
        identifier: path.to_string_lossy().into_owned(),
        path: path.to_path_buf(),
        image,
    })
}

/// Decode a slice of paths on `pool`. Output order matches input order.
pub fn decode_batch(
    paths: &[PathBuf],
    pool: &rayon::ThreadPool,
) -> Vec<Result<DecodedImage, ImageDecodeError>> {
    pool.install(|| paths.par_iter().map(|path| decode_image(path)).collect())
}
