//! Shared fixtures: a deterministic color encoder and image writers.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::semantic::{DecodedImage, Embedder, EmbeddingError, IndexOptions, SemanticEngine};

/// Marker in a file name that makes any batch containing it fail to embed.
pub const POISON: &str = "poison";

/// Embeds an image as its mean RGB color and a text as a named color.
///
/// "black" maps to the zero vector, so it exercises the degenerate path.
#[derive(Default)]
pub struct ColorEmbedder {
    pub image_calls: AtomicUsize,
    pub text_calls: AtomicUsize,
}

impl ColorEmbedder {
    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn text_calls(&self) -> usize {
        self.text_calls.load(Ordering::SeqCst)
    }
}

impl Embedder for ColorEmbedder {
    fn name(&self) -> &str {
        "mean-color"
    }

    fn dimensions(&self) -> usize {
        3
    }

    fn embed_images_raw(&self, images: &[DecodedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.image_calls.fetch_add(1, Ordering::SeqCst);

        if images.iter().any(|img| img.identifier.contains(POISON)) {
            return Err(EmbeddingError::EmbeddingFailed("poisoned batch".to_string()));
        }

        Ok(images
            .iter()
            .map(|img| {
                let mut sum = [0f32; 3];
                for pixel in img.image.pixels() {
                    for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                        *acc += channel as f32 / 255.0;
                    }
                }
                let count = (img.image.width() * img.image.height()).max(1) as f32;
                sum.iter().map(|s| s / count).collect()
            })
            .collect())
    }

    fn embed_text_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.text_calls.fetch_add(1, Ordering::SeqCst);

        match text.trim().to_lowercase().as_str() {
            "red" => Ok(vec![1.0, 0.0, 0.0]),
            "green" => Ok(vec![0.0, 1.0, 0.0]),
            "blue" => Ok(vec![0.0, 0.0, 1.0]),
            "orange" => Ok(vec![1.0, 0.5, 0.0]),
            "black" => Ok(vec![0.0, 0.0, 0.0]),
            other => Err(EmbeddingError::EmbeddingFailed(format!("unknown color {other:?}"))),
        }
    }
}

/// Write a small solid-color image; the format follows the extension.
pub fn write_image(dir: &Path, name: &str, rgb: [u8; 3]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    image::RgbImage::from_pixel(4, 4, image::Rgb(rgb))
        .save(&path)
        .unwrap();
    path
}

pub fn write_garbage(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"this is not an image").unwrap();
    path
}

/// red, orange, green, blue as PNGs.
pub fn palette_corpus(dir: &Path) {
    write_image(dir, "blue.png", [0, 0, 255]);
    write_image(dir, "green.png", [0, 255, 0]);
    write_image(dir, "orange.png", [255, 128, 0]);
    write_image(dir, "red.png", [255, 0, 0]);
}

pub fn engine_with(batch_size: usize) -> (Arc<SemanticEngine>, Arc<ColorEmbedder>) {
    let embedder = Arc::new(ColorEmbedder::default());
    let options = IndexOptions {
        batch_size,
        decode_threads: 2,
        show_progress: false,
    };
    let engine = Arc::new(SemanticEngine::new(embedder.clone(), options));
    (engine, embedder)
}

pub fn file_name(identifier: &str) -> &str {
    Path::new(identifier)
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(identifier)
}
