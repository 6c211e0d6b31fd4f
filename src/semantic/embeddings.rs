//! Embedding model contract and the fastembed-backed CLIP implementation.
//!
//! Provides:
//! - The `Embedder` trait the engine depends on (images and text into a shared space)
//! - L2 normalization with a zero-norm guard
//! - `ClipEmbedder`, a fastembed vision/text model pair

use fastembed::{ImageEmbedding, ImageEmbeddingModel, ImageInitOptions, InitOptions, TextEmbedding};
use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::semantic::scan::DecodedImage;

/// Norms below this are treated as degenerate.
const MIN_NORM: f64 = f64::MIN_POSITIVE;

/// Error type for embedding operations
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Model initialization failed: {0}")]
    InitFailed(String),

    #[error("Embedding generation failed: {0}")]
    EmbeddingFailed(String),

    #[error("Model returned a degenerate embedding (norm {0})")]
    Degenerate(f32),

    #[error("Model returned {got} embeddings for {expected} inputs")]
    CountMismatch { expected: usize, got: usize },

    #[error("Invalid model name: {0}")]
    InvalidModel(String),
}

/// A multimodal encoder mapping images and text into one vector space.
///
/// Implementors supply the raw model outputs; `encode_images` and
/// `encode_text` add the contract on top: one vector per input, in input
/// order, each scaled to unit L2 norm.
pub trait Embedder: Send + Sync {
    /// Human readable model name, used in logs.
    fn name(&self) -> &str;

    /// Dimensionality of the shared embedding space.
    fn dimensions(&self) -> usize;

    /// Raw (not necessarily normalized) image embeddings.
    fn embed_images_raw(&self, images: &[DecodedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Raw (not necessarily normalized) text embedding.
    fn embed_text_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    fn encode_images(&self, images: &[DecodedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if images.is_empty() {
            return Ok(vec![]);
        }

        let raw = self.embed_images_raw(images)?;
        if raw.len() != images.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: images.len(),
                got: raw.len(),
            });
        }

        raw.into_iter().map(normalize).collect()
    }

    fn encode_text(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        normalize(self.embed_text_raw(text)?)
    }
}

/// Compute L2 norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    norm_f64(v) as f32
}

/// Accumulates in f64 so large or tiny components neither overflow nor
/// underflow before the square root.
fn norm_f64(v: &[f32]) -> f64 {
    v.iter()
        .map(|&x| f64::from(x) * f64::from(x))
        .sum::<f64>()
        .sqrt()
}

/// Scale a vector to unit length.
///
/// Fails with `EmbeddingError::Degenerate` when the norm is zero or not finite.
pub fn normalize(mut v: Vec<f32>) -> Result<Vec<f32>, EmbeddingError> {
    let norm = norm_f64(&v);
    if !norm.is_finite() || norm < MIN_NORM {
        return Err(EmbeddingError::Degenerate(norm as f32));
    }

    for x in v.iter_mut() {
        *x = (f64::from(*x) / norm) as f32;
    }
    Ok(v)
}

/// CLIP-style vision/text model pair running locally through fastembed.
/// Uses a Mutex per model because fastembed's embed() requires &mut self.
pub struct ClipEmbedder {
    vision: Mutex<ImageEmbedding>,
    text: Mutex<TextEmbedding>,
    model_name: String,
    dimensions: usize,
}

impl ClipEmbedder {
    /// Load the named model pair, downloading it into `cache_dir/models` on first use.
    pub fn new(model_name: &str, cache_dir: PathBuf) -> Result<Self, EmbeddingError> {
        let (vision_model, text_model) = Self::parse_model_name(model_name)?;

        let models_dir = cache_dir.join("models");
        std::fs::create_dir_all(&models_dir).map_err(|e| {
            EmbeddingError::InitFailed(format!("Failed to create models directory: {}", e))
        })?;

        log::info!("Loading vision model for '{}'", model_name);
        let vision = ImageEmbedding::try_new(
            ImageInitOptions::new(vision_model)
                .with_cache_dir(models_dir.clone())
                .with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        log::info!("Loading text model for '{}'", model_name);
        let mut text = TextEmbedding::try_new(
            InitOptions::new(text_model)
                .with_cache_dir(models_dir)
                .with_show_download_progress(true),
        )
        .map_err(|e| EmbeddingError::InitFailed(e.to_string()))?;

        let dimensions = Self::probe_dimensions(&mut text)?;

        Ok(Self {
            vision: Mutex::new(vision),
            text: Mutex::new(text),
            model_name: model_name.to_string(),
            dimensions,
        })
    }

    /// Parse a model name into the matching fastembed vision and text models.
    fn parse_model_name(
        name: &str,
    ) -> Result<(ImageEmbeddingModel, fastembed::EmbeddingModel), EmbeddingError> {
        match name.to_lowercase().as_str() {
            "clip-vit-b-32" | "clipvitb32" => Ok((
                ImageEmbeddingModel::ClipVitB32,
                fastembed::EmbeddingModel::ClipVitB32,
            )),
            "nomic-embed-v1.5" | "nomicembedv15" => Ok((
                ImageEmbeddingModel::NomicEmbedVisionV15,
                fastembed::EmbeddingModel::NomicEmbedTextV15,
            )),
            _ => Err(EmbeddingError::InvalidModel(format!(
                "Unknown model: {}. Supported models: clip-vit-b-32, nomic-embed-v1.5",
                name
            ))),
        }
    }

    /// Probe the text model to determine embedding dimensions.
    fn probe_dimensions(model: &mut TextEmbedding) -> Result<usize, EmbeddingError> {
        let probe = model
            .embed(vec!["test"], None)
            .map_err(|e| EmbeddingError::InitFailed(format!("Failed to probe dimensions: {}", e)))?;

        probe
            .first()
            .map(|v| v.len())
            .ok_or_else(|| EmbeddingError::InitFailed("Model returned no embedding".to_string()))
    }
}

impl Embedder for ClipEmbedder {
    fn name(&self) -> &str {
        &self.model_name
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed_images_raw(&self, images: &[DecodedImage]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let pixels: Vec<DynamicImage> = images
            .iter()
            .map(|img| DynamicImage::ImageRgb8(img.image.clone()))
            .collect();

        let mut model = self.vision.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        model
            .embed_images(pixels)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))
    }

    fn embed_text_raw(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut model = self.text.lock().map_err(|e| {
            EmbeddingError::EmbeddingFailed(format!("Failed to acquire model lock: {}", e))
        })?;

        let embeddings = model
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("No embedding returned".to_string()))
    }
}
