//! Semantic image search over a local corpus.
//!
//! Images and text are embedded into one vector space by a multimodal model
//! and ranked against each other with exact cosine similarity.
//!
//! # Architecture
//!
//! - `embeddings`: Embedding model contract, normalization, fastembed CLIP backend
//! - `scan`: Recursive image discovery and RGB decoding
//! - `index`: In-memory corpus index with bounded top-K search
//! - `service`: Engine lifecycle, index construction and querying

pub mod embeddings;
mod index;
mod scan;
mod service;

pub use embeddings::{ClipEmbedder, Embedder, EmbeddingError};
pub use index::SearchHit;
pub use scan::DecodedImage;
pub use service::{EngineError, EngineState, IndexOptions, IndexReport, SemanticEngine};

/// Default embedding model (CLIP ViT-B/32 vision and text towers)
pub const DEFAULT_MODEL: &str = "clip-vit-b-32";
