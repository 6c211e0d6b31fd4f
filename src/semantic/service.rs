//! Semantic index engine.
//!
//! Owns the embedding model and the corpus index:
//! - Builds the index from an image directory (blocking, startup phase)
//! - Answers text queries with the top-K most similar images
//! - Publishes rebuilt indexes by swapping an `Arc`, so in-flight searches
//!   keep the snapshot they started with

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Instant;

use indicatif::{ProgressBar, ProgressStyle};

use crate::semantic::embeddings::{Embedder, EmbeddingError};
use crate::semantic::index::{CorpusIndex, IndexError, SearchHit};
use crate::semantic::scan::{self, DecodedImage, ScanError};

/// Default number of images per embedding call.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Errors surfaced by the engine to its callers.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("No valid images found in {0}")]
    EmptyCorpus(PathBuf),

    #[error("Engine is not ready (state: {0})")]
    NotReady(EngineState),

    #[error("No images indexed yet")]
    EmptyIndex,

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Index error: {0}")]
    Index(IndexError),

    #[error("Scan error: {0}")]
    Scan(#[from] ScanError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<IndexError> for EngineError {
    fn from(err: IndexError) -> Self {
        match err {
            IndexError::Empty => EngineError::EmptyIndex,
            IndexError::InvalidTopK => {
                EngineError::InvalidQuery("top_k must be at least 1".to_string())
            }
            other => EngineError::Index(other),
        }
    }
}

/// Engine lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineState {
    Uninitialized,
    Indexing,
    Ready,
    Failed,
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EngineState::Uninitialized => "uninitialized",
            EngineState::Indexing => "indexing",
            EngineState::Ready => "ready",
            EngineState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Tuning knobs for index construction.
#[derive(Debug, Clone)]
pub struct IndexOptions {
    /// Images per embedding call
    pub batch_size: usize,
    /// Decode threads; 0 lets rayon pick
    pub decode_threads: usize,
    /// Draw a progress bar on stderr while embedding
    pub show_progress: bool,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            decode_threads: 0,
            show_progress: false,
        }
    }
}

/// A candidate file left out of the index.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub path: String,
    pub reason: String,
}

/// Summary of one indexing pass.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    /// Files with an accepted extension
    pub candidates: usize,
    pub indexed: usize,
    pub skipped: Vec<SkippedFile>,
    pub dimensions: usize,
    /// SHA-256 over the indexed identifiers, in order
    pub fingerprint: String,
    pub elapsed_ms: u128,
}

/// Text-to-image semantic search over a directory of images.
pub struct SemanticEngine {
    embedder: Arc<dyn Embedder>,
    options: IndexOptions,
    state: RwLock<EngineState>,
    /// Published snapshot; replaced wholesale, never mutated in place.
    index: RwLock<Option<Arc<CorpusIndex>>>,
    /// Serializes builds.
    build_lock: Mutex<()>,
}

impl SemanticEngine {
    /// Create an engine in the `Uninitialized` state.
    pub fn new(embedder: Arc<dyn Embedder>, options: IndexOptions) -> Self {
        Self {
            embedder,
            options,
            state: RwLock::new(EngineState::Uninitialized),
            index: RwLock::new(None),
            build_lock: Mutex::new(()),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
            .read()
            .map(|guard| *guard)
            .unwrap_or(EngineState::Failed)
    }

    pub fn is_ready(&self) -> bool {
        self.state() == EngineState::Ready
    }

    /// Get the number of indexed images. Returns 0 before the first build.
    pub fn indexed_count(&self) -> usize {
        self.snapshot().map(|index| index.len()).unwrap_or(0)
    }

    pub fn dimensions(&self) -> usize {
        self.embedder.dimensions()
    }

    /// Current published index, if any.
    pub fn snapshot(&self) -> Option<Arc<CorpusIndex>> {
        self.index.read().ok().and_then(|guard| guard.clone())
    }

    /// Build the index from `dir` and publish it.
    ///
    /// Blocks until every image has been decoded and embedded. On the first
    /// build a failure leaves the engine `Failed`; when an index is already
    /// live it stays published and the engine stays `Ready`.
    pub fn build_index(&self, dir: &Path) -> Result<IndexReport, EngineError> {
        let _build = self
            .build_lock
            .lock()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;

        let had_index = self.snapshot().is_some();
        if !had_index {
            self.set_state(EngineState::Indexing)?;
        }

        match self.index_directory(dir) {
            Ok((index, report)) => {
                self.publish(index)?;
                self.set_state(EngineState::Ready)?;
                log::info!(
                    "Indexed {} of {} images from {} ({} dims, fingerprint {}, {} ms)",
                    report.indexed,
                    report.candidates,
                    dir.display(),
                    report.dimensions,
                    &report.fingerprint[..12],
                    report.elapsed_ms
                );
                Ok(report)
            }
            Err(e) => {
                if had_index {
                    log::error!("Re-index of {} failed, keeping previous index: {}", dir.display(), e);
                } else {
                    log::error!("Indexing {} failed: {}", dir.display(), e);
                    self.set_state(EngineState::Failed)?;
                }
                Err(e)
            }
        }
    }

    /// Rebuild a live index from `dir` and swap it in atomically.
    pub fn reindex(&self, dir: &Path) -> Result<IndexReport, EngineError> {
        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::NotReady(state));
        }
        self.build_index(dir)
    }

    /// Search for the images most similar to `query`.
    ///
    /// Results are sorted by descending score with ties in corpus order.
    /// `top_k` above the corpus size is clamped.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchHit>, EngineError> {
        if query.trim().is_empty() {
            return Err(EngineError::InvalidQuery("query must not be empty".to_string()));
        }
        if top_k == 0 {
            return Err(EngineError::InvalidQuery("top_k must be at least 1".to_string()));
        }

        let state = self.state();
        if state != EngineState::Ready {
            return Err(EngineError::NotReady(state));
        }
        let index = self.snapshot().ok_or(EngineError::EmptyIndex)?;

        let query_embedding = self.embedder.encode_text(query)?;
        let hits = index.search(&query_embedding, top_k)?;

        log::debug!("query {:?} top_k={} -> {} hits", query, top_k, hits.len());
        Ok(hits)
    }

    fn set_state(&self, next: EngineState) -> Result<(), EngineError> {
        let mut guard = self
            .state
            .write()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        if *guard != next {
            log::info!("Engine state {} -> {}", *guard, next);
            *guard = next;
        }
        Ok(())
    }

    fn publish(&self, index: CorpusIndex) -> Result<(), EngineError> {
        let mut guard = self
            .index
            .write()
            .map_err(|e| EngineError::Internal(format!("Lock poisoned: {}", e)))?;
        *guard = Some(Arc::new(index));
        Ok(())
    }

    /// Scan, decode and embed `dir` into a fresh index without publishing it.
    fn index_directory(&self, dir: &Path) -> Result<(CorpusIndex, IndexReport), EngineError> {
        let started = Instant::now();
        let candidates = scan::discover_images(dir)?;
        log::info!(
            "Indexing {} candidate images from {} with '{}'",
            candidates.len(),
            dir.display(),
            self.embedder.name()
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.options.decode_threads)
            .build()
            .map_err(|e| EngineError::Internal(format!("Failed to build decode pool: {}", e)))?;

        let batch_size = self.options.batch_size.max(1);
        let progress = self.progress_bar(candidates.len());

        let mut index = CorpusIndex::with_capacity(self.embedder.dimensions(), candidates.len());
        let mut skipped = Vec::new();

        for chunk in candidates.chunks(batch_size) {
            let mut decoded = Vec::with_capacity(chunk.len());
            for result in scan::decode_batch(chunk, &pool) {
                match result {
                    Ok(image) => decoded.push(image),
                    Err(e) => {
                        log::warn!("{}", e);
                        skipped.push(SkippedFile {
                            path: e.path.to_string_lossy().into_owned(),
                            reason: e.source.to_string(),
                        });
                    }
                }
            }

            for (image, vector) in self.embed_batch(&decoded, &mut skipped) {
                index.push(image.identifier.clone(), &vector)?;
            }

            log::debug!("Embedded batch of {} ({} decoded)", chunk.len(), decoded.len());
            progress.inc(chunk.len() as u64);
        }
        progress.finish_and_clear();

        if index.is_empty() {
            return Err(EngineError::EmptyCorpus(dir.to_path_buf()));
        }

        let report = IndexReport {
            candidates: candidates.len(),
            indexed: index.len(),
            skipped,
            dimensions: index.dimensions(),
            fingerprint: fingerprint(index.identifiers()),
            elapsed_ms: started.elapsed().as_millis(),
        };

        Ok((index, report))
    }

    /// Embed one batch. If the whole batch fails, retry image by image and
    /// skip the ones that still fail.
    fn embed_batch<'a>(
        &self,
        images: &'a [DecodedImage],
        skipped: &mut Vec<SkippedFile>,
    ) -> Vec<(&'a DecodedImage, Vec<f32>)> {
        match self.embedder.encode_images(images) {
            Ok(vectors) => images.iter().zip(vectors).collect(),
            Err(e) => {
                log::warn!(
                    "Batch of {} images failed to embed ({}), retrying one by one",
                    images.len(),
                    e
                );
                images
                    .iter()
                    .filter_map(|image| {
                        match self.embedder.encode_images(std::slice::from_ref(image)) {
                            Ok(mut vectors) => vectors.pop().map(|v| (image, v)),
                            Err(e) => {
                                log::warn!("Skipping {}: {}", image.path.display(), e);
                                skipped.push(SkippedFile {
                                    path: image.identifier.clone(),
                                    reason: e.to_string(),
                                });
                                None
                            }
                        }
                    })
                    .collect()
            }
        }
    }

    fn progress_bar(&self, total: usize) -> ProgressBar {
        if !self.options.show_progress {
            return ProgressBar::hidden();
        }

        let bar = ProgressBar::new(total as u64);
        if let Ok(style) =
            ProgressStyle::with_template("{spinner} indexing [{bar:40}] {pos}/{len} ({eta})")
        {
            bar.set_style(style.progress_chars("=> "));
        }
        bar
    }
}

/// Hex SHA-256 over identifiers in order, newline separated.
pub fn fingerprint(identifiers: &[String]) -> String {
    let mut hasher = Sha256::new();
    for id in identifiers {
        hasher.update(id.as_bytes());
        hasher.update(b"\n");
    }
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
