//! In-memory corpus index with exact top-K similarity search.
//!
//! Identifiers and vectors are kept in parallel, insertion-ordered storage.
//! All vectors are unit length, so cosine similarity is a plain dot product.

use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::semantic::embeddings::l2_norm;

/// Allowed deviation from unit norm for stored and query vectors.
pub const NORM_TOLERANCE: f32 = 1e-4;

/// Search result from the corpus index.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    /// Corpus identifier (image path)
    pub identifier: String,
    /// Cosine similarity score (-1.0 to 1.0), unrounded
    pub score: f32,
}

/// Immutable-after-build corpus of (identifier, unit vector) pairs.
#[derive(Debug, Clone)]
pub struct CorpusIndex {
    identifiers: Vec<String>,
    /// Row-major, `dimensions` floats per item
    vectors: Vec<f32>,
    dimensions: usize,
}

/// Errors that can occur during index operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Vector is not unit length (norm {0})")]
    NotNormalized(f32),

    #[error("Index is empty")]
    Empty,

    #[error("top_k must be at least 1")]
    InvalidTopK,
}

/// Heap entry ordered so that the *worst* candidate is the greatest:
/// lower score first, then later insertion position.
#[derive(Debug, Clone, Copy)]
struct Candidate {
    score: f32,
    position: usize,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .score
            .total_cmp(&self.score)
            .then_with(|| self.position.cmp(&other.position))
    }
}

impl CorpusIndex {
    /// Create a new empty index with specified dimensions.
    pub fn new(dimensions: usize) -> Self {
        Self::with_capacity(dimensions, 0)
    }

    /// Create an index with pre-allocated capacity.
    pub fn with_capacity(dimensions: usize, capacity: usize) -> Self {
        Self {
            identifiers: Vec::with_capacity(capacity),
            vectors: Vec::with_capacity(capacity * dimensions),
            dimensions,
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn len(&self) -> usize {
        self.identifiers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identifiers.is_empty()
    }

    /// Identifiers in insertion order.
    pub fn identifiers(&self) -> &[String] {
        &self.identifiers
    }

    /// Vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        if position >= self.len() {
            return None;
        }
        let start = position * self.dimensions;
        Some(&self.vectors[start..start + self.dimensions])
    }

    /// Iterate over (identifier, vector) pairs in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f32])> {
        self.identifiers
            .iter()
            .map(String::as_str)
            .zip(self.vectors.chunks_exact(self.dimensions.max(1)))
    }

    /// Append an item. The vector must have the index's dimensions and unit norm.
    pub fn push(&mut self, identifier: String, vector: &[f32]) -> Result<(), IndexError> {
        self.check_vector(vector)?;
        self.identifiers.push(identifier);
        self.vectors.extend_from_slice(vector);
        Ok(())
    }

    /// Exact top-K search by dot product.
    ///
    /// `top_k` larger than the corpus is clamped. Ties keep insertion order.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        if top_k == 0 {
            return Err(IndexError::InvalidTopK);
        }
        if self.is_empty() {
            return Err(IndexError::Empty);
        }
        self.check_vector(query)?;

        let k = top_k.min(self.len());
        let mut heap: BinaryHeap<Candidate> = BinaryHeap::with_capacity(k + 1);

        for (position, row) in self.vectors.chunks_exact(self.dimensions).enumerate() {
            heap.push(Candidate {
                score: dot(query, row),
                position,
            });

            // Keep only top-k by dropping the worst when the heap overflows
            if heap.len() > k {
                heap.pop();
            }
        }

        // Ascending by Ord is best-first
        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|c| SearchHit {
                identifier: self.identifiers[c.position].clone(),
                score: c.score,
            })
            .collect())
    }

    fn check_vector(&self, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dimensions {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimensions,
                got: vector.len(),
            });
        }

        let norm = l2_norm(vector);
        if !((norm - 1.0).abs() <= NORM_TOLERANCE) {
            return Err(IndexError::NotNormalized(norm));
        }

        Ok(())
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
