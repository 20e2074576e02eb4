//! Embedding provider trait, timeout wrapper, and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement.
//! Providers report failure through [`EmbedError`], never through a zero
//! vector, so the retriever can tell "nothing similar" from "the vector
//! side is down".
//!
//! Network providers (OpenAI, Ollama, fastembed) live in the `hybrid-rag`
//! app crate. This module ships the pieces that need no I/O:
//! [`HashEmbedder`] for offline use and tests, [`DisabledEmbedder`] for
//! lexical-only deployments, and [`TimeoutEmbedder`] which bounds any
//! provider call.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::EmbedError;
use crate::query::tokenize_terms;

/// Text → vector function used at index and query time.
///
/// Implementations must be deterministic for identical input.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality (e.g. `1536`).
    fn dims(&self) -> usize;
    /// Embed a batch. The result has one vector per input, in order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>, EmbedError> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        match vectors.pop() {
            Some(v) if vectors.is_empty() => Ok(v),
            _ => Err(EmbedError::InvalidResponse(
                "expected exactly one vector".to_string(),
            )),
        }
    }
}

/// Provider used when embeddings are switched off.
#[derive(Debug, Default, Clone)]
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

/// Deterministic feature-hashing embedder.
///
/// Each term is hashed with SHA-256 into one of `dims` buckets with a
/// ±1 sign, and the vector is L2-normalized. Texts sharing terms get a
/// positive cosine similarity; no model or network is involved.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dims: usize,
}

impl HashEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dims];
        for term in tokenize_terms(text) {
            let digest = Sha256::digest(term.as_bytes());
            let mut bucket_bytes = [0u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            v[bucket] += sign;
        }
        normalize(&mut v);
        v
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    fn model_name(&self) -> &str {
        "feature-hash"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }
}

/// Bounds every call of the wrapped provider.
///
/// An elapsed call becomes [`EmbedError::Timeout`]. Batches whose size
/// or dimensionality does not match are rejected as
/// [`EmbedError::InvalidResponse`].
pub struct TimeoutEmbedder {
    inner: Arc<dyn Embedder>,
    timeout: Duration,
}

impl TimeoutEmbedder {
    pub fn new(inner: Arc<dyn Embedder>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl Embedder for TimeoutEmbedder {
    fn model_name(&self) -> &str {
        self.inner.model_name()
    }

    fn dims(&self) -> usize {
        self.inner.dims()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let vectors = tokio::time::timeout(self.timeout, self.inner.embed(texts))
            .await
            .map_err(|_| EmbedError::Timeout(self.timeout))??;

        if vectors.len() != texts.len() {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        let dims = self.inner.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(EmbedError::InvalidResponse(format!(
                "expected {} dimensions, got {}",
                dims,
                bad.len()
            )));
        }
        Ok(vectors)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left as is.
pub fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use hybrid_rag_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different
/// lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}
