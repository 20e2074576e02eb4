//! Nearest-neighbor index abstraction and an in-memory implementation.
//!
//! The index itself only stores and compares vectors. Whether the vector
//! side can take part in a retrieval call also depends on the embedding
//! provider, so the retriever reports that through [`VectorStatus`]
//! rather than returning an empty candidate list.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde::Serialize;

use crate::embedding::cosine_similarity;
use crate::models::ChunkCandidate;

/// Embedding store keyed by chunk id.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Store or overwrite the vector for `chunk_id`.
    async fn insert(&self, chunk_id: &str, document_id: &str, vector: &[f32]) -> Result<()>;

    /// Delete the vectors of every chunk belonging to `document_id`.
    async fn remove_document(&self, document_id: &str) -> Result<()>;

    /// Top `limit` chunks by cosine similarity to `query`, best first.
    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>>;

    /// Number of stored vectors.
    async fn len(&self) -> Result<usize>;

    /// Store `(chunk_id, vector)` pairs for `document_id`. Backends may do
    /// this in one transaction.
    async fn insert_batch(&self, document_id: &str, entries: &[(String, Vec<f32>)]) -> Result<()> {
        for (chunk_id, vector) in entries {
            self.insert(chunk_id, document_id, vector).await?;
        }
        Ok(())
    }

    /// Delete the vectors of `document_id` whose chunk ids are not in `keep`.
    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()>;
}

/// Availability of the vector side for one retrieval call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VectorStatus {
    Available,
    Unavailable { reason: String },
}

impl VectorStatus {
    pub fn is_available(&self) -> bool {
        matches!(self, VectorStatus::Available)
    }
}

struct StoredVector {
    document_id: String,
    vector: Vec<f32>,
}

/// Brute-force cosine index.
///
/// The first inserted vector fixes the dimensionality; mismatched inserts
/// are rejected.
#[derive(Default)]
pub struct MemoryVectorIndex {
    vectors: RwLock<HashMap<String, StoredVector>>,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn insert(&self, chunk_id: &str, document_id: &str, vector: &[f32]) -> Result<()> {
        if vector.is_empty() {
            bail!("refusing to store empty vector for chunk {}", chunk_id);
        }
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        if let Some(existing) = vectors
            .values()
            .next()
            .filter(|v| v.vector.len() != vector.len()) {
            bail!(
                "dimension mismatch: index holds {}-d vectors, got {}-d for chunk {}",
                existing.vector.len(),
                vector.len(),
                chunk_id
            );
        }
        vectors.insert(
            chunk_id.to_string(),
            StoredVector {
                document_id: document_id.to_string(),
                vector: vector.to_vec(),
            },
        );
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        vectors.retain(|_, v| v.document_id != document_id);
        Ok(())
    }

    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        vectors.retain(|id, v| v.document_id != document_id || keep.contains(id));
        Ok(())
    }

    async fn search(&self, query: &[f32], limit: usize) -> Result<Vec<ChunkCandidate>> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;

        let mut results: Vec<ChunkCandidate> = vectors
            .iter()
            .map(|(chunk_id, v)| ChunkCandidate {
                chunk_id: chunk_id.clone(),
                document_id: v.document_id.clone(),
                raw_score: cosine_similarity(query, &v.vector) as f64,
            })
            .collect();
        results.sort_by(|a, b| {
            b.raw_score
                .partial_cmp(&a.raw_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        results.truncate(limit);
        Ok(results)
    }

    async fn len(&self) -> Result<usize> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow!("vector index lock poisoned"))?;
        Ok(vectors.len())
    }
}
