//! In-memory [`ChunkStore`] for tests and embedded use.
//!
//! Uses a `HashMap` behind `std::sync::RwLock`; a document's record and
//! chunks are swapped under one write lock.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, DocumentRecord, IndexStats, ResolvedChunk};

use super::ChunkStore;

struct StoredDoc {
    record: DocumentRecord,
    chunks: Vec<Chunk>,
}

#[derive(Default)]
struct Inner {
    docs: HashMap<String, StoredDoc>,
    /// chunk id -> document id
    chunk_owner: HashMap<String, String>,
}

/// In-memory chunk store.
#[derive(Default)]
pub struct MemoryChunkStore {
    inner: RwLock<Inner>,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ChunkStore for MemoryChunkStore {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        Ok(inner.docs.get(id).map(|d| d.record.clone()))
    }

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        let mut records: Vec<DocumentRecord> =
            inner.docs.values().map(|d| d.record.clone()).collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(records)
    }

    async fn replace_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        if let Some(old) = inner.docs.remove(&record.id) {
            for c in &old.chunks {
                inner.chunk_owner.remove(&c.id);
            }
        }
        for c in chunks {
            inner.chunk_owner.insert(c.id.clone(), record.id.clone());
        }
        let mut chunks = chunks.to_vec();
        chunks.sort_by_key(|c| c.chunk_index);
        inner.docs.insert(
            record.id.clone(),
            StoredDoc {
                record: record.clone(),
                chunks,
            },
        );
        Ok(())
    }

    async fn remove_document(&self, id: &str) -> Result<bool> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        match inner.docs.remove(id) {
            Some(old) => {
                for c in &old.chunks {
                    inner.chunk_owner.remove(&c.id);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<ResolvedChunk>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(doc) = inner.chunk_owner.get(id).and_then(|d| inner.docs.get(d)) else {
                continue;
            };
            if let Some(chunk) = doc.chunks.iter().find(|c| &c.id == id) {
                out.push(ResolvedChunk {
                    chunk: chunk.clone(),
                    origin_ref: doc.record.origin_ref.clone(),
                    source_kind: doc.record.source_kind,
                    indexed_at: doc.record.indexed_at,
                });
            }
        }
        Ok(out)
    }

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        Ok(inner
            .docs
            .get(document_id)
            .map(|d| d.chunks.clone())
            .unwrap_or_default())
    }

    async fn stats(&self) -> Result<IndexStats> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("chunk store lock poisoned"))?;
        let mut stats = IndexStats {
            document_count: inner.docs.len(),
            ..Default::default()
        };
        for doc in inner.docs.values() {
            stats.chunk_count += doc.chunks.len();
            *stats
                .chunks_by_source
                .entry(doc.record.source_kind.to_string())
                .or_insert(0) += doc.chunks.len();
            stats.last_indexed_at = stats.last_indexed_at.max(Some(doc.record.indexed_at));
        }
        Ok(stats)
    }
}
