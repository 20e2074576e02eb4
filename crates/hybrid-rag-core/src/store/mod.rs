//! Document and chunk storage abstraction.
//!
//! The [`ChunkStore`] holds the authoritative chunk sets and document
//! records. The lexical and vector indices only return chunk ids; the
//! retriever resolves them here, and the context builder reads text and
//! attribution from the resolved chunks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, DocumentRecord, IndexStats, ResolvedChunk};

/// Storage backend for document records and their chunks.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_document`](ChunkStore::get_document) | Indexed record of one document |
/// | [`list_documents`](ChunkStore::list_documents) | Every record, ordered by id |
/// | [`replace_document`](ChunkStore::replace_document) | Commit a document's record and full chunk set |
/// | [`remove_document`](ChunkStore::remove_document) | Delete a record and all its chunks |
/// | [`get_chunks`](ChunkStore::get_chunks) | Resolve chunk ids for ranking and attribution |
/// | [`document_chunks`](ChunkStore::document_chunks) | All chunks of one document, in order |
/// | [`stats`](ChunkStore::stats) | Aggregate counts for the audit surface |
#[async_trait]
pub trait ChunkStore: Send + Sync {
    async fn get_document(&self, id: &str) -> Result<Option<DocumentRecord>>;

    async fn list_documents(&self) -> Result<Vec<DocumentRecord>>;

    /// Content hash of the committed chunk set, if the document is indexed.
    async fn content_hash(&self, id: &str) -> Result<Option<String>> {
        Ok(self.get_document(id).await?.map(|r| r.content_hash))
    }

    /// Replace the record and every chunk of `record.id` in one step.
    async fn replace_document(&self, record: &DocumentRecord, chunks: &[Chunk]) -> Result<()>;

    /// Returns `false` if the document was not indexed.
    async fn remove_document(&self, id: &str) -> Result<bool>;

    /// Resolve chunk ids. Unknown ids are skipped.
    async fn get_chunks(&self, ids: &[String]) -> Result<Vec<ResolvedChunk>>;

    async fn document_chunks(&self, document_id: &str) -> Result<Vec<Chunk>>;

    /// Counts and timestamps. `embedded_count` is left at zero; the vector
    /// index owns that number.
    async fn stats(&self) -> Result<IndexStats>;
}
