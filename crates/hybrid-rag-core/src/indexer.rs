//! Idempotent document indexing.
//!
//! [`Indexer::index_document`] compares the document's SHA-256 content hash
//! with the committed one and does nothing when they match. Otherwise it
//! chunks and embeds the text, then swaps the document's chunk set in
//! three steps:
//!
//! 1. **Stage.** The new chunks go into the lexical index and their vectors
//!    into the vector index, next to the old entries.
//! 2. **Commit.** [`ChunkStore::replace_document`] writes the record and the
//!    new chunk set in one step. Retrieval resolves every candidate through
//!    the store, so this is the moment the new version becomes visible.
//! 3. **Prune.** Lexical and vector entries that are not part of the new
//!    chunk set are deleted.
//!
//! A failure while staging or committing prunes the staged entries back to
//! the previously committed chunk ids, leaving the old version retrievable.
//! A failure while pruning only leaves unresolvable ids behind, which the
//! next swap of the same document sweeps away.
//!
//! # Locking
//!
//! One async mutex per document id serializes writers of that document.
//! Nothing is locked across documents, so searches and writes to other
//! documents proceed while a swap is in flight.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_text, reassemble, sha256_hex};
use crate::embedding::Embedder;
use crate::error::{EmbedError, IndexError};
use crate::lexical::LexicalIndex;
use crate::models::{Chunk, Document, DocumentRecord, IndexStats};
use crate::settings::ChunkingSettings;
use crate::store::ChunkStore;
use crate::vector::VectorIndex;

/// The shared index resources, injected into the indexer and retriever.
#[derive(Clone)]
pub struct Indexes {
    pub lexical: Arc<dyn LexicalIndex>,
    pub vectors: Arc<dyn VectorIndex>,
    pub store: Arc<dyn ChunkStore>,
}

impl Indexes {
    pub fn new(
        lexical: Arc<dyn LexicalIndex>,
        vectors: Arc<dyn VectorIndex>,
        store: Arc<dyn ChunkStore>,
    ) -> Self {
        Self {
            lexical,
            vectors,
            store,
        }
    }

    /// Store statistics plus the vector count.
    pub async fn stats(&self) -> anyhow::Result<IndexStats> {
        let mut stats = self.store.stats().await?;
        stats.embedded_count = self.vectors.len().await?;
        Ok(stats)
    }
}

/// Result of indexing one document.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IndexOutcome {
    /// The chunk set was replaced. `embedded` is false for lexical-only
    /// indexing (embeddings disabled).
    Indexed { chunks: usize, embedded: bool },
    /// Content hash matched the committed one.
    Unchanged,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexFailure {
    pub document_id: String,
    pub error: String,
}

/// Per-document outcome of [`Indexer::index_bulk`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct BulkReport {
    pub outcomes: Vec<(String, IndexOutcome)>,
    pub failures: Vec<IndexFailure>,
}

impl BulkReport {
    pub fn indexed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| matches!(o, IndexOutcome::Indexed { .. }))
            .count()
    }

    pub fn unchanged(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|(_, o)| *o == IndexOutcome::Unchanged)
            .count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub(crate) fn record(&mut self, document_id: String, outcome: Result<IndexOutcome, IndexError>) {
        match outcome {
            Ok(outcome) => self.outcomes.push((document_id, outcome)),
            Err(e) => {
                warn!(document_id = %document_id, error = %e, "document failed to index");
                self.failures.push(IndexFailure {
                    document_id,
                    error: e.to_string(),
                });
            }
        }
    }
}

pub struct Indexer {
    indexes: Indexes,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkingSettings,
    batch_size: usize,
    doc_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Indexer {
    pub fn new(indexes: Indexes, embedder: Arc<dyn Embedder>, chunking: ChunkingSettings) -> Self {
        Self {
            indexes,
            embedder,
            chunking,
            batch_size: 64,
            doc_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Texts per embedding call.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn indexes(&self) -> &Indexes {
        &self.indexes
    }

    /// Index one document, replacing its previous chunk set if the content
    /// changed.
    pub async fn index_document(&self, doc: &Document) -> Result<IndexOutcome, IndexError> {
        self.index_guarded(doc, false).await
    }

    async fn index_guarded(&self, doc: &Document, force: bool) -> Result<IndexOutcome, IndexError> {
        if doc.id.trim().is_empty() {
            return Err(IndexError::InvalidDocument(
                "document id must not be empty".to_string(),
            ));
        }

        let lock = self.doc_lock(&doc.id)?;
        let outcome = {
            let _doc_guard = lock.lock().await;
            self.index_locked(doc, force).await
        };
        self.release_doc_lock(&doc.id, lock);
        outcome
    }

    async fn index_locked(&self, doc: &Document, force: bool) -> Result<IndexOutcome, IndexError> {
        let content_hash = sha256_hex(&doc.text);
        let committed = self
            .indexes
            .store
            .content_hash(&doc.id)
            .await
            .map_err(IndexError::Storage)?;
        if !force && committed.as_deref() == Some(content_hash.as_str()) {
            debug!(document_id = %doc.id, "content unchanged, skipping");
            return Ok(IndexOutcome::Unchanged);
        }

        let now = chrono::Utc::now().timestamp();
        let chunks = chunk_text(&doc.id, &doc.text, &self.chunking, now);

        let vectors = match self.embed_chunks(&chunks).await {
            Ok(v) => Some(v),
            Err(EmbedError::Disabled) => None,
            Err(e) => {
                warn!(document_id = %doc.id, error = %e, "embedding failed, document not indexed");
                return Err(e.into());
            }
        };
        let embedded = vectors.is_some();
        let entries: Vec<(String, Vec<f32>)> = match vectors {
            Some(vectors) => chunks.iter().map(|c| c.id.clone()).zip(vectors).collect(),
            None => Vec::new(),
        };

        let record = DocumentRecord {
            id: doc.id.clone(),
            source_kind: doc.source_kind,
            origin_ref: doc.origin_ref.clone(),
            content_hash,
            updated_at: doc.updated_at,
            indexed_at: now,
            chunk_count: chunks.len(),
            provenance: doc.provenance.clone(),
        };

        let previous: Vec<String> = self
            .indexes
            .store
            .document_chunks(&doc.id)
            .await
            .map_err(IndexError::Storage)?
            .into_iter()
            .map(|c| c.id)
            .collect();

        if let Err(e) = self.stage_and_commit(&record, &chunks, &entries).await {
            warn!(document_id = %doc.id, error = %e, "swap failed, restoring previous chunk set");
            self.prune(&doc.id, &previous).await;
            return Err(IndexError::Storage(e));
        }

        let current: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        self.prune(&doc.id, &current).await;

        info!(
            document_id = %doc.id,
            source_kind = %doc.source_kind,
            chunks = chunks.len(),
            embedded,
            "indexed document"
        );
        Ok(IndexOutcome::Indexed {
            chunks: chunks.len(),
            embedded,
        })
    }

    async fn stage_and_commit(
        &self,
        record: &DocumentRecord,
        chunks: &[Chunk],
        entries: &[(String, Vec<f32>)],
    ) -> anyhow::Result<()> {
        self.indexes.lexical.insert_chunks(chunks).await?;
        self.indexes.vectors.insert_batch(&record.id, entries).await?;
        self.indexes.store.replace_document(record, chunks).await
    }

    /// Drop lexical and vector entries of `document_id` outside `keep`.
    async fn prune(&self, document_id: &str, keep: &[String]) {
        if let Err(e) = self.indexes.lexical.retain_document(document_id, keep).await {
            warn!(document_id, error = %e, "failed to prune lexical entries");
        }
        if let Err(e) = self.indexes.vectors.retain_document(document_id, keep).await {
            warn!(document_id, error = %e, "failed to prune vectors");
        }
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;
            if embedded.len() != texts.len() {
                return Err(EmbedError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    texts.len(),
                    embedded.len()
                )));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Delete a document and everything derived from it. Returns `false` if
    /// it was not indexed.
    ///
    /// The store row goes first, so the document stops resolving before its
    /// index entries are deleted.
    pub async fn remove_document(&self, id: &str) -> Result<bool, IndexError> {
        let lock = self.doc_lock(id)?;
        let removed = {
            let _doc_guard = lock.lock().await;
            let removed = self.indexes.store.remove_document(id).await;
            if removed.is_ok() {
                self.prune(id, &[]).await;
            }
            removed
        };
        self.release_doc_lock(id, lock);
        let removed = removed.map_err(IndexError::Storage)?;
        if removed {
            info!(document_id = %id, "removed document");
        }
        Ok(removed)
    }

    /// Re-chunk and re-embed every committed document, ignoring content
    /// hashes. Used after changing chunking settings or the embedding
    /// model. Document text is rebuilt from the stored chunks.
    pub async fn reindex_all(&self) -> Result<BulkReport, IndexError> {
        let records = self
            .indexes
            .store
            .list_documents()
            .await
            .map_err(IndexError::Storage)?;
        info!(documents = records.len(), "starting full reindex");

        let mut report = BulkReport::default();
        for record in records {
            let outcome = match self.indexes.store.document_chunks(&record.id).await {
                Ok(chunks) => {
                    let doc = Document {
                        id: record.id.clone(),
                        source_kind: record.source_kind,
                        origin_ref: record.origin_ref,
                        text: reassemble(&chunks),
                        updated_at: record.updated_at,
                        provenance: record.provenance,
                    };
                    self.index_guarded(&doc, true).await
                }
                Err(e) => Err(IndexError::Storage(e)),
            };
            report.record(record.id, outcome);
        }
        info!(
            indexed = report.indexed(),
            failed = report.failures.len(),
            "full reindex finished"
        );
        Ok(report)
    }

    /// Index every document, collecting failures instead of aborting.
    pub async fn index_bulk(&self, docs: &[Document]) -> BulkReport {
        let mut report = BulkReport::default();
        for doc in docs {
            let outcome = self.index_document(doc).await;
            report.record(doc.id.clone(), outcome);
        }
        info!(
            total = docs.len(),
            indexed = report.indexed(),
            unchanged = report.unchanged(),
            failed = report.failures.len(),
            "bulk index finished"
        );
        report
    }

    fn doc_lock(&self, id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, IndexError> {
        let mut locks = self
            .doc_locks
            .lock()
            .map_err(|_| IndexError::Storage(anyhow::anyhow!("document lock table poisoned")))?;
        Ok(locks.entry(id.to_string()).or_default().clone())
    }

    /// Drop the table entry once no other task holds or waits on it.
    fn release_doc_lock(&self, id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        if let Ok(mut locks) = self.doc_locks.lock() {
            // the table and `lock` account for two references
            if Arc::strong_count(&lock) <= 2 {
                locks.remove(id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{DisabledEmbedder, HashEmbedder};
    use crate::lexical::MemoryLexicalIndex;
    use crate::models::SourceKind;
    use crate::query::parse_query;
    use crate::store::memory::MemoryChunkStore;
    use crate::vector::MemoryVectorIndex;

    fn indexes() -> Indexes {
        Indexes::new(
            Arc::new(MemoryLexicalIndex::new()),
            Arc::new(MemoryVectorIndex::new()),
            Arc::new(MemoryChunkStore::new()),
        )
    }

    fn doc(id: &str, text: &str) -> Document {
        Document {
            id: id.to_string(),
            source_kind: SourceKind::Source,
            origin_ref: format!("page-{id}"),
            text: text.to_string(),
            updated_at: 1_700_000_000,
            provenance: None,
        }
    }

    fn small_chunks() -> ChunkingSettings {
        ChunkingSettings {
            chunk_size: 8,
            chunk_overlap: 2,
        }
    }

    #[tokio::test]
    async fn test_reindex_unchanged_is_noop() {
        let idx = indexes();
        let indexer = Indexer::new(idx.clone(), Arc::new(HashEmbedder::new(32)), small_chunks());
        let text = "one two three four five six seven eight nine ten eleven twelve thirteen";

        let first = indexer.index_document(&doc("d1", text)).await.unwrap();
        let IndexOutcome::Indexed { chunks, embedded } = first else {
            panic!("expected Indexed, got {first:?}");
        };
        assert!(embedded);
        let before = idx.store.document_chunks("d1").await.unwrap();
        assert_eq!(before.len(), chunks);

        let second = indexer.index_document(&doc("d1", text)).await.unwrap();
        assert_eq!(second, IndexOutcome::Unchanged);
        assert_eq!(idx.store.document_chunks("d1").await.unwrap(), before);
        assert_eq!(idx.lexical.len().await.unwrap(), chunks);
        assert_eq!(idx.vectors.len().await.unwrap(), chunks);
    }

    #[tokio::test]
    async fn test_changed_content_replaces_chunk_set() {
        let idx = indexes();
        let indexer = Indexer::new(idx.clone(), Arc::new(HashEmbedder::new(32)), small_chunks());

        indexer
            .index_document(&doc("d1", "ancient content about volcanoes"))
            .await
            .unwrap();
        indexer
            .index_document(&doc("d1", "fresh content about glaciers"))
            .await
            .unwrap();

        assert!(idx
            .lexical
            .search(&parse_query("volcanoes"), 10)
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            idx.lexical
                .search(&parse_query("glaciers"), 10)
                .await
                .unwrap()
                .len(),
            1
        );
        assert_eq!(idx.vectors.len().await.unwrap(), 1);
        assert_eq!(idx.store.stats().await.unwrap().document_count, 1);
    }

    #[tokio::test]
    async fn test_disabled_embedder_indexes_lexically() {
        let idx = indexes();
        let indexer = Indexer::new(idx.clone(), Arc::new(DisabledEmbedder), small_chunks());

        let outcome = indexer
            .index_document(&doc("d1", "lexical only please"))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Indexed {
                chunks: 1,
                embedded: false
            }
        );
        assert_eq!(idx.lexical.len().await.unwrap(), 1);
        assert_eq!(idx.vectors.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_blank_document_has_no_chunks() {
        let idx = indexes();
        let indexer = Indexer::new(idx.clone(), Arc::new(HashEmbedder::new(8)), small_chunks());
        let outcome = indexer.index_document(&doc("d1", "   ")).await.unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Indexed {
                chunks: 0,
                embedded: true
            }
        );
        let stats = idx.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.chunk_count, 0);
    }

    #[tokio::test]
    async fn test_empty_id_rejected() {
        let indexer = Indexer::new(indexes(), Arc::new(HashEmbedder::new(8)), small_chunks());
        let err = indexer.index_document(&doc(" ", "text")).await.unwrap_err();
        assert!(matches!(err, IndexError::InvalidDocument(_)));
    }

    #[tokio::test]
    async fn test_remove_document_cascades() {
        let idx = indexes();
        let indexer = Indexer::new(idx.clone(), Arc::new(HashEmbedder::new(16)), small_chunks());
        indexer
            .index_document(&doc("d1", "alpha beta gamma"))
            .await
            .unwrap();
        indexer
            .index_document(&doc("d2", "delta epsilon"))
            .await
            .unwrap();

        assert!(indexer.remove_document("d1").await.unwrap());
        assert!(!indexer.remove_document("d1").await.unwrap());

        let stats = idx.stats().await.unwrap();
        assert_eq!(stats.document_count, 1);
        assert_eq!(stats.embedded_count, 1);
        assert_eq!(idx.lexical.len().await.unwrap(), 1);
        assert!(indexer.doc_locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_document() {
        let idx = indexes();
        let indexer = Arc::new(Indexer::new(
            idx.clone(),
            Arc::new(HashEmbedder::new(16)),
            small_chunks(),
        ));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let indexer = indexer.clone();
            handles.push(tokio::spawn(async move {
                indexer
                    .index_document(&doc("d1", "the same text every time, written by many tasks"))
                    .await
                    .unwrap()
            }));
        }
        let mut indexed = 0;
        for h in handles {
            if matches!(h.await.unwrap(), IndexOutcome::Indexed { .. }) {
                indexed += 1;
            }
        }
        assert_eq!(indexed, 1);
        let chunks = idx.store.document_chunks("d1").await.unwrap();
        assert_eq!(idx.lexical.len().await.unwrap(), chunks.len());
    }

    #[tokio::test]
    async fn test_reindex_all_applies_new_chunking() {
        let idx = indexes();
        let text = "one two three four five six seven eight nine ten eleven twelve";
        let coarse = Indexer::new(
            idx.clone(),
            Arc::new(DisabledEmbedder),
            ChunkingSettings {
                chunk_size: 50,
                chunk_overlap: 0,
            },
        );
        coarse.index_document(&doc("d1", text)).await.unwrap();
        coarse.index_document(&doc("d2", "short")).await.unwrap();
        assert_eq!(idx.store.document_chunks("d1").await.unwrap().len(), 1);

        let fine = Indexer::new(idx.clone(), Arc::new(HashEmbedder::new(16)), small_chunks());
        let report = fine.reindex_all().await.unwrap();
        assert_eq!(report.indexed(), 2);
        assert!(report.is_clean());

        let chunks = idx.store.document_chunks("d1").await.unwrap();
        assert!(chunks.len() > 1);
        assert_eq!(reassemble(&chunks), text);
        let stats = idx.stats().await.unwrap();
        assert_eq!(stats.embedded_count, stats.chunk_count);
        assert_eq!(idx.lexical.len().await.unwrap(), stats.chunk_count);
        assert_eq!(
            fine.index_document(&doc("d1", text)).await.unwrap(),
            IndexOutcome::Unchanged
        );
    }
}
