//! Core data models shared by the indexer, retriever, and context builder.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Origin of a document: ingested source material or approved output
/// re-entering through the feedback loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Source,
    Feedback,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Source => "source",
            SourceKind::Feedback => "feedback",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "source" => Some(SourceKind::Source),
            "feedback" => Some(SourceKind::Feedback),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A unit of source content handed to the indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier. Re-indexing the same id replaces its chunk set.
    pub id: String,
    pub source_kind: SourceKind,
    /// Opaque identifier in the external system (file path, page id, ...).
    pub origin_ref: String,
    pub text: String,
    /// Last-modified marker from the source (unix seconds).
    pub updated_at: i64,
    /// Free-form provenance tag, e.g. `approved_post`.
    #[serde(default)]
    pub provenance: Option<String>,
}

/// Indexed state of a document. The text itself lives in its chunks.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentRecord {
    pub id: String,
    pub source_kind: SourceKind,
    pub origin_ref: String,
    /// SHA-256 hex of the text that produced the current chunk set.
    pub content_hash: String,
    pub updated_at: i64,
    /// When the current chunk set was committed (unix seconds).
    pub indexed_at: i64,
    pub chunk_count: usize,
    pub provenance: Option<String>,
}

/// A contiguous token-bounded span of one document's text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    /// 0-based position within the document.
    pub chunk_index: i64,
    pub token_count: usize,
    /// Leading tokens shared with the previous chunk (0 for the first).
    pub overlap_tokens: usize,
    pub text: String,
    /// SHA-256 hex of `text`.
    pub hash: String,
    pub created_at: i64,
}

/// A raw hit from one index, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkCandidate {
    pub chunk_id: String,
    pub document_id: String,
    /// BM25 score (unbounded) or cosine similarity, depending on the index.
    pub raw_score: f64,
}

/// A chunk joined with the document fields retrieval needs for ranking
/// and attribution.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedChunk {
    pub chunk: Chunk,
    pub origin_ref: String,
    pub source_kind: SourceKind,
    pub indexed_at: i64,
}

/// One retrieval call as recorded in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalLogEntry {
    pub query: String,
    /// Unix seconds.
    pub timestamp: i64,
    /// Returned `(chunk_id, fused_score)` pairs in rank order.
    pub results: Vec<(String, f64)>,
    pub sufficient: bool,
    /// `false` when the vector side was unavailable for this call.
    pub vector_available: bool,
    pub lexical_weight: f64,
    pub vector_weight: f64,
}

impl RetrievalLogEntry {
    pub fn avg_score(&self) -> Option<f64> {
        if self.results.is_empty() {
            return None;
        }
        Some(self.results.iter().map(|(_, s)| s).sum::<f64>() / self.results.len() as f64)
    }
}

/// Aggregate index statistics for the audit surface.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct IndexStats {
    pub document_count: usize,
    pub chunk_count: usize,
    pub embedded_count: usize,
    /// Most recent commit of any document's chunk set (unix seconds).
    pub last_indexed_at: Option<i64>,
    pub chunks_by_source: BTreeMap<String, usize>,
}
