//! Keyword index abstraction and an in-memory BM25 implementation.
//!
//! The [`LexicalIndex`] trait is what the indexer writes to and the hybrid
//! retriever reads from. Scores are on an unbounded scale (higher is
//! better); the retriever normalizes them per call.
//!
//! Queries arrive already parsed ([`ParsedQuery`]), so implementations only
//! see plain lowercase terms and combine them with OR semantics.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::{Chunk, ChunkCandidate};
use crate::query::{tokenize_terms, ParsedQuery};

/// Inverted keyword index over chunk text.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Add a chunk. Re-inserting an existing chunk id replaces it.
    async fn insert(&self, chunk: &Chunk) -> Result<()>;

    /// Delete every chunk belonging to `document_id`.
    async fn remove_document(&self, document_id: &str) -> Result<()>;

    /// Top `limit` chunks matching any query term, best first.
    async fn search(&self, query: &ParsedQuery, limit: usize) -> Result<Vec<ChunkCandidate>>;

    /// Number of indexed chunks.
    async fn len(&self) -> Result<usize>;

    /// Add several chunks. Backends may do this in one transaction.
    async fn insert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        for chunk in chunks {
            self.insert(chunk).await?;
        }
        Ok(())
    }

    /// Delete the chunks of `document_id` whose ids are not in `keep`.
    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()>;
}

/// BM25 term-frequency saturation.
const K1: f64 = 1.2;
/// BM25 length normalization.
const B: f64 = 0.75;

struct Posting {
    document_id: String,
    length: usize,
    terms: HashMap<String, u32>,
}

#[derive(Default)]
struct Inner {
    chunks: HashMap<String, Posting>,
    /// term -> chunk ids containing it
    postings: HashMap<String, Vec<String>>,
    total_length: usize,
}

impl Inner {
    fn remove_chunk(&mut self, chunk_id: &str) {
        let Some(posting) = self.chunks.remove(chunk_id) else {
            return;
        };
        self.total_length -= posting.length;
        for term in posting.terms.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.retain(|id| id != chunk_id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
    }
}

/// In-memory Okapi BM25 index.
///
/// `idf = ln(1 + (N - df + 0.5) / (df + 0.5))`, which stays positive even
/// for terms present in every chunk.
#[derive(Default)]
pub struct MemoryLexicalIndex {
    inner: RwLock<Inner>,
}

impl MemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn insert(&self, chunk: &Chunk) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        inner.remove_chunk(&chunk.id);

        let words = tokenize_terms(&chunk.text);
        let mut terms: HashMap<String, u32> = HashMap::new();
        for w in &words {
            *terms.entry(w.clone()).or_insert(0) += 1;
        }
        for term in terms.keys() {
            inner
                .postings
                .entry(term.clone())
                .or_default()
                .push(chunk.id.clone());
        }
        inner.total_length += words.len();
        inner.chunks.insert(
            chunk.id.clone(),
            Posting {
                document_id: chunk.document_id.clone(),
                length: words.len(),
                terms,
            },
        );
        Ok(())
    }

    async fn remove_document(&self, document_id: &str) -> Result<()> {
        self.retain_document(document_id, &[]).await
    }

    async fn retain_document(&self, document_id: &str, keep: &[String]) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        let ids: Vec<String> = inner
            .chunks
            .iter()
            .filter(|(id, p)| p.document_id == document_id && !keep.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();
        for id in ids {
            inner.remove_chunk(&id);
        }
        Ok(())
    }

    async fn search(&self, query: &ParsedQuery, limit: usize) -> Result<Vec<ChunkCandidate>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        let n = inner.chunks.len();
        if n == 0 || query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let avgdl = (inner.total_length as f64 / n as f64).max(1.0);

        let mut scores: HashMap<&str, f64> = HashMap::new();
        for term in query.search_terms() {
            let Some(ids) = inner.postings.get(term) else {
                continue;
            };
            let df = ids.len() as f64;
            let idf = (1.0 + (n as f64 - df + 0.5) / (df + 0.5)).ln();
            for id in ids {
                let Some(posting) = inner.chunks.get(id) else {
                    continue;
                };
                let tf = posting.terms.get(term).copied().unwrap_or(0) as f64;
                let norm = K1 * (1.0 - B + B * posting.length as f64 / avgdl);
                *scores.entry(id.as_str()).or_insert(0.0) += idf * tf * (K1 + 1.0) / (tf + norm);
            }
        }

        let mut results: Vec<ChunkCandidate> = scores
            .into_iter()
            .filter_map(|(id, score)| {
                inner.chunks.get(id).map(|p| ChunkCandidate {
                    chunk_id: id.to_string(),
                    document_id: p.document_id.clone(),
                    raw_score: score,
                })
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
        let inner = self
            .inner
            .read()
            .map_err(|_| anyhow!("lexical index lock poisoned"))?;
        Ok(inner.chunks.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_query;

    fn chunk(id: &str, doc: &str, text: &str) -> Chunk {
        Chunk {
            id: id.to_string(),
            document_id: doc.to_string(),
            chunk_index: 0,
            token_count: text.split_whitespace().count(),
            overlap_tokens: 0,
            text: text.to_string(),
            hash: String::new(),
            created_at: 0,
        }
    }

    #[tokio::test]
    async fn test_single_chunk_scores_positive() {
        let idx = MemoryLexicalIndex::new();
        idx.insert(&chunk(
            "c1",
            "d1",
            "Presence preserves memories as interactive holograms",
        ))
        .await
        .unwrap();

        let hits = idx.search(&parse_query("memories"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].raw_score > 0.0);
    }

    #[tokio::test]
    async fn test_term_frequency_ranks_higher() {
        let idx = MemoryLexicalIndex::new();
        idx.insert(&chunk("c1", "d1", "rust rust rust systems"))
            .await
            .unwrap();
        idx.insert(&chunk("c2", "d2", "rust and python scripting"))
            .await
            .unwrap();
        idx.insert(&chunk("c3", "d3", "gardening tips for spring"))
            .await
            .unwrap();

        let hits = idx.search(&parse_query("rust"), 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!(hits[0].raw_score > hits[1].raw_score);
    }

    #[tokio::test]
    async fn test_or_semantics_across_terms() {
        let idx = MemoryLexicalIndex::new();
        idx.insert(&chunk("c1", "d1", "alpha only")).await.unwrap();
        idx.insert(&chunk("c2", "d2", "beta only")).await.unwrap();
        idx.insert(&chunk("c3", "d3", "alpha and beta")).await.unwrap();

        let hits = idx.search(&parse_query("alpha beta"), 10).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].chunk_id, "c3");
    }

    #[tokio::test]
    async fn test_reserved_syntax_query() {
        let idx = MemoryLexicalIndex::new();
        idx.insert(&chunk("c1", "d1", "The AI test harness"))
            .await
            .unwrap();
        let hits = idx
            .search(&parse_query("The: (AI) *test*"), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_remove_document() {
        let idx = MemoryLexicalIndex::new();
        idx.insert(&chunk("c1", "d1", "shared term")).await.unwrap();
        idx.insert(&chunk("c2", "d1", "shared again")).await.unwrap();
        idx.insert(&chunk("c3", "d2", "shared elsewhere")).await.unwrap();

        idx.remove_document("d1").await.unwrap();
        assert_eq!(idx.len().await.unwrap(), 1);
        let hits = idx.search(&parse_query("shared"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].document_id, "d2");
    }

    #[tokio::test]
    async fn test_reinsert_does_not_duplicate() {
        let idx = MemoryLexicalIndex::new();
        let c = chunk("c1", "d1", "hello world");
        idx.insert(&c).await.unwrap();
        idx.insert(&c).await.unwrap();
        assert_eq!(idx.len().await.unwrap(), 1);
        let hits = idx.search(&parse_query("hello"), 10).await.unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn test_retain_document_prunes_other_chunks() {
        let idx = MemoryLexicalIndex::new();
        idx.insert_chunks(&[
            chunk("old", "d1", "outdated content"),
            chunk("new", "d1", "fresh content"),
            chunk("other", "d2", "unrelated content"),
        ])
        .await
        .unwrap();
        idx.retain_document("d1", &["new".to_string()])
            .await
            .unwrap();

        assert!(idx
            .search(&parse_query("outdated"), 10)
            .await
            .unwrap()
            .is_empty());
        let hits = idx.search(&parse_query("content"), 10).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(hits.len(), 2);
        assert!(ids.contains(&"new"));
        assert!(ids.contains(&"other"));
    }

    #[tokio::test]
    async fn test_empty_query_and_limit() {
        let idx = MemoryLexicalIndex::new();
        for i in 0..5 {
            idx.insert(&chunk(&format!("c{i}"), "d1", "common words"))
                .await
                .unwrap();
        }
        assert!(idx.search(&parse_query("()"), 10).await.unwrap().is_empty());
        assert_eq!(idx.search(&parse_query("common"), 3).await.unwrap().len(), 3);
    }
}
