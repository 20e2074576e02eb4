//! Hybrid retrieval: lexical + vector score fusion with graceful degradation.
//!
//! # Algorithm
//!
//! 1. Parse the query ([`parse_query`]).
//! 2. Embed the normalized query. A provider error or timeout marks the
//!    vector side [`VectorStatus::Unavailable`] for this call.
//! 3. Fetch `max(candidate_k, top_k)` candidates from each index and
//!    resolve the union against the chunk store. Candidates the store does
//!    not know belong to a chunk set that was swapped out mid-call; the
//!    lookup is repeated (up to [`STALE_RETRIES`] times) and whatever is
//!    still unresolved is dropped. The store commits a document's chunk
//!    set in one step, so resolved chunks of one document always come from
//!    a single version.
//! 4. Normalize each candidate list to `[0, 1]` ([`normalize_scores`]).
//!    Vector hits with a cosine similarity of zero or less are dropped
//!    first.
//! 5. `fused = w_lex × lexical + w_vec × vector`. With the vector side
//!    unavailable the weights become `(1, 0)`.
//! 6. Optionally scale feedback-origin chunks by `feedback_weight`.
//! 7. Sort by fused score (desc), document recency (desc), document id,
//!    chunk index. Truncate to `top_k`.
//! 8. `sufficient` = at least `min_sufficient_chunks` results reach
//!    `score_threshold`.
//!
//! Every call appends a [`RetrievalLogEntry`], including calls that fail
//! on the lexical side.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::RetrievalError;
use crate::indexer::Indexes;
use crate::log::RetrievalLog;
use crate::models::{Chunk, ChunkCandidate, ResolvedChunk, RetrievalLogEntry, SourceKind};
use crate::query::{parse_query, ParsedQuery};
use crate::settings::RetrievalSettings;
use crate::vector::VectorStatus;

/// Extra candidate lookups when some ids no longer resolve.
pub const STALE_RETRIES: usize = 2;

/// A retrieved chunk with its score breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub origin_ref: String,
    pub source_kind: SourceKind,
    pub indexed_at: i64,
    /// Normalized lexical score (0.0 if absent from lexical candidates).
    pub lexical_score: f64,
    /// Normalized vector score (0.0 if absent from vector candidates).
    pub vector_score: f64,
    pub fused_score: f64,
}

/// Outcome of one retrieval call. Always returned, possibly empty.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query: ParsedQuery,
    pub chunks: Vec<ScoredChunk>,
    pub sufficient: bool,
    pub vector_status: VectorStatus,
    /// Weights actually applied in this call.
    pub lexical_weight: f64,
    pub vector_weight: f64,
    pub lexical_candidates: usize,
    pub vector_candidates: usize,
}

pub struct HybridRetriever {
    indexes: Indexes,
    embedder: Arc<dyn Embedder>,
    log: Arc<dyn RetrievalLog>,
    settings: RetrievalSettings,
}

impl HybridRetriever {
    pub fn new(
        indexes: Indexes,
        embedder: Arc<dyn Embedder>,
        log: Arc<dyn RetrievalLog>,
        settings: RetrievalSettings,
    ) -> Self {
        Self {
            indexes,
            embedder,
            log,
            settings,
        }
    }

    pub fn settings(&self) -> &RetrievalSettings {
        &self.settings
    }

    /// Search with the configured `top_k` and `score_threshold`.
    pub async fn search(&self, query: &str) -> Result<RetrievalResult, RetrievalError> {
        self.search_with(query, self.settings.top_k, self.settings.score_threshold)
            .await
    }

    pub async fn search_with(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<RetrievalResult, RetrievalError> {
        let parsed = parse_query(query);
        let outcome = self.retrieve(&parsed, top_k, score_threshold).await;

        let entry = match &outcome {
            Ok(result) => RetrievalLogEntry {
                query: parsed.raw.clone(),
                timestamp: chrono::Utc::now().timestamp(),
                results: result
                    .chunks
                    .iter()
                    .map(|c| (c.chunk.id.clone(), c.fused_score))
                    .collect(),
                sufficient: result.sufficient,
                vector_available: result.vector_status.is_available(),
                lexical_weight: result.lexical_weight,
                vector_weight: result.vector_weight,
            },
            Err(_) => RetrievalLogEntry {
                query: parsed.raw.clone(),
                timestamp: chrono::Utc::now().timestamp(),
                results: Vec::new(),
                sufficient: false,
                vector_available: false,
                lexical_weight: 0.0,
                vector_weight: 0.0,
            },
        };
        if let Err(e) = self.log.append(&entry).await {
            warn!(error = %e, "failed to append retrieval log entry");
        }

        outcome
    }

    async fn retrieve(
        &self,
        parsed: &ParsedQuery,
        top_k: usize,
        score_threshold: f64,
    ) -> Result<RetrievalResult, RetrievalError> {
        if parsed.is_empty() {
            return Ok(RetrievalResult {
                query: parsed.clone(),
                chunks: Vec::new(),
                sufficient: false,
                vector_status: VectorStatus::Available,
                lexical_weight: self.settings.lexical_weight,
                vector_weight: self.settings.vector_weight,
                lexical_candidates: 0,
                vector_candidates: 0,
            });
        }

        let depth = self.settings.candidate_k.max(top_k);

        let (query_vec, mut vector_status) = match self.embedder.embed_one(&parsed.normalized).await
        {
            Ok(v) => (Some(v), VectorStatus::Available),
            Err(e) => {
                warn!(error = %e, "query embedding failed, falling back to lexical-only");
                (
                    None,
                    VectorStatus::Unavailable {
                        reason: e.to_string(),
                    },
                )
            }
        };

        let mut attempt = 0;
        let (lexical, vector, resolved) = loop {
            let (lexical, vector, resolved) = self
                .lookup(parsed, query_vec.as_deref(), depth, &mut vector_status)
                .await?;
            let known: HashSet<&str> = resolved.iter().map(|r| r.chunk.id.as_str()).collect();
            let stale = lexical
                .iter()
                .chain(vector.iter())
                .filter(|c| !known.contains(c.chunk_id.as_str()))
                .count();
            if stale == 0 || attempt == STALE_RETRIES {
                if stale > 0 {
                    debug!(stale, "dropping candidates that no longer resolve");
                }
                let lexical = retain_known(lexical, &known);
                let vector = retain_known(vector, &known);
                break (lexical, vector, resolved);
            }
            attempt += 1;
            debug!(stale, attempt, "candidates changed during lookup, retrying");
        };

        debug!(
            lexical = lexical.len(),
            vector = vector.len(),
            resolved = resolved.len(),
            "retrieval candidates"
        );

        let (w_lex, w_vec) = if vector_status.is_available() {
            (self.settings.lexical_weight, self.settings.vector_weight)
        } else {
            (1.0, 0.0)
        };

        let lex_norm: HashMap<&str, f64> = normalize_scores(&lexical)
            .into_iter()
            .map(|(c, s)| (c.chunk_id.as_str(), s))
            .collect();
        let vec_norm: HashMap<&str, f64> = normalize_scores(&vector)
            .into_iter()
            .map(|(c, s)| (c.chunk_id.as_str(), s))
            .collect();

        let mut chunks: Vec<ScoredChunk> = resolved
            .into_iter()
            .map(|r| {
                let l = lex_norm.get(r.chunk.id.as_str()).copied().unwrap_or(0.0);
                let v = vec_norm.get(r.chunk.id.as_str()).copied().unwrap_or(0.0);
                let mut fused = w_lex * l + w_vec * v;
                if r.source_kind == SourceKind::Feedback {
                    fused = (fused * self.settings.feedback_weight).clamp(0.0, 1.0);
                }
                ScoredChunk {
                    chunk: r.chunk,
                    origin_ref: r.origin_ref,
                    source_kind: r.source_kind,
                    indexed_at: r.indexed_at,
                    lexical_score: l,
                    vector_score: v,
                    fused_score: fused,
                }
            })
            .collect();

        chunks.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.indexed_at.cmp(&a.indexed_at))
                .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
                .then(a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        chunks.truncate(top_k);

        let qualifying = chunks
            .iter()
            .filter(|c| c.fused_score >= score_threshold)
            .count();
        let sufficient = qualifying >= self.settings.min_sufficient_chunks;

        info!(
            query = %parsed.normalized,
            results = chunks.len(),
            qualifying,
            sufficient,
            vector_available = vector_status.is_available(),
            "hybrid retrieval"
        );

        Ok(RetrievalResult {
            query: parsed.clone(),
            chunks,
            sufficient,
            vector_status,
            lexical_weight: w_lex,
            vector_weight: w_vec,
            lexical_candidates: lexical.len(),
            vector_candidates: vector.len(),
        })
    }

    /// One pass over both indexes plus resolution of the candidate union.
    async fn lookup(
        &self,
        parsed: &ParsedQuery,
        query_vec: Option<&[f32]>,
        depth: usize,
        vector_status: &mut VectorStatus,
    ) -> Result<(Vec<ChunkCandidate>, Vec<ChunkCandidate>, Vec<ResolvedChunk>), RetrievalError> {
        let lexical = self
            .indexes
            .lexical
            .search(parsed, depth)
            .await
            .map_err(RetrievalError::Lexical)?;

        let vector: Vec<ChunkCandidate> = match query_vec {
            Some(qv) if vector_status.is_available() => {
                match self.indexes.vectors.search(qv, depth).await {
                    Ok(hits) => hits.into_iter().filter(|c| c.raw_score > 0.0).collect(),
                    Err(e) => {
                        warn!(error = %e, "vector search failed, falling back to lexical-only");
                        *vector_status = VectorStatus::Unavailable {
                            reason: format!("vector index error: {e:#}"),
                        };
                        Vec::new()
                    }
                }
            }
            _ => Vec::new(),
        };

        let mut ids: Vec<String> = Vec::with_capacity(lexical.len() + vector.len());
        for c in lexical.iter().chain(vector.iter()) {
            if !ids.contains(&c.chunk_id) {
                ids.push(c.chunk_id.clone());
            }
        }
        let resolved = self
            .indexes
            .store
            .get_chunks(&ids)
            .await
            .map_err(RetrievalError::Store)?;
        Ok((lexical, vector, resolved))
    }
}

/// Keep candidates whose chunk id is in `known`.
fn retain_known(candidates: Vec<ChunkCandidate>, known: &HashSet<&str>) -> Vec<ChunkCandidate> {
    candidates
        .into_iter()
        .filter(|c| known.contains(c.chunk_id.as_str()))
        .collect()
}

/// Scale raw scores into `[0.0, 1.0]`.
///
/// Non-negative lists are divided by their best score, so the weakest
/// match keeps a share proportional to its raw score rather than `0.0`.
/// Lists with a negative score fall back to min-max. If all scores are
/// equal they normalize to `1.0`.
pub fn normalize_scores(candidates: &[ChunkCandidate]) -> Vec<(&ChunkCandidate, f64)> {
    let Some(first) = candidates.first() else {
        return Vec::new();
    };

    let (lo, hi) = candidates
        .iter()
        .fold((first.raw_score, first.raw_score), |(lo, hi), c| {
            (lo.min(c.raw_score), hi.max(c.raw_score))
        });
    let floor = if lo >= 0.0 { 0.0 } else { lo };

    candidates
        .iter()
        .map(|c| {
            let norm = if (hi - lo).abs() < f64::EPSILON {
                1.0
            } else {
                (c.raw_score - floor) / (hi - floor)
            };
            (c, norm)
        })
        .collect()
}
