//! Token-budgeted context assembly with attribution.
//!
//! Chunks are accepted in rank order until the next one would push the
//! total past the budget; chunks are never split. A chunk adjacent (by
//! sequence index) to an already accepted chunk of the same document
//! costs less, because the overlap tokens they share are emitted once.
//!
//! Output layout: one section per document, ordered by the document's best
//! ranked chunk. Inside a section, consecutive chunks are merged into one
//! span with the overlap removed, and separate spans are joined by a blank
//! line. Sections are separated by `\n\n---\n\n`.
//!
//! [`ContextBuilder::build_with_scores`] additionally heads every span with
//! `[Relevance: 0.87]`, the best fused score among its chunks. Those
//! headers are charged against the budget too.

use std::collections::HashMap;

use serde::Serialize;

use crate::chunk::{count_tokens, strip_leading_tokens};
use crate::models::SourceKind;
use crate::retriever::{RetrievalResult, ScoredChunk};
use crate::settings::ContextSettings;
use crate::vector::VectorStatus;

pub const SECTION_SEPARATOR: &str = "\n\n---\n\n";

/// Tokens in a `[Relevance: x.xx]` span header.
const SCORE_HEADER_TOKENS: usize = 2;

/// Attribution for one document that contributed to the context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub document_id: String,
    pub origin_ref: String,
    pub source_kind: SourceKind,
    /// Contributing chunks, in document order.
    pub chunk_ids: Vec<String>,
    pub best_score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BuiltContext {
    pub text: String,
    pub citations: Vec<Citation>,
    /// Accepted chunks in rank order.
    pub chunk_ids: Vec<String>,
    pub tokens_used: usize,
    pub chunks_used: usize,
}

/// What the generation service receives.
#[derive(Debug, Clone, Serialize)]
pub struct ContextResponse {
    pub context: String,
    pub citations: Vec<Citation>,
    pub sufficient: bool,
    pub vector_status: VectorStatus,
    pub tokens_used: usize,
    pub chunks_used: usize,
}

#[derive(Debug, Clone)]
pub struct ContextBuilder {
    max_tokens: usize,
}

impl ContextBuilder {
    pub fn new(settings: &ContextSettings) -> Self {
        Self {
            max_tokens: settings.max_tokens,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Assemble `chunks` (best first) into a context within the budget.
    pub fn build(&self, chunks: &[ScoredChunk]) -> BuiltContext {
        self.assemble(chunks, false)
    }

    /// Like [`build`](Self::build), with a relevance header on every span.
    pub fn build_with_scores(&self, chunks: &[ScoredChunk]) -> BuiltContext {
        self.assemble(chunks, true)
    }

    fn assemble(&self, chunks: &[ScoredChunk], scores: bool) -> BuiltContext {
        let mut accepted: Vec<&ScoredChunk> = Vec::new();
        let mut budgeted = 0usize;

        for candidate in chunks {
            if accepted.iter().any(|a| a.chunk.id == candidate.chunk.id) {
                continue;
            }
            let (mut cost, adjacent) = self.cost(candidate, &accepted);
            if scores && !adjacent {
                cost += SCORE_HEADER_TOKENS;
            }
            if budgeted + cost > self.max_tokens {
                break;
            }
            budgeted += cost;
            accepted.push(candidate);
        }

        if accepted.is_empty() {
            return BuiltContext::default();
        }

        let mut doc_order: Vec<&str> = Vec::new();
        let mut by_doc: HashMap<&str, Vec<&ScoredChunk>> = HashMap::new();
        for c in &accepted {
            let doc = c.chunk.document_id.as_str();
            if !by_doc.contains_key(doc) {
                doc_order.push(doc);
            }
            by_doc.entry(doc).or_default().push(c);
        }

        let mut sections = Vec::with_capacity(doc_order.len());
        let mut citations = Vec::with_capacity(doc_order.len());
        for doc in doc_order {
            let mut members = by_doc.remove(doc).unwrap_or_default();
            members.sort_by_key(|c| c.chunk.chunk_index);
            let Some(first) = members.first() else {
                continue;
            };

            sections.push(render_spans(&members, scores));
            citations.push(Citation {
                document_id: doc.to_string(),
                origin_ref: first.origin_ref.clone(),
                source_kind: first.source_kind,
                chunk_ids: members.iter().map(|c| c.chunk.id.clone()).collect(),
                best_score: best_score(&members),
            });
        }

        BuiltContext {
            tokens_used: sections.iter().map(|s| count_tokens(s)).sum(),
            text: sections.join(SECTION_SEPARATOR),
            citations,
            chunk_ids: accepted.iter().map(|c| c.chunk.id.clone()).collect(),
            chunks_used: accepted.len(),
        }
    }

    /// Build the response handed to the generation service.
    pub fn respond(&self, result: &RetrievalResult) -> ContextResponse {
        Self::response(result, self.build(&result.chunks))
    }

    /// [`respond`](Self::respond) with relevance headers in the context.
    pub fn respond_with_scores(&self, result: &RetrievalResult) -> ContextResponse {
        Self::response(result, self.build_with_scores(&result.chunks))
    }

    fn response(result: &RetrievalResult, built: BuiltContext) -> ContextResponse {
        ContextResponse {
            context: built.text,
            citations: built.citations,
            sufficient: result.sufficient,
            vector_status: result.vector_status.clone(),
            tokens_used: built.tokens_used,
            chunks_used: built.chunks_used,
        }
    }

    /// Tokens `candidate` adds given what is already accepted, and whether
    /// it borders an accepted chunk of the same document.
    fn cost(&self, candidate: &ScoredChunk, accepted: &[&ScoredChunk]) -> (usize, bool) {
        let idx = candidate.chunk.chunk_index;
        let mut shared = 0;
        let mut adjacent = false;
        for a in accepted {
            if a.chunk.document_id != candidate.chunk.document_id {
                continue;
            }
            if a.chunk.chunk_index == idx - 1 {
                shared += candidate.chunk.overlap_tokens;
                adjacent = true;
            } else if a.chunk.chunk_index == idx + 1 {
                shared += a.chunk.overlap_tokens;
                adjacent = true;
            }
        }
        (candidate.chunk.token_count.saturating_sub(shared), adjacent)
    }
}

fn best_score(members: &[&ScoredChunk]) -> f64 {
    members
        .iter()
        .map(|c| c.fused_score)
        .fold(f64::NEG_INFINITY, f64::max)
}

/// Merge runs of consecutive chunks; runs are separated by a blank line.
fn render_spans(members: &[&ScoredChunk], scores: bool) -> String {
    let mut runs: Vec<Vec<&ScoredChunk>> = Vec::new();
    for c in members {
        match runs.last_mut() {
            Some(run)
                if run
                    .last()
                    .is_some_and(|p| c.chunk.chunk_index == p.chunk.chunk_index + 1) =>
            {
                run.push(*c)
            }
            _ => runs.push(vec![*c]),
        }
    }

    let spans: Vec<String> = runs
        .iter()
        .filter_map(|run| {
            let (head, tail) = run.split_first()?;
            let mut text = head.chunk.text.clone();
            for c in tail {
                text.push_str(strip_leading_tokens(&c.chunk.text, c.chunk.overlap_tokens));
            }
            let text = text.trim();
            if text.is_empty() {
                return None;
            }
            Some(if scores {
                format!("[Relevance: {:.2}]\n{}", best_score(run), text)
            } else {
                text.to_string()
            })
        })
        .collect();
    spans.join("\n\n")
}
