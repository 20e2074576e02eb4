//! Typed errors for the hybrid retrieval pipeline.
//!
//! Backend traits ([`LexicalIndex`](crate::lexical::LexicalIndex),
//! [`VectorIndex`](crate::vector::VectorIndex),
//! [`ChunkStore`](crate::store::ChunkStore)) return `anyhow::Result`; the
//! orchestration layers wrap those failures in the enums below so callers
//! can tell a misconfiguration from an unreachable provider from a broken
//! index.

use std::time::Duration;

use thiserror::Error;

/// Rejected configuration. Fatal at startup.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("chunking.chunk_size must be > 0")]
    ZeroChunkSize,
    #[error("chunking.chunk_overlap ({overlap}) must be smaller than chunking.chunk_size ({size})")]
    OverlapTooLarge { size: usize, overlap: usize },
    #[error("{field} must be within [{min}, {max}], got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("retrieval.lexical_weight + retrieval.vector_weight must equal 1.0, got {0}")]
    WeightSum(f64),
    #[error("{0} must be > 0")]
    Zero(&'static str),
}

/// Failure reported by an embedding provider.
///
/// Every variant means "no vector was produced"; a provider never hands
/// back a zero vector in place of an error.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum EmbedError {
    /// Embeddings are switched off in configuration.
    #[error("embedding provider is disabled")]
    Disabled,
    #[error("embedding call timed out after {0:?}")]
    Timeout(Duration),
    /// Network failure or retryable server error that outlived the retry budget.
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),
    /// The provider refused the request (bad credentials, bad model, 4xx).
    #[error("embedding provider rejected request: {0}")]
    Rejected(String),
    #[error("invalid embedding response: {0}")]
    InvalidResponse(String),
}

/// Failure while indexing a single document.
#[derive(Debug, Error)]
pub enum IndexError {
    #[error("invalid document: {0}")]
    InvalidDocument(String),
    #[error(transparent)]
    Embedding(#[from] EmbedError),
    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),
}

/// Failure during hybrid retrieval.
///
/// Vector-side failures never appear here: they degrade the call instead.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("lexical index error: {0:#}")]
    Lexical(anyhow::Error),
    #[error("chunk store error: {0:#}")]
    Store(anyhow::Error),
}
