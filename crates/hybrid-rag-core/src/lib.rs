//! # Hybrid RAG Core
//!
//! Storage-agnostic logic for the hybrid retrieval subsystem: data models,
//! token chunking, query parsing, lexical and vector index abstractions,
//! score fusion, token-budgeted context assembly, idempotent indexing, and
//! the feedback loop that re-indexes approved output.
//!
//! This crate contains no sqlx, HTTP, or filesystem I/O. Every index is an
//! injectable trait object; the `memory` implementations shipped here back
//! the unit tests and small embedded deployments, while the application
//! crate provides SQLite-backed ones.
//!
//! # Pipeline
//!
//! ```text
//! Document ──► Indexer ──► chunk ──► embed ──► { LexicalIndex, VectorIndex, ChunkStore }
//!                                                        │
//! query ──► HybridRetriever ◄───────────────────────────┘
//!               │
//!               ├──► RetrievalLog (append-only)
//!               ▼
//!          ContextBuilder ──► context text + citations + sufficiency
//! ```

pub mod chunk;
pub mod context;
pub mod embedding;
pub mod error;
pub mod feedback;
pub mod indexer;
pub mod lexical;
pub mod log;
pub mod models;
pub mod query;
pub mod retriever;
pub mod settings;
pub mod store;
pub mod vector;
