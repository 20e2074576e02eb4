//! # Hybrid RAG
//!
//! SQLite-backed application layer over [`hybrid_rag_core`]: configuration,
//! storage, embedding providers, document sources, the `hrag` CLI and the
//! HTTP server.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌───────────────┐
//! │  Sources    │──▶│   Indexer    │──▶│    SQLite     │
//! │ filesystem  │   │ chunk+embed  │   │ FTS5 + vectors│
//! └─────────────┘   └──────────────┘   └───────┬───────┘
//!                                              │
//!                   ┌──────────────────────────┤
//!                   ▼                          ▼
//!            ┌─────────────┐           ┌──────────────┐
//!            │  Retriever  │──────────▶│ Context +    │
//!            │ hybrid fuse │   log     │ citations    │
//!            └─────────────┘           └──────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite implementations of the core index traits |
//! | [`embedding`] | Embedding providers |
//! | [`sources`] | Document sources |
//! | [`pipeline`] | Wiring of backends into indexer and retriever |
//! | [`ingest`] | `index`, `approve`, `remove` commands |
//! | [`search`] | `search`, `context`, `log` commands |
//! | [`stats`] | `stats` command |
//! | [`server`] | HTTP server |

pub mod config;
pub mod db;
pub mod embedding;
pub mod ingest;
pub mod migrate;
pub mod pipeline;
pub mod search;
pub mod server;
pub mod sources;
pub mod sqlite_store;
pub mod stats;
