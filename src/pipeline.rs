//! Wires the SQLite backends and the configured embedder into the core
//! indexer, retriever, context builder and feedback loop.

use std::sync::Arc;

use anyhow::{Context, Result};
use hybrid_rag_core::context::ContextBuilder;
use hybrid_rag_core::embedding::Embedder;
use hybrid_rag_core::feedback::FeedbackLoop;
use hybrid_rag_core::indexer::{Indexer, Indexes};
use hybrid_rag_core::log::RetrievalLog;
use hybrid_rag_core::retriever::HybridRetriever;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;
use crate::embedding::create_provider;
use crate::migrate::run_migrations;
use crate::sqlite_store::{
    SqliteChunkStore, SqliteLexicalIndex, SqliteRetrievalLog, SqliteVectorIndex,
};

/// Everything a CLI command or HTTP handler needs. Cheap to clone.
#[derive(Clone)]
pub struct Pipeline {
    pub pool: SqlitePool,
    pub indexes: Indexes,
    pub embedder: Arc<dyn Embedder>,
    pub indexer: Arc<Indexer>,
    pub retriever: Arc<HybridRetriever>,
    pub context: ContextBuilder,
    pub feedback: Arc<FeedbackLoop>,
    pub log: Arc<dyn RetrievalLog>,
}

impl Pipeline {
    /// Connect, migrate, and build the pipeline with the configured provider.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_provider(&config.embedding)
            .with_context(|| format!("Failed to create embedding provider '{}'", config.embedding.provider))?;
        Self::open_with(config, embedder).await
    }

    /// As [`Pipeline::open`], with an explicit embedder.
    pub async fn open_with(config: &Config, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let pool = db::connect(config)
            .await
            .with_context(|| format!("Failed to open database {}", config.db.path.display()))?;
        run_migrations(&pool).await?;

        let indexes = Indexes::new(
            Arc::new(SqliteLexicalIndex::new(pool.clone())),
            Arc::new(SqliteVectorIndex::new(pool.clone())),
            Arc::new(SqliteChunkStore::new(pool.clone())),
        );
        let log: Arc<dyn RetrievalLog> = Arc::new(SqliteRetrievalLog::new(pool.clone()));

        let indexer = Arc::new(
            Indexer::new(indexes.clone(), embedder.clone(), config.chunking.clone())
                .with_batch_size(config.embedding.batch_size),
        );
        let retriever = Arc::new(HybridRetriever::new(
            indexes.clone(),
            embedder.clone(),
            log.clone(),
            config.retrieval.clone(),
        ));

        Ok(Self {
            pool,
            indexes,
            embedder,
            feedback: Arc::new(FeedbackLoop::new(indexer.clone())),
            indexer,
            retriever,
            context: ContextBuilder::new(&config.context),
            log,
        })
    }
}
