//! Indexing commands: `index`, `reindex`, `approve`, `backfill`, `remove`.
//!
//! `hrag index <path>` indexes a file or directory; `hrag index source`
//! indexes the configured `[sources.filesystem]`. Unchanged documents are
//! skipped by content hash, so re-running is cheap. `hrag reindex --all`
//! ignores hashes and rebuilds every chunk set, for use after changing
//! `[chunking]` or the embedding model.

use std::path::Path;

use anyhow::{bail, Context, Result};
use hybrid_rag_core::feedback::{ApprovedItem, REPLY_TAG};
use hybrid_rag_core::indexer::{BulkReport, IndexOutcome};

use crate::config::Config;
use crate::pipeline::Pipeline;
use crate::sources::{DocumentSource, FilesystemSource};

/// Resolve `target` to a document source.
///
/// The literal `source` selects the configured filesystem source; anything
/// else is treated as a path.
pub fn resolve_source(config: &Config, target: &str) -> Result<FilesystemSource> {
    if target == "source" {
        let Some(fs) = &config.sources.filesystem else {
            bail!("No [sources.filesystem] configured. Pass a path instead.");
        };
        return Ok(FilesystemSource::new(fs.clone()));
    }

    let timeout = config
        .sources
        .filesystem
        .as_ref()
        .map(|fs| fs.fetch_timeout_secs)
        .unwrap_or(30);
    Ok(FilesystemSource::from_path(Path::new(target), timeout))
}

/// Fetch everything from `source` and index it.
pub async fn index_source(pipeline: &Pipeline, source: &dyn DocumentSource) -> Result<BulkReport> {
    let docs = source.fetch_all().await?;
    tracing::info!(source = source.name(), documents = docs.len(), "fetched documents");
    Ok(pipeline.indexer.index_bulk(&docs).await)
}

pub async fn run_index(config: &Config, target: &str) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let source = resolve_source(config, target)?;
    let report = index_source(&pipeline, &source).await?;
    pipeline.pool.close().await;
    print_report(config, &format!("index {}", target), &report)
}

pub async fn run_reindex(config: &Config) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let report = pipeline.indexer.reindex_all().await?;
    pipeline.pool.close().await;
    print_report(config, "reindex --all", &report)
}

/// Index approvals from a JSON array of `{id, text, parent_text?, tag?}`.
pub async fn run_backfill(config: &Config, file: &Path) -> Result<()> {
    let content = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read approvals file: {}", file.display()))?;
    let items: Vec<ApprovedItem> = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse approvals file: {}", file.display()))?;

    let pipeline = Pipeline::open(config).await?;
    let report = pipeline.feedback.backfill(&items).await?;
    pipeline.pool.close().await;
    print_report(config, &format!("backfill {}", file.display()), &report)
}

/// Print a bulk report; fails if any document failed.
fn print_report(config: &Config, title: &str, report: &BulkReport) -> Result<()> {
    let (chunks, embedded) = report
        .outcomes
        .iter()
        .fold((0usize, 0usize), |(c, e), (_, outcome)| match outcome {
            IndexOutcome::Indexed { chunks, embedded } => {
                (c + chunks, e + usize::from(*embedded))
            }
            IndexOutcome::Unchanged => (c, e),
        });

    println!("{}", title);
    println!("  documents: {}", report.outcomes.len() + report.failures.len());
    println!("  indexed: {}", report.indexed());
    println!("  unchanged: {}", report.unchanged());
    println!("  chunks written: {}", chunks);
    if config.embedding.is_enabled() {
        println!("  documents embedded: {}", embedded);
    }
    if report.is_clean() {
        println!("ok");
        return Ok(());
    }

    println!("  failed: {}", report.failures.len());
    for failure in &report.failures {
        println!("    {}: {}", failure.document_id, failure.error);
    }
    bail!("{} document(s) failed to index", report.failures.len())
}

/// Index approved output. With `reply` set (implied by `parent`), the text
/// is stored as a reply under its parent post.
pub async fn run_approve(
    config: &Config,
    text: &str,
    tag: Option<&str>,
    reply: bool,
    parent: Option<&str>,
) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let approved = if reply || parent.is_some() {
        pipeline
            .feedback
            .on_approved_reply(text, parent, tag.unwrap_or(REPLY_TAG))
            .await?
    } else {
        pipeline
            .feedback
            .on_approved(text, tag.unwrap_or("approved"))
            .await?
    };
    println!("approved {}", approved.document_id);
    if let IndexOutcome::Indexed { chunks, .. } = approved.outcome {
        println!("  chunks written: {}", chunks);
    }
    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_remove(config: &Config, id: &str) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let removed = pipeline.indexer.remove_document(id).await?;
    pipeline.pool.close().await;
    if !removed {
        bail!("Document not found: {}", id);
    }
    println!("removed {}", id);
    Ok(())
}
