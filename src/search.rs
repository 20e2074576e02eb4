//! Retrieval commands: `search`, `context`, `log`.

use anyhow::Result;
use hybrid_rag_core::retriever::RetrievalResult;
use hybrid_rag_core::vector::VectorStatus;

use crate::config::Config;
use crate::pipeline::Pipeline;

pub async fn run_search(
    config: &Config,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f64>,
) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let settings = pipeline.retriever.settings();
    let result = pipeline
        .retriever
        .search_with(
            query,
            limit.unwrap_or(settings.top_k),
            threshold.unwrap_or(settings.score_threshold),
        )
        .await?;

    print_status(&result);
    if result.chunks.is_empty() {
        println!("No results.");
    }

    for (i, hit) in result.chunks.iter().enumerate() {
        let excerpt: String = hit.chunk.text.chars().take(160).collect();
        println!(
            "{}. [{:.2}] {} #{}",
            i + 1,
            hit.fused_score,
            hit.chunk.document_id,
            hit.chunk.chunk_index
        );
        println!(
            "    lexical: {:.2}  vector: {:.2}  kind: {}",
            hit.lexical_score, hit.vector_score, hit.source_kind
        );
        println!("    origin: {}", hit.origin_ref);
        println!("    excerpt: \"{}\"", excerpt.replace('\n', " ").trim());
        println!("    chunk: {}", hit.chunk.id);
        println!();
    }

    pipeline.pool.close().await;
    Ok(())
}

/// Print the context for `query`; `scores` heads each span with its
/// relevance.
pub async fn run_context(config: &Config, query: &str, scores: bool) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let result = pipeline.retriever.search(query).await?;
    let response = if scores {
        pipeline.context.respond_with_scores(&result)
    } else {
        pipeline.context.respond(&result)
    };

    print_status(&result);
    println!(
        "tokens: {} / {}  chunks: {}",
        response.tokens_used,
        pipeline.context.max_tokens(),
        response.chunks_used
    );
    println!();
    if response.context.is_empty() {
        println!("(empty context)");
    } else {
        println!("{}", response.context);
    }
    if !response.citations.is_empty() {
        println!();
        println!("Sources:");
        for (i, citation) in response.citations.iter().enumerate() {
            println!(
                "  [{}] {} ({}, {:.2}) {}",
                i + 1,
                citation.document_id,
                citation.source_kind,
                citation.best_score,
                citation.origin_ref
            );
        }
    }

    pipeline.pool.close().await;
    Ok(())
}

pub async fn run_log(config: &Config, limit: usize) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let entries = pipeline.log.recent(limit).await?;

    if entries.is_empty() {
        println!("No retrievals logged.");
    }
    println!(
        "{:<17} {:>7} {:>6} {:>10} {:>7}  QUERY",
        "TIME", "RESULTS", "AVG", "SUFFICIENT", "VECTOR"
    );
    for entry in &entries {
        let time = chrono::DateTime::from_timestamp(entry.timestamp, 0)
            .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| entry.timestamp.to_string());
        println!(
            "{:<17} {:>7} {:>6} {:>10} {:>7}  {}",
            time,
            entry.results.len(),
            entry
                .avg_score()
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "-".to_string()),
            entry.sufficient,
            if entry.vector_available { "up" } else { "down" },
            entry.query
        );
    }

    pipeline.pool.close().await;
    Ok(())
}

fn print_status(result: &RetrievalResult) {
    println!(
        "sufficient: {}  weights: lexical {:.2} / vector {:.2}",
        result.sufficient, result.lexical_weight, result.vector_weight
    );
    if let VectorStatus::Unavailable { reason } = &result.vector_status {
        println!("vector search unavailable: {}", reason);
    }
}
