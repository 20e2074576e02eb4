//! Index statistics.
//!
//! Provides a quick summary of what's indexed: document counts, chunk counts,
//! embedding coverage, and the per-source-kind breakdown. Used by
//! `hrag stats` and `GET /stats`.

use anyhow::Result;

use crate::config::Config;
use crate::pipeline::Pipeline;

pub async fn run_stats(config: &Config) -> Result<()> {
    let pipeline = Pipeline::open(config).await?;
    let stats = pipeline.indexes.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Hybrid RAG — Index Stats");
    println!("========================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!(
        "  Embedder:    {} ({} dims)",
        pipeline.embedder.model_name(),
        pipeline.embedder.dims()
    );
    println!();
    println!("  Documents:   {}", stats.document_count);
    println!("  Chunks:      {}", stats.chunk_count);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.embedded_count,
        stats.chunk_count,
        if stats.chunk_count > 0 {
            (stats.embedded_count * 100) / stats.chunk_count
        } else {
            0
        }
    );
    println!(
        "  Last index:  {}",
        stats
            .last_indexed_at
            .map(format_ts_relative)
            .unwrap_or_else(|| "never".to_string())
    );

    if !stats.chunks_by_source.is_empty() {
        println!();
        println!("  By source kind:");
        println!("  {:<24} {:>8}", "KIND", "CHUNKS");
        println!("  {}", "-".repeat(34));
        for (kind, chunks) in &stats.chunks_by_source {
            println!("  {:<24} {:>8}", kind, chunks);
        }
    }
    println!();

    pipeline.pool.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;

    if delta < 0 {
        format_ts_iso(ts)
    } else if delta < 60 {
        "just now".to_string()
    } else if delta < 3600 {
        let mins = delta / 60;
        format!("{} min{} ago", mins, if mins == 1 { "" } else { "s" })
    } else if delta < 86400 {
        let hours = delta / 3600;
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if delta < 86400 * 30 {
        let days = delta / 86400;
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else {
        format_ts_iso(ts)
    }
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
