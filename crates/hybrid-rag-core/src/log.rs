//! Append-only retrieval audit log.
//!
//! Each hybrid retrieval call appends one [`RetrievalLogEntry`]. Entries
//! are never updated or deleted, and the chunk ids they hold may outlive
//! the chunks themselves.

use std::sync::Mutex;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::models::RetrievalLogEntry;

#[async_trait]
pub trait RetrievalLog: Send + Sync {
    /// Record one retrieval. Must not read existing entries.
    async fn append(&self, entry: &RetrievalLogEntry) -> Result<()>;

    /// Most recent entries, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<RetrievalLogEntry>>;
}

#[derive(Default)]
pub struct MemoryRetrievalLog {
    entries: Mutex<Vec<RetrievalLogEntry>>,
}

impl MemoryRetrievalLog {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RetrievalLog for MemoryRetrievalLog {
    async fn append(&self, entry: &RetrievalLogEntry) -> Result<()> {
        self.entries
            .lock()
            .map_err(|_| anyhow!("retrieval log lock poisoned"))?
            .push(entry.clone());
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<RetrievalLogEntry>> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| anyhow!("retrieval log lock poisoned"))?;
        Ok(entries.iter().rev().take(limit).cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(query: &str) -> RetrievalLogEntry {
        RetrievalLogEntry {
            query: query.to_string(),
            timestamp: 0,
            results: vec![("c1".to_string(), 0.8), ("c2".to_string(), 0.4)],
            sufficient: true,
            vector_available: true,
            lexical_weight: 0.5,
            vector_weight: 0.5,
        }
    }

    #[tokio::test]
    async fn test_recent_is_newest_first() {
        let log = MemoryRetrievalLog::new();
        for q in ["first", "second", "third"] {
            log.append(&entry(q)).await.unwrap();
        }
        let recent = log.recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].query, "third");
        assert_eq!(recent[1].query, "second");
        assert!((recent[0].avg_score().unwrap() - 0.6).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_concurrent_appends_all_land() {
        let log = std::sync::Arc::new(MemoryRetrievalLog::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let log = log.clone();
            handles.push(tokio::spawn(async move {
                log.append(&entry(&format!("q{i}"))).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(log.recent(100).await.unwrap().len(), 16);
    }
}
