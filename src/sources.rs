//! Document sources feeding the indexer.
//!
//! A [`DocumentSource`] enumerates the current corpus as core
//! [`Document`]s. The indexer skips unchanged documents by content hash,
//! so a source always returns everything it has.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use globset::{Glob, GlobSet, GlobSetBuilder};
use hybrid_rag_core::models::{Document, SourceKind};
use walkdir::WalkDir;

use crate::config::FilesystemSourceConfig;

#[async_trait]
pub trait DocumentSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch_all(&self) -> Result<Vec<Document>>;
}

/// Walks a directory tree, or reads a single file.
///
/// Document ids are `fs:<path relative to root>` so re-indexing the same
/// tree updates documents in place.
#[derive(Debug, Clone)]
pub struct FilesystemSource {
    config: FilesystemSourceConfig,
}

impl FilesystemSource {
    pub fn new(config: FilesystemSourceConfig) -> Self {
        Self { config }
    }

    /// Source rooted at `path` with the default include globs.
    pub fn from_path(path: &Path, fetch_timeout_secs: u64) -> Self {
        Self::new(FilesystemSourceConfig {
            root: path.to_path_buf(),
            include_globs: vec!["**/*.md".to_string(), "**/*.txt".to_string()],
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            fetch_timeout_secs,
        })
    }
}

#[async_trait]
impl DocumentSource for FilesystemSource {
    fn name(&self) -> &str {
        "filesystem"
    }

    async fn fetch_all(&self) -> Result<Vec<Document>> {
        let config = self.config.clone();
        let limit = Duration::from_secs(config.fetch_timeout_secs);
        let task = tokio::task::spawn_blocking(move || scan(&config));

        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined.context("filesystem scan task failed")?,
            Err(_) => bail!(
                "filesystem source timed out after {}s",
                limit.as_secs()
            ),
        }
    }
}

fn scan(config: &FilesystemSourceConfig) -> Result<Vec<Document>> {
    let root = &config.root;
    if !root.exists() {
        bail!("Filesystem source root does not exist: {}", root.display());
    }

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.display().to_string());
        return Ok(read_document(root, &name)?.into_iter().collect());
    }

    let include_set = build_globset(&config.include_globs)?;
    let mut default_excludes = vec![
        "**/.git/**".to_string(),
        "**/target/**".to_string(),
        "**/node_modules/**".to_string(),
    ];
    default_excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&default_excludes)?;

    let mut docs = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy().replace('\\', "/");

        if exclude_set.is_match(&rel_str) || !include_set.is_match(&rel_str) {
            continue;
        }

        if let Some(doc) = read_document(path, &rel_str)? {
            docs.push(doc);
        }
    }

    docs.sort_by(|a, b| a.id.cmp(&b.id));
    tracing::debug!(root = %root.display(), documents = docs.len(), "filesystem scan complete");
    Ok(docs)
}

/// `None` for files that are not valid UTF-8.
fn read_document(path: &Path, relative_path: &str) -> Result<Option<Document>> {
    let metadata = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let updated_at = metadata
        .modified()
        .unwrap_or(std::time::SystemTime::UNIX_EPOCH)
        .duration_since(std::time::SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64;

    let bytes =
        std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let Ok(text) = String::from_utf8(bytes) else {
        tracing::warn!(path = %path.display(), "skipping non-UTF-8 file");
        return Ok(None);
    };

    let absolute: PathBuf = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    Ok(Some(Document {
        id: format!("fs:{}", relative_path),
        source_kind: SourceKind::Source,
        origin_ref: format!("file://{}", absolute.display()),
        text,
        updated_at,
        provenance: None,
    }))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {}", pattern))?);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Alpha\n\nfirst doc").unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::write(dir.path().join("notes/b.txt"), "second doc").unwrap();
        std::fs::write(dir.path().join("skip.rs"), "fn main() {}").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/x")).unwrap();
        std::fs::write(dir.path().join("node_modules/x/c.md"), "vendored").unwrap();
        std::fs::write(dir.path().join("bin.txt"), [0xff, 0xfe, 0x00]).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_scan_applies_globs_and_default_excludes() {
        let dir = tree();
        let docs = FilesystemSource::from_path(dir.path(), 10)
            .fetch_all()
            .await
            .unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["fs:a.md", "fs:notes/b.txt"]);
        assert!(docs.iter().all(|d| d.source_kind == SourceKind::Source));
        assert!(docs[0].origin_ref.starts_with("file://"));
    }

    #[tokio::test]
    async fn test_user_excludes() {
        let dir = tree();
        let source = FilesystemSource::new(FilesystemSourceConfig {
            root: dir.path().to_path_buf(),
            include_globs: vec!["**/*".to_string()],
            exclude_globs: vec!["notes/**".to_string()],
            follow_symlinks: false,
            fetch_timeout_secs: 10,
        });
        let ids: Vec<String> = source
            .fetch_all()
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(ids, vec!["fs:a.md", "fs:skip.rs"]);
    }

    #[tokio::test]
    async fn test_single_file_root() {
        let dir = tree();
        let docs = FilesystemSource::from_path(&dir.path().join("a.md"), 10)
            .fetch_all()
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "fs:a.md");
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let dir = TempDir::new().unwrap();
        let result = FilesystemSource::from_path(&dir.path().join("nope"), 10)
            .fetch_all()
            .await;
        assert!(result.is_err());
    }
}
