//! TOML configuration, parsed and validated once at startup.
//!
//! Pipeline tuning (`[chunking]`, `[retrieval]`, `[context]`) deserializes
//! directly into the core settings structs, so the same typed values flow
//! into the chunker, retriever and context builder. Any invalid value
//! fails [`load_config`]; the CLI and server refuse to start.

use anyhow::{Context, Result};
use hybrid_rag_core::settings::{ChunkingSettings, ContextSettings, RagSettings, RetrievalSettings};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingSettings,
    #[serde(default)]
    pub retrieval: RetrievalSettings,
    #[serde(default)]
    pub context: ContextSettings,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
}

impl Config {
    pub fn rag_settings(&self) -> RagSettings {
        RagSettings {
            chunking: self.chunking.clone(),
            retrieval: self.retrieval.clone(),
            context: self.context.clone(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hash`, `openai`, `ollama`, or `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for the Ollama provider.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on one HTTP attempt.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on a whole embedding call, retries and backoff included.
    /// Defaults to enough time for every attempt to run to its timeout.
    #[serde(default)]
    pub call_timeout_secs: Option<u64>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            call_timeout_secs: None,
        }
    }
}

fn default_provider() -> String {
    "hash".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

/// Dimensionality of the offline hash embedder when `dims` is unset.
pub const DEFAULT_HASH_DIMS: usize = 256;

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct SourcesConfig {
    pub filesystem: Option<FilesystemSourceConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct FilesystemSourceConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Upper bound on enumerating and reading the whole tree.
    #[serde(default = "default_timeout_secs")]
    pub fetch_timeout_secs: u64,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string(), "**/*.txt".to_string()]
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a config from TOML text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    config
        .rag_settings()
        .validate()
        .with_context(|| "Invalid pipeline settings")?;

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hash" | "local" => {}
        "openai" | "ollama" => {
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.dims.is_none() {
                anyhow::bail!(
                    "embedding.dims must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }
    if let Some(call) = config.embedding.call_timeout_secs {
        if call < config.embedding.timeout_secs {
            anyhow::bail!(
                "embedding.call_timeout_secs ({}) must be >= embedding.timeout_secs ({})",
                call,
                config.embedding.timeout_secs
            );
        }
    }

    if let Some(fs) = &config.sources.filesystem {
        if fs.fetch_timeout_secs == 0 {
            anyhow::bail!("sources.filesystem.fetch_timeout_secs must be > 0");
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[db]
path = "./data/rag.sqlite"
"#;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config(MINIMAL).unwrap();
        assert_eq!(config.chunking.chunk_size, 300);
        assert_eq!(config.chunking.chunk_overlap, 50);
        assert_eq!(config.retrieval.top_k, 10);
        assert_eq!(config.retrieval.score_threshold, 0.5);
        assert_eq!(config.context.max_tokens, 400);
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.server.bind, "127.0.0.1:7341");
        assert!(config.sources.filesystem.is_none());
    }

    #[test]
    fn test_overlap_not_smaller_than_size_is_fatal() {
        let toml = format!("{MINIMAL}\n[chunking]\nchunk_size = 100\nchunk_overlap = 100\n");
        let err = parse_config(&toml).unwrap_err();
        assert!(format!("{err:#}").contains("chunk_overlap"));
    }

    #[test]
    fn test_weights_must_sum_to_one() {
        let toml = format!("{MINIMAL}\n[retrieval]\nlexical_weight = 0.6\nvector_weight = 0.6\n");
        let err = parse_config(&toml).unwrap_err();
        assert!(format!("{err:#}").contains("must equal 1.0"));
    }

    #[test]
    fn test_remote_provider_requires_model_and_dims() {
        let toml = format!("{MINIMAL}\n[embedding]\nprovider = \"openai\"\n");
        assert!(parse_config(&toml).is_err());

        let toml = format!(
            "{MINIMAL}\n[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"\ndims = 768\n"
        );
        assert!(parse_config(&toml).is_ok());
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let toml = format!("{MINIMAL}\n[embedding]\nprovider = \"magic\"\n");
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("Unknown embedding provider"));
    }

    #[test]
    fn test_example_config_is_valid() {
        let config = parse_config(include_str!("../config/rag.example.toml")).unwrap();
        assert_eq!(config.rag_settings(), RagSettings::default());
        assert!(config.sources.filesystem.is_some());
    }

    #[test]
    fn test_zero_context_budget_is_fatal() {
        let toml = format!("{MINIMAL}\n[context]\nmax_tokens = 0\n");
        assert!(parse_config(&toml).is_err());
    }

    #[test]
    fn test_call_timeout_shorter_than_attempt_is_fatal() {
        let toml = format!("{MINIMAL}\n[embedding]\ntimeout_secs = 10\ncall_timeout_secs = 5\n");
        let err = parse_config(&toml).unwrap_err();
        assert!(err.to_string().contains("call_timeout_secs"));

        let toml = format!("{MINIMAL}\n[embedding]\ntimeout_secs = 10\ncall_timeout_secs = 60\n");
        assert_eq!(parse_config(&toml).unwrap().embedding.call_timeout_secs, Some(60));
    }

    #[test]
    fn test_filesystem_source_defaults() {
        let toml = format!("{MINIMAL}\n[sources.filesystem]\nroot = \"./docs\"\n");
        let config = parse_config(&toml).unwrap();
        let fs = config.sources.filesystem.unwrap();
        assert_eq!(fs.include_globs, vec!["**/*.md", "**/*.txt"]);
        assert_eq!(fs.fetch_timeout_secs, 30);
    }
}
