//! Embedding providers selected by `[embedding] provider`.
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | [`DisabledEmbedder`] (lexical-only deployment) |
//! | `"hash"` | [`HashEmbedder`] (offline feature hashing, the default) |
//! | `"openai"` | [`OpenAIEmbedder`] |
//! | `"ollama"` | [`OllamaEmbedder`] |
//! | `"local"` | `LocalEmbedder` (fastembed, `local-embeddings` feature) |
//!
//! Each HTTP attempt is bounded by `embedding.timeout_secs`. Every enabled
//! provider is also wrapped in a [`TimeoutEmbedder`] bounded by
//! [`call_budget`], which covers all attempts plus their backoff, so a hung
//! endpoint degrades retrieval to lexical-only instead of stalling it.
//!
//! # Retry Strategy
//!
//! The OpenAI and Ollama providers use exponential backoff for transient errors:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use hybrid_rag_core::embedding::{DisabledEmbedder, Embedder, HashEmbedder, TimeoutEmbedder};
use hybrid_rag_core::error::EmbedError;

use crate::config::{EmbeddingConfig, DEFAULT_HASH_DIMS};

const OPENAI_EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Sleep before retry number `attempt` (1-based).
fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Overall bound on one embedding call: `embedding.call_timeout_secs` if
/// set, otherwise every attempt at its full timeout plus all backoff.
pub fn call_budget(config: &EmbeddingConfig) -> Duration {
    if let Some(secs) = config.call_timeout_secs {
        return Duration::from_secs(secs);
    }
    let attempts = Duration::from_secs(config.timeout_secs) * (config.max_retries + 1);
    (1..=config.max_retries).map(backoff).sum::<Duration>() + attempts
}

/// POST `body` and return the parsed JSON, retrying transient failures.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    label: &str,
) -> Result<serde_json::Value, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(attempt, ?delay, provider = label, "retrying embedding call");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        EmbedError::InvalidResponse(format!("{} returned non-JSON body: {}", label, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(format!("{} API error {}: {}", label, status, body_text));
                    continue;
                }

                return Err(EmbedError::Rejected(format!(
                    "{} API error {}: {}",
                    label, status, body_text
                )));
            }
            Err(e) => {
                last_err = Some(format!("{} connection error ({}): {}", label, url, e));
                continue;
            }
        }
    }

    Err(EmbedError::Unavailable(last_err.unwrap_or_else(|| {
        format!("{} embedding failed after retries", label)
    })))
}

fn as_vector(value: &serde_json::Value, label: &str) -> Result<Vec<f32>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| EmbedError::InvalidResponse(format!("{}: embedding is not an array", label)))?
        .iter()
        .map(|v| {
            v.as_f64().map(|f| f as f32).ok_or_else(|| {
                EmbedError::InvalidResponse(format!("{}: non-numeric embedding value", label))
            })
        })
        .collect()
}

fn http_client(config: &EmbeddingConfig) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()?)
}

// ============ OpenAI ============

/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config)?,
            api_key,
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            &self.client,
            OPENAI_EMBEDDINGS_URL,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    let data = json.get("data").and_then(|d| d.as_array()).ok_or_else(|| {
        EmbedError::InvalidResponse("OpenAI: missing data array".to_string())
    })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item.get("embedding").ok_or_else(|| {
            EmbedError::InvalidResponse("OpenAI: missing embedding".to_string())
        })?;
        indexed.push((index, as_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Calls `POST /api/embed` on a local Ollama instance.
pub struct OllamaEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config.url.as_deref().unwrap_or(DEFAULT_OLLAMA_URL);

        Ok(Self {
            client: http_client(config)?,
            endpoint: format!("{}/api/embed", url.trim_end_matches('/')),
            model,
            dims,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = post_with_retry(
            &self.client,
            &self.endpoint,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbedError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbedError::InvalidResponse("Ollama: missing embeddings array".to_string()))?
        .iter()
        .map(|e| as_vector(e, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

/// Local inference through fastembed. The model is downloaded from
/// Hugging Face on first use and cached; afterwards no network is needed.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: usize,
    batch_size: usize,
    loaded: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        let (model, default_dims) = fastembed_model(&model_name)?;
        Ok(Self {
            model_name,
            model,
            dims: config.dims.unwrap_or(default_dims),
            batch_size: config.batch_size,
            loaded: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
    use fastembed::EmbeddingModel as M;
    Ok(match name {
        "all-minilm-l6-v2" => (M::AllMiniLML6V2, 384),
        "bge-small-en-v1.5" => (M::BGESmallENV15, 384),
        "bge-base-en-v1.5" => (M::BGEBaseENV15, 768),
        "bge-large-en-v1.5" => (M::BGELargeENV15, 1024),
        "nomic-embed-text-v1.5" => (M::NomicEmbedTextV15, 768),
        "multilingual-e5-small" => (M::MultilingualE5Small, 384),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5, multilingual-e5-small",
            other
        ),
    })
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbedError> {
        let loaded = Arc::clone(&self.loaded);
        let model = self.model.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut guard = loaded
                .lock()
                .map_err(|_| EmbedError::Unavailable("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let init = fastembed::InitOptions::new(model).with_show_download_progress(false);
                let m = fastembed::TextEmbedding::try_new(init).map_err(|e| {
                    EmbedError::Unavailable(format!("failed to initialize local model: {}", e))
                })?;
                *guard = Some(m);
            }
            let Some(m) = guard.as_mut() else {
                return Err(EmbedError::Unavailable("local model not loaded".to_string()));
            };
            m.embed(texts, Some(batch_size))
                .map_err(|e| EmbedError::InvalidResponse(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| EmbedError::Unavailable(format!("local embedding task failed: {}", e)))?
    }
}

/// Build the configured provider, bounded by [`call_budget`].
///
/// `disabled` is returned unwrapped: it fails instantly.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    let inner: Arc<dyn Embedder> = match config.provider.as_str() {
        "disabled" => return Ok(Arc::new(DisabledEmbedder)),
        "hash" => Arc::new(HashEmbedder::new(config.dims.unwrap_or(DEFAULT_HASH_DIMS))),
        "openai" => Arc::new(OpenAIEmbedder::new(config)?),
        "ollama" => Arc::new(OllamaEmbedder::new(config)?),
        #[cfg(feature = "local-embeddings")]
        "local" => Arc::new(LocalEmbedder::new(config)?),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    };

    tracing::info!(
        provider = %config.provider,
        model = inner.model_name(),
        dims = inner.dims(),
        "embedding provider ready"
    );
    Ok(Arc::new(TimeoutEmbedder::new(inner, call_budget(config))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_response_missing_data() {
        let err = parse_openai_response(&serde_json::json!({ "error": "x" })).unwrap_err();
        assert!(matches!(err, EmbedError::InvalidResponse(_)));
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.5], [1.0, 0.0]] });
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);

        let bad = serde_json::json!({ "embeddings": [["a"]] });
        assert!(parse_ollama_response(&bad).is_err());
    }

    #[tokio::test]
    async fn test_hash_provider_is_default() {
        let provider = create_provider(&EmbeddingConfig::default()).unwrap();
        assert_eq!(provider.model_name(), "feature-hash");
        assert_eq!(provider.dims(), DEFAULT_HASH_DIMS);
        let v = provider.embed_one("hello world").await.unwrap();
        assert_eq!(v.len(), DEFAULT_HASH_DIMS);
    }

    #[tokio::test]
    async fn test_disabled_provider_fails() {
        let config = EmbeddingConfig {
            provider: "disabled".to_string(),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(
            provider.embed_one("x").await.unwrap_err(),
            EmbedError::Disabled
        );
    }

    #[tokio::test]
    async fn test_unreachable_ollama_is_unavailable() {
        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(4),
            url: Some("http://127.0.0.1:9".to_string()),
            max_retries: 0,
            timeout_secs: 5,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        let err = provider.embed_one("x").await.unwrap_err();
        assert!(
            matches!(err, EmbedError::Unavailable(_) | EmbedError::Timeout(_)),
            "{err:?}"
        );
    }

    #[test]
    fn test_call_budget_covers_retries() {
        let config = EmbeddingConfig {
            timeout_secs: 10,
            max_retries: 3,
            ..Default::default()
        };
        // four attempts plus 1s + 2s + 4s of backoff
        assert_eq!(call_budget(&config), Duration::from_secs(47));

        let config = EmbeddingConfig {
            call_timeout_secs: Some(15),
            ..config
        };
        assert_eq!(call_budget(&config), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_transient_failure_retried_within_budget() {
        use axum::{http::StatusCode, routing::post, Json, Router};
        use std::sync::atomic::{AtomicUsize, Ordering};

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let app = Router::new().route(
            "/api/embed",
            post(move || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                        (
                            StatusCode::SERVICE_UNAVAILABLE,
                            Json(serde_json::json!({ "error": "model loading" })),
                        )
                    } else {
                        (
                            StatusCode::OK,
                            Json(serde_json::json!({ "embeddings": [[0.6, 0.8]] })),
                        )
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = EmbeddingConfig {
            provider: "ollama".to_string(),
            model: Some("nomic-embed-text".to_string()),
            dims: Some(2),
            url: Some(format!("http://{}", addr)),
            max_retries: 2,
            timeout_secs: 1,
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        let v = provider.embed_one("x").await.unwrap();
        assert_eq!(v, vec![0.6, 0.8]);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
