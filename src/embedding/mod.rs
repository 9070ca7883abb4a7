//! Embedding provider implementations.
//!
//! Every provider implements the core [`Embedder`] trait:
//! - **[`DisabledEmbedder`]**: fails every call; used when embeddings are not configured.
//! - **[`HashingEmbedder`]**: deterministic feature hashing from `docent-core`; no network.
//! - **[`OpenAiEmbedder`]**: any OpenAI-compatible `/embeddings` endpoint, batched.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed models run in-process (feature `local-embeddings-fastembed`).
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use docent::config::EmbeddingConfig;
//! # use docent::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```
//!
//! # Retry Strategy
//!
//! Remote providers go through [`RetryPolicy`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and per-call timeouts → retry
//! - Backoff: `backoff_base_ms` doubled per attempt, capped at 2^5

use std::sync::Arc;

use anyhow::{bail, Context};
use async_trait::async_trait;

use docent_core::embedding::{check_dims, Embedder, HashingEmbedder};
use docent_core::{Error, Result};

use crate::config::EmbeddingConfig;
use crate::retry::{classify_status, AttemptError, RetryPolicy};

const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

// ============ Disabled Provider ============

/// An embedder that always fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::EmbeddingUnavailable(
            "embedding provider is disabled".into(),
        ))
    }

    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(Error::EmbeddingUnavailable(
            "embedding provider is disabled".into(),
        ))
    }
}

// ============ OpenAI-compatible Provider ============

/// Embedder for any OpenAI-compatible `POST {url}/embeddings` endpoint.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OpenAiEmbedder {
    /// Fails if `model` or `dims` is missing, or the API key variable named
    /// by `api_key_env` is not set.
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var(&config.api_key_env)
            .with_context(|| format!("{} environment variable not set", config.api_key_env))?;

        Ok(Self {
            client: reqwest::Client::new(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string()),
            api_key,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::new(config.max_retries, config.backoff_base_ms, config.timeout_secs),
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/embeddings", self.url.trim_end_matches('/'));
        let (client, endpoint, body) = (&self.client, &endpoint, &body);
        let api_key = &self.api_key;

        let vectors = self
            .retry
            .run("embedding", Error::EmbeddingUnavailable, || async move {
                let response = client
                    .post(endpoint)
                    .bearer_auth(api_key)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| AttemptError::Transient(e.to_string()))?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, text, Error::EmbeddingUnavailable));
                }
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| AttemptError::Transient(e.to_string()))?;
                parse_openai_response(&json).map_err(AttemptError::Permanent)
            })
            .await?;

        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_one_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

/// Parse `data[].embedding`, ordered by each item's `index` when present.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| Error::EmbeddingUnavailable("invalid response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| {
                Error::EmbeddingUnavailable("invalid response: missing embedding".into())
            })?;
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let vec: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Embedder for a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    retry: RetryPolicy,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        Ok(Self {
            client: reqwest::Client::new(),
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            model,
            dims,
            batch_size: config.batch_size.max(1),
            retry: RetryPolicy::new(config.max_retries, config.backoff_base_ms, config.timeout_secs),
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let endpoint = format!("{}/api/embed", self.url.trim_end_matches('/'));
        let (client, endpoint, body) = (&self.client, &endpoint, &body);
        let base_url = &self.url;

        let vectors = self
            .retry
            .run("embedding", Error::EmbeddingUnavailable, || async move {
                let response = client
                    .post(endpoint)
                    .json(body)
                    .send()
                    .await
                    .map_err(|e| {
                        AttemptError::Transient(format!(
                            "connection error (is Ollama running at {}?): {}",
                            base_url, e
                        ))
                    })?;
                let status = response.status();
                if !status.is_success() {
                    let text = response.text().await.unwrap_or_default();
                    return Err(classify_status(status, text, Error::EmbeddingUnavailable));
                }
                let json: serde_json::Value = response
                    .json()
                    .await
                    .map_err(|e| AttemptError::Transient(e.to_string()))?;
                parse_ollama_response(&json).map_err(AttemptError::Permanent)
            })
            .await?;

        check_batch(&vectors, texts.len(), self.dims)?;
        Ok(vectors)
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

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.embed_one_batch(&[text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_one_batch(batch).await?);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            Error::EmbeddingUnavailable("invalid response: missing embeddings array".into())
        })?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| {
                    values
                        .iter()
                        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
                        .collect()
                })
                .ok_or_else(|| {
                    Error::EmbeddingUnavailable("invalid response: embedding is not an array".into())
                })
        })
        .collect()
}

fn check_batch(vectors: &[Vec<f32>], expected_len: usize, dims: usize) -> Result<()> {
    if vectors.len() != expected_len {
        return Err(Error::EmbeddingUnavailable(format!(
            "expected {} embeddings, got {}",
            expected_len,
            vectors.len()
        )));
    }
    check_dims(vectors, dims)
}

// ============ Local Provider (fastembed) ============

/// In-process embedder backed by fastembed. The model is downloaded on
/// first use and cached; later calls run offline.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
        config_to_fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "nomic-embed-text-v1.5" => 768,
            "bge-large-en-v1.5" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size.max(1),
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }

    async fn run(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let slot = Arc::clone(&self.model);
        let name = self.model_name.clone();
        let batch_size = self.batch_size;
        let vectors = tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>> {
            let mut guard = slot
                .lock()
                .map_err(|_| Error::EmbeddingUnavailable("local model lock poisoned".into()))?;
            if guard.is_none() {
                let kind = config_to_fastembed_model(&name)
                    .map_err(|e| Error::EmbeddingUnavailable(e.to_string()))?;
                let model = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(kind).with_show_download_progress(false),
                )
                .map_err(|e| {
                    Error::EmbeddingUnavailable(format!("failed to load local model: {}", e))
                })?;
                *guard = Some(model);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| Error::EmbeddingUnavailable("local model not loaded".into()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| Error::EmbeddingUnavailable(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| Error::EmbeddingUnavailable(format!("embedding task failed: {}", e)))??;
        check_dims(&vectors, self.dims)?;
        Ok(vectors)
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut out = self.run(vec![text.to_string()]).await?;
        out.pop()
            .ok_or_else(|| Error::EmbeddingUnavailable("empty embedding response".into()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.run(texts.to_vec()).await
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn config_to_fastembed_model(name: &str) -> anyhow::Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
             nomic-embed-text-v1.5",
            other
        ),
    }
}

/// Create the [`Embedder`] selected by configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"hashing"` | [`HashingEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "hashing" => Ok(Arc::new(HashingEmbedder::new(config.dims.unwrap_or(384)))),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_openai_orders_by_index() {
        let body = json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let vectors = parse_openai_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_openai_missing_data() {
        assert!(parse_openai_response(&json!({"error": "nope"})).is_err());
    }

    #[test]
    fn test_parse_ollama() {
        let vectors = parse_ollama_response(&json!({ "embeddings": [[0.5, 0.5]] })).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 0.5]]);
        assert!(parse_ollama_response(&json!({ "embeddings": [1] })).is_err());
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&[vec![0.0; 3]], 1, 3).is_ok());
        assert!(check_batch(&[vec![0.0; 3]], 2, 3).is_err());
        assert!(matches!(
            check_batch(&[vec![0.0; 2]], 1, 3),
            Err(Error::DimensionMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn test_disabled_is_unavailable() {
        let embedder = create_embedder(&EmbeddingConfig::default()).unwrap();
        assert_eq!(embedder.model_name(), "disabled");
        assert!(matches!(
            embedder.embed("x").await,
            Err(Error::EmbeddingUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_hashing_provider() {
        let config = EmbeddingConfig {
            provider: "hashing".into(),
            dims: Some(32),
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder(&config).unwrap();
        assert_eq!(embedder.dims(), 32);
        assert_eq!(embedder.embed("hello").await.unwrap().len(), 32);
    }
}
