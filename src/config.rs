//! Configuration loading and validation.
//!
//! Docent is configured with a single TOML file (default
//! `config/docent.toml`). Only `[db]` is required; every other section
//! falls back to defaults.
//!
//! ```toml
//! [db]
//! path = "./data/docent.sqlite"
//!
//! [chunking]
//! max_tokens = 500
//! overlap_tokens = 50
//!
//! [embedding]
//! provider = "hashing"
//! dims = 384
//!
//! [generation]
//! provider = "openai"
//! model = "llama-3.1-8b-instant"
//! url = "https://api.groq.com/openai/v1"
//! api_key_env = "GROQ_API_KEY"
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// How long a writer waits on a locked database before failing.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_busy_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    #[serde(default = "default_overlap")]
    pub overlap_tokens: usize,
    /// Tokens searched backward from the hard limit for a sentence or
    /// paragraph boundary.
    #[serde(default = "default_boundary_window")]
    pub boundary_window: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            overlap_tokens: default_overlap(),
            boundary_window: default_boundary_window(),
        }
    }
}

fn default_max_tokens() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_boundary_window() -> usize {
    32
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `hashing`, `local`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL for `openai` (OpenAI-compatible) and `ollama`.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_backoff_base_ms() -> u64 {
    1000
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: Option<f32>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: None,
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default = "default_budget_tokens")]
    pub budget_tokens: usize,
    #[serde(default = "default_system_reserve")]
    pub system_reserve_tokens: usize,
    #[serde(default = "default_chunk_budget")]
    pub chunk_budget_tokens: usize,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            budget_tokens: default_budget_tokens(),
            system_reserve_tokens: default_system_reserve(),
            chunk_budget_tokens: default_chunk_budget(),
            system_prompt: default_system_prompt(),
        }
    }
}

/// 80% of a 32768-token model window.
fn default_budget_tokens() -> usize {
    26214
}
fn default_system_reserve() -> usize {
    512
}
fn default_chunk_budget() -> usize {
    8192
}
fn default_system_prompt() -> String {
    "You are a helpful assistant. Answer using the provided context when it is relevant, \
     and say so when the context does not contain the answer."
        .to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled` or `openai` (any OpenAI-compatible chat endpoint).
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_key_env: default_api_key_env(),
            temperature: 0.0,
            max_retries: default_max_retries(),
            timeout_secs: default_generation_timeout(),
            backoff_base_ms: default_backoff_base_ms(),
        }
    }
}

fn default_generation_timeout() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_workers() -> usize {
    2
}
fn default_queue_capacity() -> usize {
    64
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
    #[serde(default = "default_call_timeout")]
    pub call_timeout_secs: u64,
    /// Where repositories are cloned.
    #[serde(default = "default_workspace_dir")]
    pub workspace_dir: PathBuf,
    /// Where generated documentation is written, relative to the workspace.
    #[serde(default = "default_docs_dir")]
    pub docs_dir: PathBuf,
    /// Source files read per documentation job.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            protocol_version: default_protocol_version(),
            call_timeout_secs: default_call_timeout(),
            workspace_dir: default_workspace_dir(),
            docs_dir: default_docs_dir(),
            max_files: default_max_files(),
        }
    }
}

fn default_protocol_version() -> String {
    docent_core::protocol::PROTOCOL_VERSION.to_string()
}
fn default_call_timeout() -> u64 {
    120
}
fn default_workspace_dir() -> PathBuf {
    PathBuf::from("./data/workspace")
}
fn default_docs_dir() -> PathBuf {
    PathBuf::from("docs")
}
fn default_max_files() -> usize {
    20
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
    "127.0.0.1:7331".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

fn default_log_format() -> String {
    "pretty".to_string()
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate a TOML config document.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.max_tokens == 0 {
        bail!("chunking.max_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.max_tokens {
        bail!(
            "chunking.overlap_tokens ({}) must be < chunking.max_tokens ({})",
            config.chunking.overlap_tokens,
            config.chunking.max_tokens
        );
    }

    // Retrieval
    if config.retrieval.top_k == 0 {
        bail!("retrieval.top_k must be >= 1");
    }
    if let Some(min) = config.retrieval.min_score {
        if !(-1.0..=1.0).contains(&min) {
            bail!("retrieval.min_score must be in [-1.0, 1.0]");
        }
    }

    // Context
    let ctx = &config.context;
    if ctx.system_reserve_tokens >= ctx.budget_tokens {
        bail!("context.system_reserve_tokens must be < context.budget_tokens");
    }
    if ctx.chunk_budget_tokens == 0 {
        bail!("context.chunk_budget_tokens must be > 0");
    }

    if config.db.max_connections == 0 {
        bail!("db.max_connections must be >= 1");
    }

    // Embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "local" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, local, openai, or ollama.",
            other
        ),
    }
    if config.embedding.is_enabled() {
        if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                config.embedding.provider
            );
        }
        let needs_model = matches!(config.embedding.provider.as_str(), "openai" | "ollama");
        if needs_model && config.embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                config.embedding.provider
            );
        }
        if config.embedding.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }
    }

    // Generation
    match config.generation.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.generation.model.is_none() {
                bail!("generation.model must be specified when provider is 'openai'");
            }
        }
        other => bail!(
            "Unknown generation provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    // Ingest
    if config.ingest.workers == 0 {
        bail!("ingest.workers must be >= 1");
    }
    if config.ingest.queue_capacity == 0 {
        bail!("ingest.queue_capacity must be >= 1");
    }

    // Logging
    match config.logging.format.as_str() {
        "pretty" | "json" => {}
        other => bail!("Unknown logging.format '{}'. Must be pretty or json.", other),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = parse_config("[db]\npath = \"/tmp/x.sqlite\"\n").unwrap();
        assert_eq!(config.chunking.max_tokens, 500);
        assert_eq!(config.chunking.overlap_tokens, 50);
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.context.budget_tokens, 26214);
        assert_eq!(config.agent.protocol_version, "1.0");
        assert!(!config.embedding.is_enabled());
    }

    #[test]
    fn test_overlap_must_be_below_max() {
        let err = parse_config(
            "[db]\npath = \"x\"\n[chunking]\nmax_tokens = 50\noverlap_tokens = 50\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("overlap_tokens"));
    }

    #[test]
    fn test_enabled_embedding_requires_dims() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"hashing\"\n").is_err());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"hashing\"\ndims = 64\n"
        )
        .is_ok());
        assert!(parse_config(
            "[db]\npath = \"x\"\n[embedding]\nprovider = \"openai\"\ndims = 64\n"
        )
        .is_err());
    }

    #[test]
    fn test_unknown_providers_rejected() {
        assert!(parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"magic\"\n").is_err());
        assert!(parse_config("[db]\npath = \"x\"\n[generation]\nprovider = \"magic\"\n").is_err());
    }

    #[test]
    fn test_example_config_parses() {
        let config = parse_config(include_str!("../config/docent.example.toml")).unwrap();
        assert_eq!(config.embedding.dims, Some(384));
        assert_eq!(config.db.busy_timeout_ms, 5000);
        assert_eq!(config.server.bind, "127.0.0.1:7331");
    }

    #[test]
    fn test_reserve_must_fit_budget() {
        assert!(parse_config(
            "[db]\npath = \"x\"\n[context]\nbudget_tokens = 100\nsystem_reserve_tokens = 100\n"
        )
        .is_err());
    }
}
