//! TOML configuration.
//!
//! Every section is optional: a missing file or a missing key falls back to
//! the built-in defaults, which match the production deployment (Groq
//! generation model, multilingual local embeddings, `chroma_db/` index
//! directory, `data/` source directory). Secrets never live in the file; the
//! generation API key is read from `GROQ_API_KEY` when the client is built.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_LLM_MODEL: &str = "meta-llama/llama-4-scout-17b-16e-instruct";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const DEFAULT_EMBEDDING_MODEL: &str = "multilingual-e5-base";
pub const DEFAULT_PERSIST_DIR: &str = "chroma_db";
pub const DEFAULT_COLLECTION: &str = "policy_docs";
pub const DEFAULT_DATA_DIR: &str = "data";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub data: DataConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sessions: SessionConfig,
    #[serde(default)]
    pub startup: StartupConfig,
}

/// Location of the persistent vector index.
#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            persist_dir: default_persist_dir(),
            collection: default_collection(),
        }
    }
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from(DEFAULT_PERSIST_DIR)
}
fn default_collection() -> String {
    DEFAULT_COLLECTION.to_string()
}

/// Source documents scanned by ingestion and by the startup rebuild.
#[derive(Debug, Deserialize, Clone)]
pub struct DataConfig {
    #[serde(default = "default_data_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: default_data_dir(),
            include_globs: default_include_globs(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(DEFAULT_DATA_DIR)
}
fn default_include_globs() -> Vec<String> {
    vec!["*.pdf".to_string()]
}

/// Semantic chunker parameters.
#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    /// A break is inserted where the distance between adjacent sentence
    /// windows exceeds this percentile of all distances in the document.
    #[serde(default = "default_breakpoint_percentile")]
    pub breakpoint_percentile: f64,
    /// Number of neighbouring sentences on each side folded into a window.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default)]
    pub min_chunk_chars: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            breakpoint_percentile: default_breakpoint_percentile(),
            buffer_size: default_buffer_size(),
            min_chunk_chars: None,
        }
    }
}

fn default_breakpoint_percentile() -> f64 {
    95.0
}
fn default_buffer_size() -> usize {
    1
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
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_embedding_model(),
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some(DEFAULT_EMBEDDING_MODEL.to_string())
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

/// Generation model settings. The API key comes from `GROQ_API_KEY`.
#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default = "default_llm_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_llm_http_timeout_secs")]
    pub timeout_secs: u64,
    /// Upper bound on a whole `process_query` call.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_stream")]
    pub stream: bool,
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            temperature: 0.0,
            max_retries: default_llm_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            timeout_secs: default_llm_http_timeout_secs(),
            request_timeout_secs: default_request_timeout_secs(),
            stream: default_stream(),
            max_history_turns: default_max_history_turns(),
        }
    }
}

fn default_llm_base_url() -> String {
    DEFAULT_LLM_BASE_URL.to_string()
}
fn default_llm_model() -> String {
    DEFAULT_LLM_MODEL.to_string()
}
fn default_llm_max_retries() -> u32 {
    2
}
fn default_retry_backoff_ms() -> u64 {
    1000
}
fn default_llm_http_timeout_secs() -> u64 {
    60
}
fn default_request_timeout_secs() -> u64 {
    60
}
fn default_stream() -> bool {
    true
}
fn default_max_history_turns() -> usize {
    20
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_static_dir")]
    pub static_dir: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            static_dir: default_static_dir(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}
fn default_static_dir() -> PathBuf {
    PathBuf::from("web_ui")
}

/// Server-held conversation sessions (opt-in per request via `session_id`).
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    #[serde(default = "default_session_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_max_history_turns")]
    pub max_turns: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_session_ttl_secs(),
            max_turns: default_max_history_turns(),
        }
    }
}

fn default_session_ttl_secs() -> u64 {
    3600
}

/// What the orchestrator does with the existing index when it starts.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Probe the index and rebuild only when it is empty or unreadable.
    #[default]
    RebuildIfUnhealthy,
    /// Wipe and re-ingest on every start. Destroys the existing index.
    RebuildAlways,
    /// Never ingest at startup.
    NeverRebuild,
}

impl std::fmt::Display for StartupPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StartupPolicy::RebuildIfUnhealthy => "rebuild_if_unhealthy",
            StartupPolicy::RebuildAlways => "rebuild_always",
            StartupPolicy::NeverRebuild => "never_rebuild",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct StartupConfig {
    #[serde(default)]
    pub policy: StartupPolicy,
}

/// Read and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the built-in defaults.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if path.exists() {
        load_config(path)
    } else {
        tracing::info!(path = %path.display(), "config file not found, using defaults");
        let config = Config::default();
        validate(&config)?;
        Ok(config)
    }
}

pub fn validate(config: &Config) -> Result<()> {
    if config.retrieval.top_k == 0 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }

    let p = config.chunking.breakpoint_percentile;
    if !(p > 0.0 && p <= 100.0) {
        anyhow::bail!("chunking.breakpoint_percentile must be in (0, 100]");
    }

    if !(0.0..=2.0).contains(&config.llm.temperature) {
        anyhow::bail!("llm.temperature must be in [0.0, 2.0]");
    }

    if config.llm.request_timeout_secs == 0 {
        anyhow::bail!("llm.request_timeout_secs must be > 0");
    }

    if config.db.collection.trim().is_empty() {
        anyhow::bail!("db.collection must not be empty");
    }

    if config.embedding.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }

    match config.embedding.provider.as_str() {
        "openai" | "ollama" => {
            if config.embedding.dims.is_none() || config.embedding.dims == Some(0) {
                anyhow::bail!(
                    "embedding.dims must be > 0 when provider is '{}'",
                    config.embedding.provider
                );
            }
            if config.embedding.model.is_none() {
                anyhow::bail!(
                    "embedding.model must be specified when provider is '{}'",
                    config.embedding.provider
                );
            }
        }
        "disabled" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_yields_production_defaults() {
        let config: Config = toml::from_str("").unwrap();
        validate(&config).unwrap();
        assert_eq!(config.db.persist_dir, PathBuf::from("chroma_db"));
        assert_eq!(config.db.collection, "policy_docs");
        assert_eq!(config.data.dir, PathBuf::from("data"));
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.llm.model, DEFAULT_LLM_MODEL);
        assert_eq!(config.llm.temperature, 0.0);
        assert_eq!(config.llm.max_retries, 2);
        assert_eq!(config.startup.policy, StartupPolicy::RebuildIfUnhealthy);
    }

    #[test]
    fn startup_policy_parses_snake_case() {
        let config: Config = toml::from_str("[startup]\npolicy = \"rebuild_always\"\n").unwrap();
        assert_eq!(config.startup.policy, StartupPolicy::RebuildAlways);
        assert_eq!(config.startup.policy.to_string(), "rebuild_always");
    }

    #[test]
    fn rejects_zero_top_k() {
        let config: Config = toml::from_str("[retrieval]\ntop_k = 0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_percentile() {
        let config: Config =
            toml::from_str("[chunking]\nbreakpoint_percentile = 120.0\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn remote_embedding_requires_dims() {
        let config: Config =
            toml::from_str("[embedding]\nprovider = \"openai\"\nmodel = \"text-embedding-3-small\"\n")
                .unwrap();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("embedding.dims"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config: Config = toml::from_str("[embedding]\nprovider = \"magic\"\n").unwrap();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_or_default(Path::new("/definitely/not/here/corpguide.toml")).unwrap();
        assert_eq!(config.retrieval.top_k, 5);
    }
}
