//! TOML configuration.
//!
//! Only `[store]` is required; every other section falls back to defaults.
//! See `config/osint.example.toml` for an annotated file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use osint_harness_core::chunk::{ChunkStrategy, ChunkerConfig};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub rag: RagConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    /// Root directory; documents and vectors live in subdirectories.
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default)]
    pub strategy: ChunkStrategy,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
            strategy: ChunkStrategy::default(),
        }
    }
}

impl ChunkingConfig {
    pub fn to_chunker_config(&self) -> ChunkerConfig {
        ChunkerConfig {
            max_chunk_size: self.max_chunk_size,
            overlap: self.overlap,
            strategy: self.strategy,
        }
    }
}

fn default_max_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Prefix texts with a security-domain hint before embedding.
    #[serde(default = "default_true")]
    pub security_prefix: bool,
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
            model: None,
            dims: None,
            security_prefix: true,
            batch_size: 64,
            max_retries: 5,
            timeout_secs: 30,
        }
    }
}

fn default_provider() -> String {
    "hashing".to_string()
}
fn default_true() -> bool {
    true
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

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    /// Override for the messages endpoint (proxies, tests).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            max_tokens: default_llm_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_llm_timeout_secs(),
            base_url: None,
        }
    }
}

fn default_llm_provider() -> String {
    "anthropic".to_string()
}
fn default_llm_model() -> String {
    "claude-3-7-sonnet-20250219".to_string()
}
fn default_llm_max_tokens() -> u32 {
    4096
}
fn default_temperature() -> f32 {
    0.2
}
fn default_llm_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Observations longer than this many characters are truncated.
    #[serde(default = "default_observation_limit")]
    pub observation_limit: usize,
    /// Results requested by the forced initial search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,
    /// Citations at or above this similarity mark an answer as grounded.
    #[serde(default = "default_min_grounding_similarity")]
    pub min_grounding_similarity: f32,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            observation_limit: default_observation_limit(),
            search_limit: default_search_limit(),
            min_grounding_similarity: default_min_grounding_similarity(),
        }
    }
}

fn default_max_iterations() -> usize {
    5
}
fn default_observation_limit() -> usize {
    1800
}
fn default_search_limit() -> usize {
    3
}
fn default_min_grounding_similarity() -> f32 {
    0.2
}

/// Direct retrieve-and-answer settings (`osint rag`).
#[derive(Debug, Deserialize, Clone)]
pub struct RagConfig {
    /// Chunks retrieved as context.
    #[serde(default = "default_rag_top_k")]
    pub top_k: usize,
    /// Characters of each chunk shown in the prompt.
    #[serde(default = "default_rag_context_chars")]
    pub context_chars: usize,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            top_k: default_rag_top_k(),
            context_chars: default_rag_context_chars(),
        }
    }
}

fn default_rag_top_k() -> usize {
    3
}
fn default_rag_context_chars() -> usize {
    800
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate config text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    // Validate chunking
    if config.chunking.max_chunk_size == 0 {
        bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chunk_size {
        bail!(
            "chunking.overlap ({}) must be smaller than chunking.max_chunk_size ({})",
            config.chunking.overlap,
            config.chunking.max_chunk_size
        );
    }

    // Validate embedding
    match config.embedding.provider.as_str() {
        "disabled" | "hashing" | "openai" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, hashing, openai, or local.",
            other
        ),
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }
    if config.embedding.provider == "openai" {
        if config.embedding.dims.is_none() {
            bail!("embedding.dims must be specified when provider is 'openai'");
        }
        if config.embedding.model.is_none() {
            bail!("embedding.model must be specified when provider is 'openai'");
        }
    }

    // Validate llm
    match config.llm.provider.as_str() {
        "anthropic" => {}
        other => bail!("Unknown llm provider: '{}'. Must be anthropic.", other),
    }
    if !(0.0..=1.0).contains(&config.llm.temperature) {
        bail!("llm.temperature must be in [0.0, 1.0]");
    }
    if config.llm.max_tokens == 0 {
        bail!("llm.max_tokens must be > 0");
    }

    // Validate agent
    if config.agent.max_iterations == 0 {
        bail!("agent.max_iterations must be >= 1");
    }
    if config.agent.search_limit == 0 {
        bail!("agent.search_limit must be >= 1");
    }

    // Validate rag
    if config.rag.top_k == 0 {
        bail!("rag.top_k must be >= 1");
    }

    Ok(())
}
