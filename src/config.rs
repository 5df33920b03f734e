use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/ragline.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            overlap: default_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    crate::chunk::DEFAULT_MAX_CHUNK_SIZE
}
fn default_overlap() -> usize {
    crate::chunk::DEFAULT_OVERLAP
}

/// Embedding service options. The API key itself never appears in config
/// files; `api_key_env` names the environment variable holding it, read
/// once at client construction.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_embedding_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_input_tokens")]
    pub max_input_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_embedding_model(),
            base_url: default_base_url(),
            dims: default_dims(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            concurrency: default_concurrency(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

/// Completion service options. Temperature and the generation cap are
/// deliberately configuration, not constants.
#[derive(Debug, Deserialize, Clone)]
pub struct CompletionConfig {
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_completion_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_completion_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_completion_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            model: default_completion_model(),
            base_url: default_base_url(),
            timeout_secs: default_completion_timeout_secs(),
            max_retries: default_completion_max_retries(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_results")]
    pub max_results: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_results: default_max_results(),
            threshold: default_threshold(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}
fn default_completion_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_dims() -> usize {
    1536
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_completion_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    5
}
fn default_completion_max_retries() -> u32 {
    3
}
fn default_concurrency() -> usize {
    4
}
fn default_max_input_tokens() -> usize {
    7000
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_results() -> usize {
    5
}
fn default_threshold() -> f32 {
    0.3
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.chunking.max_chunk_size == 0 {
        anyhow::bail!("chunking.max_chunk_size must be > 0");
    }
    if config.chunking.overlap >= config.chunking.max_chunk_size {
        anyhow::bail!("chunking.overlap must be smaller than chunking.max_chunk_size");
    }

    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.embedding.concurrency == 0 {
        anyhow::bail!("embedding.concurrency must be >= 1");
    }
    if config.embedding.max_input_tokens == 0 {
        anyhow::bail!("embedding.max_input_tokens must be > 0");
    }

    if config.retrieval.max_results < 1 {
        anyhow::bail!("retrieval.max_results must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.threshold) {
        anyhow::bail!("retrieval.threshold must be in [0.0, 1.0]");
    }

    if !(0.0..=2.0).contains(&config.completion.temperature) {
        anyhow::bail!("completion.temperature must be in [0.0, 2.0]");
    }
    if config.completion.max_tokens == 0 {
        anyhow::bail!("completion.max_tokens must be > 0");
    }

    Ok(())
}
