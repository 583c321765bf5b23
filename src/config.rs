use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub storage: StorageConfig,
    #[serde(default)]
    pub embeddings: EmbeddingsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub statistics: StatisticsConfig,
}

/// Where experiment data lives
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

/// Embeddings backend used for retrieval simulation and semantic chunking
#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingsConfig {
    /// `openai` requires an API key; any other value names a self-hosted
    /// OpenAI-compatible endpoint where the key is optional
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model used by the retriever
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_base: default_api_base(),
            api_key_env: default_api_key_env(),
            batch_size: default_batch_size(),
            cache_capacity: default_cache_capacity(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Retrieval depth: `max(min_k, relevant_multiplier * k)`
#[derive(Debug, Clone, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_min_k")]
    pub min_k: usize,
    #[serde(default = "default_relevant_multiplier")]
    pub relevant_multiplier: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_k: default_min_k(),
            relevant_multiplier: default_relevant_multiplier(),
        }
    }
}

/// Strategy comparison settings
#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    #[serde(default = "default_alpha")]
    pub alpha: f64,
    /// Fraction cut from each end for the trimmed mean
    #[serde(default = "default_trim_fraction")]
    pub trim_fraction: f64,
}

impl Default for StatisticsConfig {
    fn default() -> Self {
        Self {
            alpha: default_alpha(),
            trim_fraction: default_trim_fraction(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_provider() -> String {
    "local".to_string()
}

fn default_model() -> String {
    "BAAI/bge-small-en-v1.5".to_string()
}

fn default_api_base() -> String {
    "http://localhost:8080/v1".to_string()
}

fn default_api_key_env() -> String {
    "EMBEDDINGS_API_KEY".to_string()
}

fn default_batch_size() -> usize {
    64
}

fn default_cache_capacity() -> usize {
    1000
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_min_k() -> usize {
    10
}

fn default_relevant_multiplier() -> usize {
    2
}

fn default_alpha() -> f64 {
    0.05
}

fn default_trim_fraction() -> f64 {
    0.1
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in CHUNKEVAL_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("CHUNKEVAL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::from_file(&config_path)
    }

    /// Parse and validate a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&config_str)
            .with_context(|| format!("Failed to parse {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values
    fn validate(&self) -> Result<()> {
        if !(self.statistics.alpha > 0.0 && self.statistics.alpha < 1.0) {
            anyhow::bail!("statistics.alpha must be between 0 and 1 (exclusive)");
        }

        if !(0.0..0.5).contains(&self.statistics.trim_fraction) {
            anyhow::bail!("statistics.trim_fraction must be in [0, 0.5)");
        }

        if self.retrieval.min_k == 0 {
            anyhow::bail!("retrieval.min_k must be greater than 0");
        }

        if self.embeddings.batch_size == 0 {
            anyhow::bail!("embeddings.batch_size must be greater than 0");
        }

        if self.embeddings.model.trim().is_empty() {
            anyhow::bail!("embeddings.model must not be empty");
        }

        if self.storage.log_level.parse::<log::LevelFilter>().is_err() {
            anyhow::bail!("storage.log_level must be one of off, error, warn, info, debug, trace");
        }

        Ok(())
    }

    /// Get database path
    pub fn db_path(&self) -> &Path {
        &self.storage.db_path
    }
}
