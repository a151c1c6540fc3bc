use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{OpscribeError, Result};

/// Top-level configuration for Opscribe.
///
/// Loaded from `~/.opscribe/config.toml` by default. Every section falls
/// back to its defaults when omitted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpscribeConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
}

impl OpscribeConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: OpscribeConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration if the file exists.
    ///
    /// Returns `Ok(None)` for a missing file. A file that exists but cannot
    /// be read, parsed or validated is an error, never a silent fallback.
    pub fn load_if_present(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.embedding.dimensions == 0 {
            return Err(OpscribeError::Config(
                "embedding.dimensions must be greater than 0".to_string(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(OpscribeError::Config(
                "embedding.batch_size must be greater than 0".to_string(),
            ));
        }
        if self.retrieval.max_limit == 0 {
            return Err(OpscribeError::Config(
                "retrieval.max_limit must be greater than 0".to_string(),
            ));
        }
        if self.retrieval.default_limit == 0
            || self.retrieval.default_limit > self.retrieval.max_limit
        {
            return Err(OpscribeError::Config(format!(
                "retrieval.default_limit must be between 1 and {}",
                self.retrieval.max_limit
            )));
        }
        Ok(())
    }

    /// Absolute path of the SQLite database, with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        expand_home(&self.general.data_dir).join(&self.storage.database_file)
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory holding the SQLite database.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
    /// HTTP API port (bound on 127.0.0.1).
    pub port: u16,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.opscribe/data".to_string(),
            log_level: "info".to_string(),
            port: 3040,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Database file name, relative to `general.data_dir`.
    pub database_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_file: "opscribe.db".to_string(),
        }
    }
}

/// Embedding provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Provider backend: "openai" or "mock".
    pub provider: String,
    /// Embedding model name.
    pub model: String,
    /// Vector dimension. Fixed for the lifetime of a database.
    pub dimensions: usize,
    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,
    /// Environment variable holding the API key.
    pub api_key_env: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
    /// Retries for transient provider failures.
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds.
    pub retry_backoff_ms: u64,
    /// Maximum number of passages per embedding request.
    pub batch_size: usize,
    /// Bound on one embedding call including its retries and backoff.
    /// Derived from the per-request timeout and retry policy when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub call_timeout_secs: Option<u64>,
}

impl EmbeddingConfig {
    /// Time allowed for one `embed`/`embed_many` call as seen by callers.
    ///
    /// Covers `max_retries + 1` attempts of `timeout_secs` each plus the
    /// exponential backoff between them, so a provider that recovers within
    /// its retry policy is never cut short.
    pub fn call_timeout(&self) -> Duration {
        if let Some(secs) = self.call_timeout_secs {
            return Duration::from_secs(secs);
        }
        let attempts = u64::from(self.max_retries).saturating_add(1);
        let requests_ms = self
            .timeout_secs
            .saturating_mul(1000)
            .saturating_mul(attempts);
        let backoff_ms = (0..self.max_retries).fold(0u64, |total, retry| {
            let step = self
                .retry_backoff_ms
                .saturating_mul(2u64.saturating_pow(retry));
            total.saturating_add(step)
        });
        Duration::from_millis(requests_ms.saturating_add(backoff_ms))
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_secs: 30,
            max_retries: 3,
            retry_backoff_ms: 500,
            batch_size: 64,
            call_timeout_secs: None,
        }
    }
}

/// Retrieval configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Number of results when the caller does not specify a limit.
    pub default_limit: usize,
    /// Upper bound applied to caller-supplied limits.
    pub max_limit: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            max_limit: 50,
        }
    }
}
