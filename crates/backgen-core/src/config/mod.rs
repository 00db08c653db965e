//! Configuration management for backgen.
//!
//! Supports three-layer configuration loading:
//! 1. Built-in defaults
//! 2. TOML config file (`~/.backgen/config.toml`)
//! 3. Environment variable overrides (`BACKGEN_` prefix) for credentials

mod defaults;

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Top-level configuration for the backgen service.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Provider selection and credentials.
    #[serde(default)]
    pub providers: ProvidersConfig,

    /// Database and artifact store locations.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Artifact retention policy.
    #[serde(default)]
    pub retention: RetentionConfig,

    /// Iteration merge safety settings.
    #[serde(default)]
    pub iteration: IterationConfig,

    /// Event stream lifecycle settings.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Per-stage timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutsConfig,

    /// Auto-project creation settings.
    #[serde(default)]
    pub auto_project: AutoProjectConfig,
}

/// Provider selection: a default plus optional per-task overrides.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Provider used unless a task override applies: "gemini", "huggingface", or "local".
    #[serde(default = "defaults::default_provider")]
    pub default_provider: String,

    /// Override for schema extraction.
    #[serde(default)]
    pub schema_extraction_provider: Option<String>,

    /// Override for code generation.
    #[serde(default)]
    pub code_generation_provider: Option<String>,

    /// Override for code review.
    #[serde(default)]
    pub code_review_provider: Option<String>,

    /// Override for documentation generation.
    #[serde(default)]
    pub documentation_provider: Option<String>,

    /// Gemini credentials and tuning.
    #[serde(default = "defaults::gemini_credentials")]
    pub gemini: ProviderCredentials,

    /// Hugging Face credentials and tuning.
    #[serde(default = "defaults::huggingface_credentials")]
    pub huggingface: ProviderCredentials,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            default_provider: defaults::default_provider(),
            schema_extraction_provider: None,
            code_generation_provider: None,
            code_review_provider: None,
            documentation_provider: None,
            gemini: defaults::gemini_credentials(),
            huggingface: defaults::huggingface_credentials(),
        }
    }
}

/// Credentials and generation tuning for one provider backend.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ProviderCredentials {
    /// API key. Empty means unconfigured.
    #[serde(default)]
    pub api_key: String,

    /// Endpoint override (used by tests and self-hosted deployments).
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Model identifier sent to the backend.
    #[serde(default)]
    pub model_id: String,

    /// Sampling temperature.
    #[serde(default = "defaults::temperature")]
    pub temperature: f32,

    /// Maximum tokens per completion.
    #[serde(default = "defaults::max_output_tokens")]
    pub max_output_tokens: u32,

    /// Safety level hint: "strict", "standard", or "relaxed".
    #[serde(default = "defaults::safety_level")]
    pub safety_level: String,
}

/// Database and artifact store locations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "defaults::db_path")]
    pub db_path: String,

    /// Root directory for the artifact store.
    #[serde(default = "defaults::storage_root")]
    pub storage_root: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: defaults::db_path(),
            storage_root: defaults::storage_root(),
        }
    }
}

/// Artifact retention policy for `ArtifactStore::cleanup`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetentionConfig {
    /// Number of most recent versions kept out of the archive.
    #[serde(default = "defaults::keep_latest")]
    pub keep_latest: usize,

    /// Versions older than this many days are eligible for archiving.
    #[serde(default = "defaults::archive_age_days")]
    pub archive_age_days: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            keep_latest: defaults::keep_latest(),
            archive_age_days: defaults::archive_age_days(),
        }
    }
}

/// Iteration merge safety settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IterationConfig {
    /// Merge safety ratio: results below `threshold * existing` trigger the guard.
    #[serde(default = "defaults::data_loss_threshold")]
    pub data_loss_threshold: f64,

    /// Abort on data loss (true) or downgrade to a warning and proceed (false).
    #[serde(default = "defaults::data_loss_abort")]
    pub data_loss_abort: bool,
}

impl Default for IterationConfig {
    fn default() -> Self {
        Self {
            data_loss_threshold: defaults::data_loss_threshold(),
            data_loss_abort: defaults::data_loss_abort(),
        }
    }
}

/// Event stream lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Seconds without an event before a keepalive is sent.
    #[serde(default = "defaults::heartbeat_s")]
    pub heartbeat_s: u64,

    /// Seconds without an event before the stream closes as idle.
    #[serde(default = "defaults::idle_timeout_s")]
    pub idle_timeout_s: u64,

    /// Stream token lifetime in seconds.
    #[serde(default = "defaults::token_ttl_s")]
    pub token_ttl_s: i64,

    /// Per-generation event buffer capacity.
    #[serde(default = "defaults::buffer_capacity")]
    pub buffer_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            heartbeat_s: defaults::heartbeat_s(),
            idle_timeout_s: defaults::idle_timeout_s(),
            token_ttl_s: defaults::token_ttl_s(),
            buffer_capacity: defaults::buffer_capacity(),
        }
    }
}

/// Per-stage timeout settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    /// Timeout for schema extraction, review, and documentation stages.
    #[serde(default = "defaults::stage_timeout_s")]
    pub stage_timeout_s: u64,

    /// Timeout for the code generation stage.
    #[serde(default = "defaults::codegen_timeout_s")]
    pub codegen_timeout_s: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            stage_timeout_s: defaults::stage_timeout_s(),
            codegen_timeout_s: defaults::codegen_timeout_s(),
        }
    }
}

/// Auto-project creation settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AutoProjectConfig {
    /// Window in seconds within which an auto-created project is reused.
    #[serde(default = "defaults::dedup_window_s")]
    pub dedup_window_s: i64,
}

impl Default for AutoProjectConfig {
    fn default() -> Self {
        Self {
            dedup_window_s: defaults::dedup_window_s(),
        }
    }
}

/// Provider names accepted by the registry.
pub const KNOWN_PROVIDERS: &[&str] = &["gemini", "huggingface", "local"];

impl Config {
    /// Load configuration from the default path (`~/.backgen/config.toml`).
    ///
    /// A missing file yields the built-in defaults rather than an error.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env_overrides();
            Ok(config)
        }
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &std::path::Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.display().to_string(),
            source,
        })?;
        let mut config: Config = toml::from_str(&contents).map_err(|source| ConfigError::Toml {
            path: path.display().to_string(),
            source,
        })?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// The default config file location.
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".backgen")
            .join("config.toml")
    }

    /// Apply `BACKGEN_`-prefixed environment overrides.
    ///
    /// Credentials are the main use: keys should not live in the config file
    /// on shared machines.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("BACKGEN_DEFAULT_PROVIDER") {
            self.providers.default_provider = v;
        }
        if let Ok(v) = env::var("BACKGEN_GEMINI_API_KEY") {
            self.providers.gemini.api_key = v;
        }
        if let Ok(v) = env::var("BACKGEN_HF_API_KEY") {
            self.providers.huggingface.api_key = v;
        }
        if let Ok(v) = env::var("BACKGEN_STORAGE_ROOT") {
            self.storage.storage_root = v;
        }
        if let Ok(v) = env::var("BACKGEN_DB_PATH") {
            self.storage.db_path = v;
        }
    }

    /// Validate the configuration, returning the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (selected_for, name) in self.provider_selections() {
            if !KNOWN_PROVIDERS.contains(&name) {
                return Err(ConfigError::UnknownProvider {
                    name: name.to_string(),
                    selected_for,
                });
            }
        }

        if self.iteration.data_loss_threshold <= 0.0 || self.iteration.data_loss_threshold > 1.0 {
            return Err(ConfigError::OutOfRange {
                key: "iteration.data_loss_threshold",
                value: self.iteration.data_loss_threshold.to_string(),
                reason: "must be in (0.0, 1.0]",
            });
        }

        if self.retention.keep_latest == 0 {
            return Err(ConfigError::OutOfRange {
                key: "retention.keep_latest",
                value: "0".to_string(),
                reason: "must keep at least one version",
            });
        }

        if self.stream.heartbeat_s == 0 || self.stream.idle_timeout_s < self.stream.heartbeat_s {
            return Err(ConfigError::OutOfRange {
                key: "stream.idle_timeout_s",
                value: self.stream.idle_timeout_s.to_string(),
                reason: "idle timeout must be at least one heartbeat interval",
            });
        }

        if self.storage.storage_root.is_empty() {
            return Err(ConfigError::EmptyKey {
                key: "storage.storage_root",
            });
        }

        Ok(())
    }

    /// Every (config key, provider name) pair the current config selects.
    fn provider_selections(&self) -> Vec<(&'static str, &str)> {
        let mut selections: Vec<(&'static str, &str)> =
            vec![("default_provider", self.providers.default_provider.as_str())];
        for (key, value) in [
            (
                "schema_extraction_provider",
                &self.providers.schema_extraction_provider,
            ),
            (
                "code_generation_provider",
                &self.providers.code_generation_provider,
            ),
            ("code_review_provider", &self.providers.code_review_provider),
            (
                "documentation_provider",
                &self.providers.documentation_provider,
            ),
        ] {
            if let Some(name) = value {
                selections.push((key, name.as_str()));
            }
        }
        selections
    }
}
