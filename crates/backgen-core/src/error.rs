//! Error types for the backgen core library.
//!
//! Each module has its own error enum to provide clear error boundaries.
//! The library uses `thiserror` for structured, typed errors.

/// Errors from loading and validating service configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file could not be read (missing, permissions).
    #[error("cannot read config file {path}: {source}")]
    Unreadable {
        /// The path that was attempted.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML.
    #[error("config file {path} is not valid TOML: {source}")]
    Toml {
        /// The file that failed to parse.
        path: String,
        /// The underlying TOML parse error.
        #[source]
        source: toml::de::Error,
    },

    /// A provider name that no backend implements was selected.
    #[error("config selects unknown provider '{name}' for {selected_for}")]
    UnknownProvider {
        /// The unrecognized provider name.
        name: String,
        /// The config key that selected it.
        selected_for: &'static str,
    },

    /// A tuning value outside its allowed range.
    #[error("config value {key} = {value} is out of range: {reason}")]
    OutOfRange {
        /// The offending config key.
        key: &'static str,
        /// The rejected value, rendered for the message.
        value: String,
        /// Why the value is unacceptable.
        reason: &'static str,
    },

    /// A setting that must be present is empty.
    #[error("config key {key} must not be empty")]
    EmptyKey {
        /// The empty config key.
        key: &'static str,
    },
}

/// Errors from interacting with code-generation providers (Gemini, Hugging Face, local).
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Network-level or otherwise retryable failure.
    #[error("provider transient failure: {message}")]
    Transient {
        /// Details about the transient condition.
        message: String,
    },

    /// Provider rate limit hit.
    #[error("provider rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// The request itself is unacceptable to the provider.
    #[error("invalid provider input: {message}")]
    InvalidInput {
        /// Details about what is unacceptable.
        message: String,
    },

    /// The assembled prompt exceeds the provider's context window.
    #[error("prompt exceeds provider context window: {message}")]
    ContextTooLarge {
        /// Details about the oversize request.
        message: String,
    },

    /// Non-recoverable provider failure (bad credentials, missing model).
    #[error("provider unavailable: {message}")]
    Unavailable {
        /// Details about why the provider cannot serve requests.
        message: String,
    },

    /// Provider returned content that could not be parsed.
    #[error("malformed provider output: {message}")]
    Malformed {
        /// Details about the parse failure.
        message: String,
    },
}

impl ProviderError {
    /// Whether the retry policy applies to this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Transient { .. } | ProviderError::RateLimited { .. }
        )
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transient {
            message: e.to_string(),
        }
    }
}

/// Errors from SQLite storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Failed to connect to SQLite database.
    #[error("database connection error: {source}")]
    Connection {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// Database migration failed.
    #[error("database migration error: {source}")]
    Migration {
        /// The underlying migration error.
        #[source]
        source: sqlx::migrate::MigrateError,
    },

    /// A database query failed.
    #[error("database query error: {source}")]
    Query {
        /// The underlying SQLx error.
        #[source]
        source: sqlx::Error,
    },

    /// A row that was expected to exist is missing.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that is missing.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },
}

/// Errors from the on-disk artifact store.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Filesystem operation failed.
    #[error("artifact I/O error at {path}: {source}")]
    Io {
        /// The path being operated on.
        path: String,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Manifest serialization or deserialization failed.
    #[error("manifest error: {message}")]
    Manifest {
        /// Details about the manifest failure.
        message: String,
    },

    /// The requested generation directory does not exist.
    #[error("generation directory not found for {id}")]
    MissingGeneration {
        /// The generation id or version that was looked up.
        id: String,
    },
}

/// Errors from the iteration engine.
#[derive(Debug, thiserror::Error)]
pub enum IterationError {
    /// The underlying provider call failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// The merge produced an empty file set.
    #[error("iteration produced an empty file set")]
    EmptyResult,

    /// The merge dropped more files than the configured threshold allows.
    #[error("iteration would drop files: {result_count} of {existing_count} remain")]
    DataLossDetected {
        /// File count after the merge.
        result_count: usize,
        /// File count before the merge.
        existing_count: usize,
    },
}

/// Errors from stream subscription and token validation.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The presented token does not grant access to this generation.
    #[error("stream token rejected: {reason}")]
    Unauthorized {
        /// Why the token was rejected.
        reason: String,
    },

    /// Another subscriber is already attached to this generation's channel.
    #[error("generation {generation_id} already has an active subscriber")]
    AlreadySubscribed {
        /// The generation whose channel is occupied.
        generation_id: String,
    },
}

/// Errors surfaced by the orchestrator and submission surface.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Malformed submission or iteration request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A referenced entity (parent generation, project) does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The kind of entity that is missing.
        entity: &'static str,
        /// The id that was looked up.
        id: String,
    },

    /// A provider call failed beyond the retry policy.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// A repository call failed.
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// An artifact store operation failed.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// The iteration engine rejected or failed the derivation.
    #[error(transparent)]
    Iteration(#[from] IterationError),

    /// The generation was cancelled at a stage boundary.
    #[error("generation cancelled")]
    Cancelled,

    /// Bug catch-all; the correlation id ties the user-visible failure to logs.
    #[error("internal error (correlation id {correlation_id})")]
    Internal {
        /// Id logged alongside the full error detail.
        correlation_id: String,
    },
}

impl PipelineError {
    /// Stable stage-agnostic message safe to place in a terminal event.
    ///
    /// Internal details stay in logs; the user sees a short description only.
    pub fn user_message(&self) -> String {
        match self {
            PipelineError::Cancelled => "cancelled".to_string(),
            PipelineError::Internal { correlation_id } => {
                format!("internal error (ref {correlation_id})")
            }
            other => other.to_string(),
        }
    }
}
