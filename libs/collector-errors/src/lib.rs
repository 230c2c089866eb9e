//! Unified error handling for PulseOne Collector
//!
//! One error enum shared across the model, calculation, cache, and
//! runtime crates, so callers see a single error surface instead of
//! a different type per layer.

use thiserror::Error;

/// Coarse error classification used for logging level and retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Protocol,
    Connection,
    Timeout,
    Calculation,
    Cache,
    Validation,
    NotFound,
    Internal,
}

/// Mirrors the shape of a client-library error kind (connection dropped,
/// command rejected, reply didn't match the expected type, and so on) so
/// `CacheError` can carry that detail without every caller matching on a
/// free-form string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheErrorKind {
    Io,
    Timeout,
    AuthenticationFailed,
    ResponseError,
    TypeError,
}

#[derive(Debug, Clone, Error)]
#[error("cache error ({kind:?}): {message}")]
pub struct CacheError {
    pub kind: CacheErrorKind,
    pub message: String,
}

impl CacheError {
    pub fn new(kind: CacheErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Error type shared by every `collector-*` crate.
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("invalid configuration: {field}: {reason}")]
    ConfigInvalid { field: String, reason: String },

    #[error("device unreachable: {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("operation timed out after {0}ms")]
    Timeout(u64),

    #[error("point not writable: {0}")]
    NotWritable(String),

    #[error("value out of range: {0}")]
    Range(String),

    #[error("driver authentication failed: {0}")]
    AuthFailed(String),

    #[error("expression error: {0}")]
    Expression(String),

    #[error("script timed out after {0}ms")]
    ScriptTimeout(u64),

    #[error(transparent)]
    CacheWrite(#[from] CacheError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, CollectorError>;

impl CollectorError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::ConfigInvalid { .. } => ErrorCategory::Configuration,
            Self::Unreachable { .. } | Self::AuthFailed(_) | Self::Io(_) => ErrorCategory::Connection,
            Self::Timeout(_) | Self::ScriptTimeout(_) => ErrorCategory::Timeout,
            Self::NotWritable(_) | Self::Range(_) => ErrorCategory::Protocol,
            Self::Expression(_) => ErrorCategory::Calculation,
            Self::CacheWrite(_) => ErrorCategory::Cache,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Validation(_) => ErrorCategory::Validation,
            Self::Serialization(_) | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Whether a caller should retry this operation after backing off.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Cache
        )
    }

    pub fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal => Level::ERROR,
            ErrorCategory::Connection | ErrorCategory::Timeout | ErrorCategory::Protocol => {
                Level::WARN
            },
            ErrorCategory::Validation | ErrorCategory::NotFound => Level::INFO,
            _ => Level::WARN,
        }
    }

    /// Stable, machine-readable identifier for this error variant, for log
    /// fields and metrics labels that must not change shape when the
    /// display message's wording changes.
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConfigInvalid { .. } => "CONFIG_INVALID",
            Self::Unreachable { .. } => "UNREACHABLE",
            Self::Timeout(_) => "TIMEOUT",
            Self::NotWritable(_) => "NOT_WRITABLE",
            Self::Range(_) => "RANGE",
            Self::AuthFailed(_) => "AUTH_FAILED",
            Self::Expression(_) => "EXPRESSION",
            Self::ScriptTimeout(_) => "SCRIPT_TIMEOUT",
            Self::CacheWrite(_) => "CACHE_WRITE",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION",
            Self::Serialization(_) => "SERIALIZATION",
            Self::Io(_) => "IO",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// Suggested backoff before retrying the operation that produced this
    /// error, or 0 for errors a retry can never fix.
    pub fn retry_delay_ms(&self) -> u64 {
        match self {
            Self::Timeout(ms) | Self::ScriptTimeout(ms) => *ms,
            Self::Unreachable { .. } | Self::AuthFailed(_) => 1_000,
            Self::CacheWrite(_) => 200,
            Self::Io(_) => 500,
            _ => 0,
        }
    }
}

impl From<serde_json::Error> for CollectorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for CollectorError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
