//! Error types for the storage layer.
//!
//! All failures surface as one `StorageError` enum so callers can match on a
//! single type. Driver errors are wrapped with their message text preserved;
//! the underlying sqlx error type never crosses this boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StorageError {
    /// The database URL does not match the supported dialect+driver set.
    #[error("Unsupported database URL: {url}")]
    UnsupportedUrl { url: String },

    /// A dialect schema file is missing on disk. Raised lazily, at load time.
    #[error("Schema file not found: {path}")]
    SchemaFileNotFound { path: String },

    /// A single statement failed. The driver's message is preserved.
    #[error("Database query failed: {message}")]
    QueryFailed { message: String },

    /// A multi-statement script failed part-way through.
    #[error("Database script execution failed: {message}")]
    ScriptFailed { message: String },

    /// Opening or validating a backend connection failed.
    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    /// All connections were checked out and none freed up within the
    /// acquisition timeout.
    #[error("Connection pool exhausted: no connection available within {waited_ms}ms")]
    PoolExhausted { waited_ms: u64 },

    /// Acquisition was attempted after shutdown began.
    #[error("Connection pool is shutting down, rejecting new acquisitions")]
    ShuttingDown,

    /// The pool was used before `initialize_pool` succeeded.
    #[error("Connection pool is not initialized")]
    NotInitialized,

    /// Invalid configuration supplied by the caller.
    #[error("Invalid configuration: {message}")]
    Config { message: String },
}

impl StorageError {
    /// Create a query failure wrapping a driver message.
    pub fn query_failed(message: impl std::fmt::Display) -> Self {
        Self::QueryFailed {
            message: message.to_string(),
        }
    }

    /// Create a script failure wrapping a driver message.
    pub fn script_failed(message: impl std::fmt::Display) -> Self {
        Self::ScriptFailed {
            message: message.to_string(),
        }
    }

    /// Create a connection failure.
    pub fn connection(message: impl std::fmt::Display) -> Self {
        Self::ConnectionFailed {
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Check if this error is retryable by the caller. The storage layer
    /// itself never retries.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::PoolExhausted { .. } | Self::ConnectionFailed { .. }
        )
    }
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
