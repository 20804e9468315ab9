// Error types for the notification pipeline and its collaborators

use thiserror::Error;

/// Errors returned by [`crate::NotifyStore`] implementations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Referenced row does not exist
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    /// Input rejected before reaching storage
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Stored value could not be decoded
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        StoreError::InvalidInput(msg.into())
    }

    pub fn database(msg: impl Into<String>) -> Self {
        StoreError::Database(msg.into())
    }
}

/// Errors returned by the upstream pull-request source
#[derive(Debug, Error)]
pub enum SourceError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("request ({url}): {message}")]
    Http { url: String, message: String },

    /// Upstream answered with a non-success status code
    #[error("request ({url}): unexpected status code: {status}")]
    Status { url: String, status: u16 },

    /// Response body did not match the expected shape
    #[error("request ({url}): decoding response: {message}")]
    Decode { url: String, message: String },

    /// Client configuration is unusable
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors returned by chat transports
#[derive(Debug, Error)]
pub enum TransportError {
    /// Transport-level failure (connect, timeout, TLS)
    #[error("transport error: {0}")]
    Http(String),

    /// The chat API rejected the request
    #[error("chat API error ({code:?}): {description}")]
    Api {
        code: Option<i64>,
        description: String,
    },

    /// Response body did not match the expected shape
    #[error("decoding response: {0}")]
    Decode(String),
}

/// Invalid scheduling configuration (fatal at startup)
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {name}: {value:?} (must be a positive duration)")]
    NonPositiveDuration {
        name: &'static str,
        value: std::time::Duration,
    },
}
