//! Error types for bgsave

use hyper::StatusCode;
use mongodb::error::ErrorKind;

/// Main error type for bgsave operations
#[derive(Debug, thiserror::Error)]
pub enum BgSaveError {
    /// Cache connection or call failure. Aborts the current flush cycle.
    #[error("Cache error: {0}")]
    Cache(String),

    /// Store connection or call failure. Aborts the current flush cycle.
    #[error("Database error: {0}")]
    Database(String),

    /// A round trip exceeded the configured I/O timeout.
    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("No cached value for key: {0}")]
    Missing(String),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Identity mismatch: {0}")]
    Identity(String),

    #[error("Invalid key: {0}")]
    KeyFormat(String),

    /// The store rejected a single record.
    #[error("Upsert rejected: {0}")]
    Upsert(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BgSaveError {
    /// True for failures of the connection itself rather than of one record.
    ///
    /// The flusher abandons the rest of its cycle on these.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Cache(_) | Self::Database(_) | Self::Timeout(_))
    }

    /// Short label used in logs and skip counters
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Cache(_) | Self::Database(_) | Self::Timeout(_) => "transport",
            Self::Missing(_) | Self::Decode(_) | Self::Identity(_) => "decode",
            Self::KeyFormat(_) => "key_format",
            Self::Upsert(_) => "upsert",
            Self::BadRequest(_) => "bad_request",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Config(_) => "config",
            Self::Internal(_) => "internal",
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Cache(_) | Self::Database(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<std::io::Error> for BgSaveError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for BgSaveError {
    fn from(err: serde_json::Error) -> Self {
        Self::BadRequest(format!("JSON error: {}", err))
    }
}

impl From<redis::RedisError> for BgSaveError {
    fn from(err: redis::RedisError) -> Self {
        Self::Cache(err.to_string())
    }
}

impl From<mongodb::error::Error> for BgSaveError {
    fn from(err: mongodb::error::Error) -> Self {
        match *err.kind {
            ErrorKind::Io(_)
            | ErrorKind::ServerSelection { .. }
            | ErrorKind::ConnectionPoolCleared { .. }
            | ErrorKind::DnsResolve { .. } => Self::Database(err.to_string()),
            _ => Self::Upsert(err.to_string()),
        }
    }
}

impl From<tokio::time::error::Elapsed> for BgSaveError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        Self::Timeout(err.to_string())
    }
}

/// Result type alias for bgsave operations
pub type Result<T> = std::result::Result<T, BgSaveError>;
