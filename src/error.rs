//! Error types for the inbox backend

use thiserror::Error;

/// Result type alias for inbox operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the inbox backend
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Instance not found or not provisioned
    #[error("instance not found: {0}")]
    InstanceNotFound(String),

    /// Media pipeline error
    #[error("media error: {0}")]
    Media(String),

    /// Media payload failed decoding (base64, data URI)
    #[error("decode error: {0}")]
    Decode(String),

    /// Media payload failed integrity validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Gateway (remote decrypt/download API) error
    #[error("gateway error: {0}")]
    Gateway(String),

    /// Storage backend error
    #[error("storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Resource not found
    #[error("not found: {0}")]
    NotFound(String),
}
