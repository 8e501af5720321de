//! Port error types.

use thiserror::Error;

/// Errors reported by external capabilities.
#[derive(Debug, Error)]
pub enum PortError {
    /// Object store request failed.
    #[error("Object store error: {0}")]
    ObjectStore(String),

    /// No object exists under the key.
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Object key is empty, absolute or escapes its root.
    #[error("Invalid object key: {0}")]
    InvalidKey(String),

    /// CDN request failed.
    #[error("CDN error: {0}")]
    Cdn(String),

    /// DNS or domain registrar request failed.
    #[error("DNS error: {0}")]
    Dns(String),

    /// Certificate authority request failed.
    #[error("Certificate error: {0}")]
    Certificates(String),

    /// Mail delivery failed.
    #[error("Mail error: {0}")]
    Mail(String),

    /// Template build failed.
    #[error("Template build failed: {0}")]
    Build(String),

    /// Message queue request failed.
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience type alias for port results.
pub type Result<T> = std::result::Result<T, PortError>;
