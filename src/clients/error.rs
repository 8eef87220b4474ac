//! Error types for the REST clients.

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur while talking to Elasticsearch, Kibana or Fleet.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The service was not configured on the provider.
    #[error("{0} client is not configured")]
    NotConfigured(&'static str),

    /// The remote object does not exist (HTTP 404).
    #[error("Not found: {0}")]
    NotFound(String),

    /// The API answered with a non-success status.
    #[error("{method} {path} failed with status {status}")]
    Api {
        method: String,
        path: String,
        status: u16,
        body: String,
    },

    /// Transport-level failure (connect, TLS, timeout).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not match the expected shape.
    #[error("Failed to decode response from {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// A configured endpoint or derived URL is invalid.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// TLS material could not be loaded.
    #[error("TLS configuration error: {0}")]
    Tls(String),
}
