//! Error types for spantrack-client crate

use thiserror::Error;

/// Errors that can occur talking to a Spantrack server
#[derive(Debug, Error)]
pub enum ClientError {
    /// Network/HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Non-success response
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },

    /// Requested span does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// URL parse error
    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// Endpoint scheme is not http(s) or ws(s)
    #[error("Unsupported endpoint scheme: {0}")]
    UnsupportedScheme(String),

    /// Operation timed out
    #[error("Operation timed out")]
    Timeout,
}

impl ClientError {
    /// Create a server error from status and message
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        ClientError::Server {
            status,
            message: message.into(),
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Network(_) | ClientError::WebSocket(_) | ClientError::Timeout => true,
            ClientError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(err.to_string())
    }
}

/// Result type for client operations
pub type ClientResult<T> = Result<T, ClientError>;

/// Seeding the projection from the query API failed
#[derive(Debug, Error)]
#[error("Seed failed: {0}")]
pub struct SeedError(#[from] pub ClientError);
