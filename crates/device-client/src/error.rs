//! Error types for the register-side client.

use thiserror::Error;

/// Result type alias for device client operations.
pub type Result<T> = std::result::Result<T, DeviceClientError>;

/// Retry policy class for API failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiRetryClass {
    Retryable,
    Permanent,
    ReauthRequired,
}

/// Errors that can occur on the register side.
#[derive(Debug, Error)]
pub enum DeviceClientError {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// API error response from the sync service
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    /// Local SQLite store failure
    #[error("Local store error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Encryption failure (sealing a sale, opening stored key material)
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// The register has no paired key material yet
    #[error("Device is not paired")]
    NotPaired,

    /// Invalid request (missing required data, etc.)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl DeviceClientError {
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    /// HTTP status if this is an API error.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Classify error for retry policy.
    pub fn retry_class(&self) -> ApiRetryClass {
        match self {
            Self::Api { status, .. } => match *status {
                401 | 403 => ApiRetryClass::ReauthRequired,
                408 | 409 | 423 | 425 | 429 => ApiRetryClass::Retryable,
                500..=599 => ApiRetryClass::Retryable,
                _ => ApiRetryClass::Permanent,
            },
            Self::Http(_) => ApiRetryClass::Retryable,
            Self::Storage(_) => ApiRetryClass::Retryable,
            Self::Json(_) => ApiRetryClass::Permanent,
            Self::Crypto(_) => ApiRetryClass::Permanent,
            Self::NotPaired => ApiRetryClass::ReauthRequired,
            Self::InvalidRequest(_) => ApiRetryClass::Permanent,
        }
    }
}
