//! Error types shared across the tillsync crates.

use thiserror::Error;

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Database-layer failures, wrapped by storage implementations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("database query failed: {0}")]
    QueryFailed(String),

    #[error("database connection failed: {0}")]
    ConnectionFailed(String),

    #[error("{0}")]
    Internal(String),
}

/// Retry classification for settlement processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Retrying may succeed (collaborator timeouts, contention).
    Retryable,
    /// Retrying cannot change the outcome; surface for manual review.
    Permanent,
}

/// Errors raised by tillsync domain services.
#[derive(Debug, Error)]
pub enum Error {
    /// Pairing code is unknown or already consumed.
    #[error("invalid pairing code")]
    PairingCodeInvalid,

    /// Pairing code exists but its expiry deadline has passed.
    #[error("pairing code expired")]
    PairingExpired,

    /// Device exists and is already paired; re-pairing requires staff action.
    #[error("device {0} is already paired and active")]
    DeviceAlreadyActive(String),

    /// Referenced device does not exist.
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// Device is not in the status the operation requires.
    #[error("device {device_id} is {status}; {required}")]
    DeviceNotEligible {
        device_id: String,
        status: String,
        required: String,
    },

    /// Queue entry insert lost the idempotency-key race. Treated as a
    /// duplicate by ingestion, never as a failure.
    #[error("duplicate idempotency key: {0}")]
    DuplicateIdempotencyKey(String),

    /// Key material for the stated version is missing or the payload does
    /// not authenticate under it. Permanent: the payload cannot be recovered.
    #[error("encryption key mismatch: {0}")]
    EncryptionKeyMismatch(String),

    /// Decrypted payload failed shape validation.
    #[error("validation failure: {0}")]
    Validation(String),

    /// Collaborator failure that is worth retrying with backoff.
    #[error("transient failure: {0}")]
    Transient(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl Error {
    /// Classify for the settlement retry policy. Database errors are treated
    /// as retryable: the entry itself may still settle once the store recovers.
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transient(_) | Self::Database(_) => RetryClass::Retryable,
            _ => RetryClass::Permanent,
        }
    }

    /// Short stable code used in activity metadata and per-entry error reasons.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::PairingCodeInvalid => "pairing_code_invalid",
            Self::PairingExpired => "pairing_expired",
            Self::DeviceAlreadyActive(_) => "device_already_active",
            Self::DeviceNotFound(_) => "device_not_found",
            Self::DeviceNotEligible { .. } => "device_not_eligible",
            Self::DuplicateIdempotencyKey(_) => "duplicate_idempotency_key",
            Self::EncryptionKeyMismatch(_) => "encryption_key_mismatch",
            Self::Validation(_) => "validation_failure",
            Self::Transient(_) => "transient_failure",
            Self::Json(_) => "json_error",
            Self::Database(_) => "database_error",
        }
    }
}
