//! Mapping between diesel-level failures and domain errors.

use thiserror::Error;

use tillsync_core::errors::{DatabaseError, Error};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database query failed: {0}")]
    Diesel(#[from] diesel::result::Error),

    #[error("Database connection failed: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error(transparent)]
    Domain(Error),
}

impl From<Error> for StorageError {
    fn from(err: Error) -> Self {
        StorageError::Domain(err)
    }
}

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Diesel(e) => Error::Database(DatabaseError::QueryFailed(e.to_string())),
            StorageError::Pool(e) => {
                Error::Database(DatabaseError::ConnectionFailed(e.to_string()))
            }
            StorageError::Domain(e) => e,
        }
    }
}

/// SQLite reports uniqueness races as constraint violations; repositories
/// that guard idempotency keys translate those into their domain error.
pub fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _
        )
    )
}
