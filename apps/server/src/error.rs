//! HTTP error surface: maps domain errors onto status codes and the JSON
//! error body the register client parses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::{error, warn};

use tillsync_core::Error as CoreError;

pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Request is malformed before it ever reaches a service.
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::Domain(err) => match err {
                CoreError::PairingCodeInvalid | CoreError::PairingExpired => {
                    StatusCode::BAD_REQUEST
                }
                CoreError::DeviceNotFound(_) => StatusCode::NOT_FOUND,
                CoreError::DeviceAlreadyActive(_) | CoreError::DeviceNotEligible { .. } => {
                    StatusCode::FORBIDDEN
                }
                CoreError::DuplicateIdempotencyKey(_) => StatusCode::CONFLICT,
                CoreError::EncryptionKeyMismatch(_) => StatusCode::UNPROCESSABLE_ENTITY,
                CoreError::Validation(_) | CoreError::Json(_) => StatusCode::BAD_REQUEST,
                CoreError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
                CoreError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> String {
        match self {
            Self::Domain(err) => err.reason_code().to_ascii_uppercase(),
            Self::BadRequest(_) => "BAD_REQUEST".to_string(),
            Self::Internal(_) => "INTERNAL".to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!("API error ({}): {}", status, self);
        } else {
            warn!("API error ({}): {}", status, self);
        }
        let body = json!({
            "error": "error",
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suspended_device_maps_to_forbidden() {
        let err = ApiError::from(CoreError::DeviceNotEligible {
            device_id: "dev-1".to_string(),
            status: "SUSPENDED".to_string(),
            required: "device must be ACTIVE".to_string(),
        });
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
        assert_eq!(err.code(), "DEVICE_NOT_ELIGIBLE");
    }

    #[test]
    fn unknown_device_maps_to_not_found() {
        let err = ApiError::from(CoreError::DeviceNotFound("dev-9".to_string()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn transient_failures_map_to_service_unavailable() {
        let err = ApiError::from(CoreError::Transient("gateway timeout".to_string()));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "TRANSIENT_FAILURE");
    }
}
