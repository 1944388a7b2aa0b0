//! Error type bridging domain errors and HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rideflow_dispatch::DispatchError;
use serde::Serialize;
use std::fmt;

/// Application error carried out of handlers.
///
/// Serializes to a `{code, message}` JSON body with the matching HTTP
/// status; internal causes are logged, never exposed.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    source: Option<anyhow::Error>,
}

impl AppError {
    /// Create an error with an explicit status and stable code.
    #[must_use]
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.into(),
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause for logging.
    #[must_use]
    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// 400 with a caller-visible validation code.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message)
    }

    /// 404 for an unknown resource.
    #[must_use]
    pub fn not_found(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, code, message)
    }

    /// 500 with a generic message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", message)
    }

    /// The stable error code.
    #[must_use]
    pub fn code(&self) -> &str {
        &self.code
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_ref()
            .map(|e| e.as_ref() as &(dyn std::error::Error + 'static))
    }
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(
                status = %self.status,
                code = %self.code,
                message = %self.message,
                source = ?self.source,
                "internal server error"
            );
        }

        let body = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        let code = err.code().to_string();
        let status = match &err {
            DispatchError::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::RideNotFound(_) => StatusCode::NOT_FOUND,
            DispatchError::IdempotencyConflict => StatusCode::CONFLICT,
            DispatchError::RideAlreadyAccepted(_)
            | DispatchError::InvalidState(_)
            | DispatchError::UnauthorizedDriver { .. }
            | DispatchError::CannotCancel => StatusCode::BAD_REQUEST,
            DispatchError::Store(_) | DispatchError::Kv(_) | DispatchError::Bus(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status.is_server_error() {
            Self::new(status, code, "an internal error occurred").with_source(err.into())
        } else {
            Self::new(status, code, err.to_string())
        }
    }
}

impl From<rideflow_surge::SurgeError> for AppError {
    fn from(err: rideflow_surge::SurgeError) -> Self {
        Self::internal("an internal error occurred").with_source(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rideflow_core::RideId;

    #[test]
    fn dispatch_errors_map_to_stable_codes() {
        let err = AppError::from(DispatchError::ServiceUnavailable);
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.code(), "SERVICE_UNAVAILABLE");

        let err = AppError::from(DispatchError::RideAlreadyAccepted(RideId::new()));
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), "RIDE_ALREADY_ACCEPTED");

        let err = AppError::from(DispatchError::IdempotencyConflict);
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = AppError::from(DispatchError::RideNotFound(RideId::new()));
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn display_pairs_code_and_message() {
        let err = AppError::validation("lat out of range");
        assert_eq!(err.to_string(), "[VALIDATION_ERROR] lat out of range");
    }
}
