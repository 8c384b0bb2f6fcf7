//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::error::RegistryError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

/// An error rendered as `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub const fn status(&self) -> StatusCode {
        self.status
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::Validation(v) => Self::new(StatusCode::BAD_REQUEST, v.to_string()),
            RegistryError::NameConflict(name) => Self::new(
                StatusCode::CONFLICT,
                format!("machine {name:?} already registered"),
            ),
            RegistryError::NotFound(name) => {
                Self::new(StatusCode::NOT_FOUND, format!("machine {name:?} not found"))
            }
            e @ RegistryError::PoolExhausted { .. } => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, e.to_string())
            }
            RegistryError::Storage(detail) => {
                error!(error = %detail, "Storage failure");
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                error: self.message,
            }),
        )
            .into_response()
    }
}
