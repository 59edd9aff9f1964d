//! Error types for the loadsim API layer.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use loadsim_service::error::PlanError;
use serde::Serialize;
use thiserror::Error;

/// Error type for API operations.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The requested run cannot be planned.
    #[error("invalid run: {0}")]
    Plan(#[from] PlanError),

    /// The request body could not be parsed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Unexpected failures while handling the request.
    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

/// Result type for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Plan(err) => {
                tracing::debug!(error = err as &dyn std::error::Error, "rejected run");
                StatusCode::BAD_REQUEST
            }
            ApiError::BadRequest(msg) => {
                tracing::debug!("bad request: {}", msg);
                StatusCode::BAD_REQUEST
            }
            ApiError::Internal(err) => {
                // Log internal errors as they're unexpected
                tracing::error!(
                    error = AsRef::<dyn std::error::Error>::as_ref(err),
                    "error handling request"
                );
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
