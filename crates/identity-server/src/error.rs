use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use identity_core::ResolveError;
use serde_json::json;

/// Failure of an HTTP request, rendered as `{"error": .., "kind": ..}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Body rejected before reaching the resolver.
    #[error("{0}")]
    BadRequest(&'static str),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The blocking resolution task panicked or was cancelled.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Resolve(e) if e.is_fatal() => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Resolve(e) if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Resolve(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "invalid_observation",
            Self::Resolve(e) => e.error_kind(),
            Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "error": self.to_string(), "kind": self.kind() }));
        (self.status(), body).into_response()
    }
}
