//! Gateway error taxonomy, mapped to HTTP responses.
//!
//! Everything recoverable is absorbed below this layer; what reaches the
//! HTTP boundary becomes a status code plus a short `detail` string.
//! Internal paths and upstream addresses are never echoed to callers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::dispatch::DispatchError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("no suitable node is available")]
    NoAvailableNode,

    #[error("upstream node failed before responding")]
    UpstreamUnavailable,

    #[error("{0}")]
    BadDataset(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("job not found")]
    JobNotFound,

    #[error("internal error")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NoAvailableNode => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::UpstreamUnavailable => StatusCode::BAD_GATEWAY,
            ApiError::BadDataset(_) | ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::JobNotFound => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "detail": self.to_string() }));
        (self.status(), body).into_response()
    }
}

impl From<DispatchError> for ApiError {
    fn from(err: DispatchError) -> Self {
        match err {
            DispatchError::NoNodeAvailable => ApiError::NoAvailableNode,
            DispatchError::Upstream(detail) => {
                tracing::warn!(error = %detail, "dispatch exhausted all upstream attempts");
                ApiError::UpstreamUnavailable
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, ApiError>;
