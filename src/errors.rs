//! The three error classes: invalid input, transient backend failure, and
//! invariant violation. HTTP handlers map these to status codes; internal
//! callers match on the variant to decide whether to retry.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Malformed record, out-of-range field, unknown preset, ill-formed
    /// date. Never retried; no state side-effect.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Cache or store unreachable or timed out. Retryable.
    #[error("backend unavailable: {0}")]
    Backend(#[from] anyhow::Error),

    /// An assertion that should never fail in correct operation. Benign
    /// cases (double soft-delete) are handled as idempotent success before
    /// reaching this variant; this is reserved for the fatal case.
    #[error("invariant violation: {0}")]
    Invariant(String),
}

impl ServiceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ServiceError::InvalidInput(msg.into())
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        ServiceError::Invariant(msg.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceError::Backend(_))
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            ServiceError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServiceError::Backend(err) => {
                tracing::warn!("backend error: {:#}", err);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "backend temporarily unavailable".to_string(),
                )
            }
            ServiceError::Invariant(msg) => {
                tracing::error!("invariant violation: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, msg.clone())
            }
        };
        (status, Json(json!({ "success": false, "message": message }))).into_response()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
