//! Error kinds for the order lifecycle engine and their HTTP mapping.
//!
//! Every error enum here derives `thiserror::Error` rather than hand-rolling
//! `Display`/`std::error::Error`. One sum type, `ApiError`, carries every
//! failure that can occur in the lifecycle engine and maps to exactly one
//! HTTP status at the boundary (§7).

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// The error kinds named in spec §7, in the engine's own vocabulary rather
/// than as raw HTTP statuses — the boundary layer (see `http::error_response`)
/// is the only place that knows about status codes.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ErrorKind {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("gone: {0}")]
    Gone(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("basket already checked out")]
    AlreadyCheckedOut,

    #[error("one-off already sold: chain={chain} seller={seller} sku={sku}")]
    OneOffAlreadySold { chain: u64, seller: String, sku: String },

    #[error("unprocessable: {0}")]
    Unprocessable(String),

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("rate limited")]
    RateLimited,
}

/// The error type threaded through every fallible operation in this crate.
/// `details` is optional structured context surfaced to the client
/// alongside the message (spec §6.1 error payload: `{ error, details? }`).
#[derive(Debug, Clone, thiserror::Error)]
#[error("{kind}")]
pub struct ApiError {
    pub kind: ErrorKind,
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match &self.kind {
            ErrorKind::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ErrorKind::Gone(_) => StatusCode::GONE,
            ErrorKind::Conflict(_) | ErrorKind::AlreadyCheckedOut | ErrorKind::OneOffAlreadySold { .. } => {
                StatusCode::CONFLICT
            },
            ErrorKind::Unprocessable(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ErrorKind::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
            ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

impl From<ErrorKind> for ApiError {
    fn from(kind: ErrorKind) -> Self {
        Self { kind, details: None }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<serde_json::Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(kind = ?self.kind, "upstream/internal failure");
        }
        let body = ErrorBody { error: self.kind.to_string(), details: self.details };
        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(e: sqlx::Error) -> Self {
        ErrorKind::UpstreamFailure(format!("database error: {e}")).into()
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        ErrorKind::UpstreamFailure(format!("outbound request error: {e}")).into()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_spec_table() {
        assert_eq!(ApiError::from(ErrorKind::InvalidInput("x".into())).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::from(ErrorKind::Unauthenticated).status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::from(ErrorKind::NotFound("x".into())).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::from(ErrorKind::Gone("x".into())).status_code(), StatusCode::GONE);
        assert_eq!(ApiError::from(ErrorKind::AlreadyCheckedOut).status_code(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::from(ErrorKind::OneOffAlreadySold { chain: 1, seller: "s".into(), sku: "k".into() })
                .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(ApiError::from(ErrorKind::Unprocessable("x".into())).status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(ApiError::from(ErrorKind::UpstreamFailure("x".into())).status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ApiError::from(ErrorKind::RateLimited).status_code(), StatusCode::TOO_MANY_REQUESTS);
    }
}
