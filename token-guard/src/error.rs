use axum::Json;
use axum::response::{IntoResponse, Response};
use http::header::WWW_AUTHENTICATE;
use http::{HeaderValue, StatusCode};
use log::{debug, error};
use serde_json::json;
use thiserror::Error;

/// Errors produced while validating a bearer token.
///
/// Everything except [`GuardError::KeyFetch`] is an authentication failure and
/// renders as a generic `401`; the variants stay distinct for logging and tests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GuardError {
    #[error("Malformed token")]
    Malformed,
    #[error("Unknown key id")]
    UnknownKeyId,
    #[error("Signature mismatch")]
    InvalidSignature,
    #[error("Token expired")]
    Expired,
    #[error("Invalid token claims: {0}")]
    InvalidClaims(String),
    #[error("Invalid verification key: {0}")]
    InvalidKey(String),
    #[error("Key set fetch failed: {0}")]
    KeyFetch(String),
}

impl GuardError {
    /// Whether the failure comes from infrastructure rather than the token itself
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::KeyFetch(_))
    }
}

impl IntoResponse for GuardError {
    fn into_response(self) -> Response {
        if let Self::KeyFetch(detail) = &self {
            error!("Key set unavailable: {}", detail);
            let body = json!({
                "detail": "Authentication service temporarily unavailable",
            });
            return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
        }

        debug!("Rejected bearer token: {}", self);
        let body = json!({
            "detail": "Invalid or missing credentials",
        });
        let mut response = (StatusCode::UNAUTHORIZED, Json(body)).into_response();
        response.headers_mut().insert(
            WWW_AUTHENTICATE,
            HeaderValue::from_static("Bearer error=\"invalid_token\""),
        );
        response
    }
}
