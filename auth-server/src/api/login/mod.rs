//! Browser login: email one-time passwords and federated providers.
//! Both paths end in the same place, an authenticated session cookie.

pub(crate) mod federated;
mod handlers;
pub(crate) mod otp;

pub use federated::ProviderRegistry;
pub use otp::{LoggingOtpSender, OtpManager};

use crate::pages;
use crate::state::AppState;
use crate::store::StoreError;
use crate::users::UserError;
use axum::Router;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use http::StatusCode;
use log::{error, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoginError {
    #[error("Invalid or expired code")]
    InvalidCode,
    #[error("Too many codes requested")]
    TooManyCodes,
    #[error("Login state mismatch")]
    StateMismatch,
    #[error("Unknown login provider")]
    UnknownProvider,
    #[error("Login provider error: {0}")]
    Provider(String),
    #[error("Provider did not verify the email address")]
    UnverifiedEmail,
    #[error("No account for this identity")]
    UnknownUser,
    #[error("Code delivery failed: {0}")]
    Delivery(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Users(#[from] UserError),
    #[error("Invalid login configuration: {0}")]
    Config(String),
}

impl IntoResponse for LoginError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            Self::InvalidCode => (StatusCode::BAD_REQUEST, "That code is invalid or has expired."),
            Self::TooManyCodes => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many codes were requested. Please wait a while before trying again.",
            ),
            Self::StateMismatch => (
                StatusCode::BAD_REQUEST,
                "The sign-in attempt could not be verified. Please start again.",
            ),
            Self::UnknownProvider => (StatusCode::NOT_FOUND, "Unknown sign-in method."),
            Self::UnverifiedEmail | Self::UnknownUser => (
                StatusCode::FORBIDDEN,
                "No account is associated with this sign-in.",
            ),
            Self::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "The sign-in provider could not complete the request.",
            ),
            Self::Delivery(_) | Self::Store(_) | Self::Users(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "Sign-in is temporarily unavailable. Please try again.",
            ),
            Self::Config(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Sign-in is misconfigured.",
            ),
        };
        if status.is_server_error() {
            error!("Login failed: {self}");
        } else {
            warn!("Login rejected: {self}");
        }
        pages::error_response(status, message)
    }
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::landing))
        .route("/login", get(handlers::login_form))
        .route("/login/email", post(handlers::request_code))
        .route("/login/verify", post(handlers::verify_code))
        .route("/login/{provider}", get(handlers::start_federated))
        .route("/auth/callback", get(handlers::federated_callback))
        .route("/logout", post(handlers::logout))
}
