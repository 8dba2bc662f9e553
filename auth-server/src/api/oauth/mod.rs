//! OAuth 2.0 authorization server endpoints.
//!
//! - Authorization code grant with PKCE (RFC 6749 §4.1, RFC 7636)
//! - Refresh token grant with rotation (RFC 6749 §6)
//! - Token revocation (RFC 7009) and introspection (RFC 7662)
//! - OpenID Connect userinfo
//!
//! The authorization endpoint is browser-facing and sits behind the session
//! middleware; everything else authenticates the client or bearer token itself.

pub mod authorize;
pub mod client_auth;
pub mod handlers;
pub mod models;
pub mod token_manager;

use crate::state::AppState;
use axum::Router;
use axum::routing::{get, post};

/// Routes that need the browser session
pub fn browser_router() -> Router<AppState> {
    Router::new().route(
        "/oauth/authorize",
        get(authorize::authorize).post(authorize::decide),
    )
}

/// Routes called by clients and resource servers
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth/token", post(handlers::token))
        .route("/oauth/introspect", post(handlers::introspect))
        .route("/oauth/revoke", post(handlers::revoke))
        .route(
            "/oauth/userinfo",
            get(handlers::userinfo).post(handlers::userinfo),
        )
}
