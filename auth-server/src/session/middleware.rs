use super::{SessionData, SessionStore};
use crate::pages;
use axum::body::{Body, to_bytes};
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use http::{Method, StatusCode, header};
use log::{debug, warn};
use subtle::ConstantTimeEq;

pub const CSRF_HEADER: &str = "x-csrf-token";
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// Forms posted to the browser endpoints are small
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Decrypts the session cookie and attaches the [`SessionData`] to the request
pub async fn load_session(
    State(store): State<SessionStore>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut session = store.load(request.headers());
    session.ensure_csrf_token();
    request.extensions_mut().insert(session);
    next.run(request).await
}

/// Sends anonymous visitors to the login page, except on public paths
pub async fn require_auth(
    State(store): State<SessionStore>,
    session: SessionData,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path();
    if session.is_authenticated() || store.is_public_path(path) {
        return next.run(request).await;
    }

    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    debug!("Unauthenticated request to {}, redirecting to login", path);
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("return_to", target)
        .finish();
    Redirect::to(&format!("/login?{query}")).into_response()
}

/// Rejects state-changing requests whose CSRF token does not match the session.
///
/// The token is read from the `X-CSRF-Token` header or, for url-encoded forms,
/// from the `csrf_token` field. The form body is buffered and handed on intact.
pub async fn validate_csrf(session: SessionData, request: Request, next: Next) -> Response {
    if !matches!(
        *request.method(),
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    ) {
        return next.run(request).await;
    }

    let Some(expected) = session.csrf_token.clone() else {
        return forbidden();
    };

    if let Some(presented) = request.headers().get(CSRF_HEADER) {
        return if tokens_match(presented.as_bytes(), expected.as_bytes()) {
            next.run(request).await
        } else {
            forbidden()
        };
    }

    if !is_form(&request) {
        return forbidden();
    }

    let (parts, body) = request.into_parts();
    let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to read form body: {e}");
            return pages::error_response(StatusCode::PAYLOAD_TOO_LARGE, "The request was too large.");
        }
    };

    let presented = url::form_urlencoded::parse(&bytes)
        .find(|(name, _)| name == CSRF_FORM_FIELD)
        .map(|(_, value)| value.into_owned());

    match presented {
        Some(token) if tokens_match(token.as_bytes(), expected.as_bytes()) => {
            next.run(Request::from_parts(parts, Body::from(bytes))).await
        }
        _ => forbidden(),
    }
}

fn is_form(request: &Request) -> bool {
    request
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/x-www-form-urlencoded"))
}

fn tokens_match(presented: &[u8], expected: &[u8]) -> bool {
    !expected.is_empty() && bool::from(presented.ct_eq(expected))
}

fn forbidden() -> Response {
    debug!("Rejected request with a missing or invalid CSRF token");
    pages::error_response(
        StatusCode::FORBIDDEN,
        "Your session has expired or the form is out of date. Please go back and try again.",
    )
}
