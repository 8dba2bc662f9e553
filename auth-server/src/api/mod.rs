pub(crate) mod admin;
pub(crate) mod health;
pub(crate) mod login;
pub(crate) mod oauth;
pub(crate) mod well_known;

use crate::session::{load_session, require_auth, validate_csrf};
use crate::state::AppState;
use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};

/// Combines all API routes into a single router
pub(super) fn router(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(well_known::router())
        .merge(oauth::router())
        .merge(admin::router(state))
        .merge(browser_routes(state))
}

/// Pages that run on the encrypted session cookie.
///
/// Layers run bottom-up: the session is loaded first, anonymous visitors are
/// sent to login, then state-changing requests must carry the CSRF token.
fn browser_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .merge(login::router())
        .merge(oauth::browser_router())
        .layer(from_fn(validate_csrf))
        .layer(from_fn_with_state(state.sessions.clone(), require_auth))
        .layer(from_fn_with_state(state.sessions.clone(), load_session))
}
