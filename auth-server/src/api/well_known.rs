//! Discovery documents: the public key set and OpenID provider metadata

use crate::headers::presets;
use crate::openapi::WELL_KNOWN_TAG;
use crate::state::AppState;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// OpenID Connect discovery metadata
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ProviderMetadata {
    pub issuer: String,
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub userinfo_endpoint: String,
    pub jwks_uri: String,
    pub revocation_endpoint: String,
    pub introspection_endpoint: String,
    pub response_types_supported: Vec<String>,
    pub grant_types_supported: Vec<String>,
    pub code_challenge_methods_supported: Vec<String>,
    pub token_endpoint_auth_methods_supported: Vec<String>,
    pub id_token_signing_alg_values_supported: Vec<String>,
    pub scopes_supported: Vec<String>,
    pub subject_types_supported: Vec<String>,
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

/// Signing keys as a JWK set. Retired keys stay listed until the tokens they
/// signed have expired.
#[utoipa::path(
    get,
    path = "/.well-known/jwks.json",
    tag = WELL_KNOWN_TAG,
    responses(
        (status = 200, description = "Published verification keys")
    )
)]
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        presets::public_cache(state.settings.keys.jwks_cache_ttl),
        Json(state.keys.jwks()),
    )
}

#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    tag = WELL_KNOWN_TAG,
    responses(
        (status = 200, description = "Provider metadata", body = ProviderMetadata)
    )
)]
pub async fn openid_configuration(State(state): State<AppState>) -> Json<ProviderMetadata> {
    let server = &state.settings.server;
    Json(ProviderMetadata {
        issuer: server.issuer.clone(),
        authorization_endpoint: server.url_for("/oauth/authorize"),
        token_endpoint: server.url_for("/oauth/token"),
        userinfo_endpoint: server.url_for("/oauth/userinfo"),
        jwks_uri: server.url_for("/.well-known/jwks.json"),
        revocation_endpoint: server.url_for("/oauth/revoke"),
        introspection_endpoint: server.url_for("/oauth/introspect"),
        response_types_supported: strings(&["code"]),
        grant_types_supported: strings(&["authorization_code", "refresh_token"]),
        code_challenge_methods_supported: strings(&["S256", "plain"]),
        token_endpoint_auth_methods_supported: strings(&[
            "client_secret_basic",
            "client_secret_post",
            "none",
        ]),
        id_token_signing_alg_values_supported: strings(&["RS256"]),
        scopes_supported: state.settings.oauth.supported_scopes(),
        subject_types_supported: strings(&["public"]),
    })
}

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/.well-known/jwks.json", get(jwks))
        .route("/.well-known/openid-configuration", get(openid_configuration))
}
