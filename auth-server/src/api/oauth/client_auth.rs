//! Client authentication at the token, revocation and introspection endpoints
//! (RFC 6749 §2.3.1): HTTP Basic or `client_id`/`client_secret` form fields.

use crate::api::oauth::models::OAuthError;
use crate::clients::RegisteredClient;
use crate::state::AppState;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::{HeaderMap, header};
use log::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: Option<String>,
}

/// Reads the client's credentials from the request. Using Basic and a form
/// secret at the same time is rejected.
pub fn client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    if let Some(value) = headers.get(header::AUTHORIZATION) {
        let basic = value
            .to_str()
            .ok()
            .and_then(parse_basic)
            .ok_or_else(OAuthError::invalid_client)?;

        if form_client_secret.is_some() {
            return Err(OAuthError::invalid_request(
                "Use only one client authentication method",
            ));
        }
        if form_client_id.is_some_and(|id| id != basic.client_id) {
            return Err(OAuthError::invalid_client());
        }
        return Ok(basic);
    }

    match form_client_id.filter(|id| !id.is_empty()) {
        Some(client_id) => Ok(ClientCredentials {
            client_id: client_id.to_string(),
            client_secret: form_client_secret
                .filter(|secret| !secret.is_empty())
                .map(str::to_string),
        }),
        None => Err(OAuthError::invalid_client()),
    }
}

fn parse_basic(value: &str) -> Option<ClientCredentials> {
    let (scheme, encoded) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return None;
    }
    let decoded = STANDARD.decode(encoded.trim()).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (id, secret) = decoded.split_once(':')?;

    // Both halves are form-urlencoded before being joined
    let id = form_decode(id);
    let secret = form_decode(secret);
    if id.is_empty() {
        return None;
    }
    Some(ClientCredentials {
        client_id: id,
        client_secret: (!secret.is_empty()).then_some(secret),
    })
}

fn form_decode(value: &str) -> String {
    url::form_urlencoded::parse(format!("v={value}").as_bytes())
        .next()
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Authenticates the calling client against the registry
pub async fn authenticate_client(
    state: &AppState,
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<RegisteredClient, OAuthError> {
    let credentials = client_credentials(headers, form_client_id, form_client_secret)?;
    state
        .clients
        .authenticate(&credentials.client_id, credentials.client_secret.as_deref())
        .await
        .map_err(|e| {
            debug!("Client '{}' failed to authenticate: {}", credentials.client_id, e);
            OAuthError::invalid_client()
        })
}
