//! OAuth 2.0 request, response and storage models

use crate::headers::presets;
use crate::pkce::CodeChallengeMethod;
use axum::Json;
use axum::response::{IntoResponse, Response};
use http::{HeaderValue, StatusCode, header};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use utoipa::{IntoParams, ToSchema};

/// Authorization request (RFC 6749 §4.1.1, RFC 7636 §4.3).
/// Every field is optional so a malformed request can still be answered properly.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuthorizationRequest {
    /// Must be "code"
    pub response_type: Option<String>,
    pub client_id: Option<String>,
    /// Must exactly match a registered redirect URI
    pub redirect_uri: Option<String>,
    /// Space-separated scopes
    pub scope: Option<String>,
    /// Opaque client value echoed back on the redirect
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    /// "S256" or "plain"; defaults to "plain" when a challenge is sent without it
    pub code_challenge_method: Option<String>,
    /// OpenID Connect nonce, copied into the ID token
    pub nonce: Option<String>,
}

/// A validated authorization request waiting for login or consent
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingAuthorization {
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<CodeChallengeMethod>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub created_at: i64,
}

/// Consent decision posted from the consent page
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentForm {
    /// "approve" or "deny"
    pub decision: String,
    pub client_id: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    /// "authorization_code" or "refresh_token"
    pub grant_type: String,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    /// On refresh, a subset of the originally granted scopes
    pub scope: Option<String>,
    /// Form-based client authentication; HTTP Basic is also accepted
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    /// Always "Bearer"
    pub token_type: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    /// Present when the "openid" scope was granted
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Body of the revocation (RFC 7009) and introspection (RFC 7662) endpoints
#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct TokenHintRequest {
    pub token: String,
    /// "access_token" or "refresh_token"
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

/// Claims returned by the userinfo endpoint, filtered by granted scope
#[derive(Debug, Default, Serialize, Deserialize, ToSchema)]
pub struct UserInfoResponse {
    pub sub: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub perms: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memberships: Option<HashMap<String, String>>,
}

/// OAuth 2.0 error response (RFC 6749 §5.2)
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OAuthError {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_description: Option<String>,
    #[serde(skip, default = "default_status")]
    pub status: StatusCode,
}

fn default_status() -> StatusCode {
    StatusCode::BAD_REQUEST
}

impl OAuthError {
    fn new(error: &str, description: &str, status: StatusCode) -> Self {
        Self {
            error: error.to_string(),
            error_description: Some(description.to_string()),
            status,
        }
    }

    pub fn invalid_request(description: &str) -> Self {
        Self::new("invalid_request", description, StatusCode::BAD_REQUEST)
    }

    pub fn invalid_client() -> Self {
        Self::new(
            "invalid_client",
            "Client authentication failed",
            StatusCode::UNAUTHORIZED,
        )
    }

    pub fn invalid_grant(description: &str) -> Self {
        Self::new("invalid_grant", description, StatusCode::BAD_REQUEST)
    }

    pub fn unauthorized_client(description: &str) -> Self {
        Self::new("unauthorized_client", description, StatusCode::BAD_REQUEST)
    }

    pub fn unsupported_grant_type() -> Self {
        Self::new(
            "unsupported_grant_type",
            "Supported grant types: authorization_code, refresh_token",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn unsupported_response_type() -> Self {
        Self::new(
            "unsupported_response_type",
            "Only the 'code' response type is supported",
            StatusCode::BAD_REQUEST,
        )
    }

    pub fn invalid_scope(description: &str) -> Self {
        Self::new("invalid_scope", description, StatusCode::BAD_REQUEST)
    }

    pub fn access_denied(description: &str) -> Self {
        Self::new("access_denied", description, StatusCode::FORBIDDEN)
    }

    pub fn server_error() -> Self {
        Self::new(
            "server_error",
            "The server encountered an unexpected condition",
            StatusCode::INTERNAL_SERVER_ERROR,
        )
    }

    pub fn temporarily_unavailable() -> Self {
        Self::new(
            "temporarily_unavailable",
            "The server is temporarily unable to handle the request",
            StatusCode::SERVICE_UNAVAILABLE,
        )
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let status = self.status;
        let mut response = (status, presets::no_store(), Json(self)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"oauth\""),
            );
        }
        response
    }
}

/// Authorization code record, stored under a hash of the code
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredAuthorizationCode {
    pub user_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    /// When the user signed in, for the ID token
    pub auth_time: i64,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// Left behind when a code is redeemed so a replay can be recognised
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumedCode {
    pub client_id: String,
    #[serde(default)]
    pub replayed: bool,
}

/// Refresh token record, stored under a hash of the token
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredRefreshToken {
    pub user_id: String,
    pub client_id: String,
    pub scope: String,
    pub auth_time: i64,
    pub issued_at: i64,
    /// Absolute; rotation does not extend it
    pub expires_at: i64,
    /// Id of the code the chain of rotations started from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub family_id: Option<String>,
}
