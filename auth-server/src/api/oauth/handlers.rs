//! Machine-facing OAuth 2.0 endpoints: token, introspection, revocation and
//! userinfo. None of them use the browser session.

use crate::api::oauth::client_auth::authenticate_client;
use crate::api::oauth::models::{
    IntrospectionResponse, OAuthError, TokenHintRequest, TokenRequest, TokenResponse,
    UserInfoResponse,
};
use crate::api::oauth::token_manager::TokenError;
use crate::clients::RegisteredClient;
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::state::AppState;
use crate::users::UserProfile;
use axum::extract::rejection::FormRejection;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::{Form, Json};
use http::{HeaderMap, StatusCode};
use log::{debug, error, info};
use token_guard::{AccessTokenClaims, GuardError, IdTokenClaims, extract_bearer};
use uuid::Uuid;

fn token_error(err: TokenError) -> OAuthError {
    match err {
        TokenError::Store(e) => {
            error!("Token store failure: {e}");
            OAuthError::temporarily_unavailable()
        }
        TokenError::RedirectUriMismatch => {
            OAuthError::invalid_grant("redirect_uri does not match the authorization request")
        }
        TokenError::Pkce(reason) => {
            debug!("PKCE check failed: {reason}");
            OAuthError::invalid_grant("PKCE verification failed")
        }
        TokenError::RefreshTokenNotFound => {
            OAuthError::invalid_grant("Refresh token is invalid or expired")
        }
        err @ (TokenError::CodeNotFound | TokenError::CodeReplayed | TokenError::ClientMismatch) => {
            debug!("Authorization code rejected: {err}");
            OAuthError::invalid_grant("Authorization code is invalid or expired")
        }
    }
}

fn malformed(rejection: FormRejection) -> OAuthError {
    debug!("Rejected malformed form body: {rejection}");
    OAuthError::invalid_request("The request body is malformed or missing required parameters")
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .as_deref()
        .filter(|value| !value.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(&format!("{name} is required")))
}

/// Compact JWS: three dot-separated parts
fn looks_like_jwt(token: &str) -> bool {
    token.split('.').count() == 3
}

fn has_scope(scope: &str, wanted: &str) -> bool {
    scope.split_whitespace().any(|s| s == wanted)
}

/// A refresh may ask for fewer scopes than were granted, never more
fn narrow_scope(granted: &str, requested: Option<&str>) -> Result<String, OAuthError> {
    let Some(requested) = requested.filter(|scope| !scope.trim().is_empty()) else {
        return Ok(granted.to_string());
    };

    let mut narrowed: Vec<&str> = Vec::new();
    for scope in requested.split_whitespace() {
        if !has_scope(granted, scope) {
            return Err(OAuthError::invalid_scope(
                "Requested scope exceeds the original grant",
            ));
        }
        if !narrowed.contains(&scope) {
            narrowed.push(scope);
        }
    }
    Ok(narrowed.join(" "))
}

async fn load_user(state: &AppState, user_id: &str) -> Result<UserProfile, OAuthError> {
    match state.users.find_by_id(user_id).await {
        Ok(Some(user)) => Ok(user),
        Ok(None) => {
            info!("User '{user_id}' no longer exists, refusing to issue tokens");
            Err(OAuthError::invalid_grant("The user account is no longer available"))
        }
        Err(e) => {
            error!("User directory failure: {e}");
            Err(OAuthError::temporarily_unavailable())
        }
    }
}

struct Issuance<'a> {
    user: &'a UserProfile,
    client_id: &'a str,
    scope: &'a str,
    auth_time: i64,
    nonce: Option<&'a str>,
    /// Refresh token the access token is revoked through
    refresh_token_id: &'a str,
    refresh_token: Option<String>,
}

/// Signs the access token (and ID token for `openid`) with a fresh snapshot of
/// the user's permissions and memberships
async fn mint_tokens(state: &AppState, issuance: Issuance<'_>) -> Result<TokenResponse, OAuthError> {
    let now = chrono::Utc::now().timestamp();
    let ttl = state.settings.oauth.access_token_ttl;
    let expires_at = now + i64::try_from(ttl).unwrap_or(i64::MAX / 2);
    let issuer = state.settings.server.issuer.clone();
    let user = issuance.user;

    let claims = AccessTokenClaims {
        iss: issuer.clone(),
        sub: user.subject().to_string(),
        aud: issuance.client_id.to_string(),
        exp: expires_at,
        iat: now,
        nbf: now,
        jti: Uuid::new_v4().to_string(),
        scope: issuance.scope.to_string(),
        email: user.email.clone(),
        name: user.name.clone(),
        email_verified: user.email_verified,
        perms: user.permissions.clone(),
        memberships: user.memberships.clone(),
    };
    let access_token = state.keys.sign(&claims).map_err(|e| {
        error!("Failed to sign access token: {e}");
        OAuthError::server_error()
    })?;
    state
        .tokens
        .link_access_token(&claims.jti, issuance.refresh_token_id)
        .await
        .map_err(token_error)?;

    let id_token = if has_scope(issuance.scope, "openid") {
        let with_email = has_scope(issuance.scope, "email");
        let id_claims = IdTokenClaims {
            iss: issuer,
            sub: claims.sub.clone(),
            aud: claims.aud.clone(),
            exp: expires_at,
            iat: now,
            auth_time: issuance.auth_time,
            nonce: issuance.nonce.map(str::to_string),
            email: with_email.then(|| user.email.clone()),
            email_verified: with_email.then_some(user.email_verified),
            name: has_scope(issuance.scope, "profile").then(|| user.name.clone()),
        };
        Some(state.keys.sign(&id_claims).map_err(|e| {
            error!("Failed to sign ID token: {e}");
            OAuthError::server_error()
        })?)
    } else {
        None
    };

    Ok(TokenResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: ttl,
        refresh_token: issuance.refresh_token,
        scope: issuance.scope.to_string(),
        id_token,
    })
}

async fn exchange_code(
    state: &AppState,
    client: &RegisteredClient,
    request: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let code = required(&request.code, "code")?;
    let redirect_uri = required(&request.redirect_uri, "redirect_uri")?;

    let redeemed = state
        .tokens
        .redeem_code(
            code,
            &client.client_id,
            redirect_uri,
            request.code_verifier.as_deref(),
        )
        .await
        .map_err(token_error)?;
    let grant = &redeemed.grant;
    let user = load_user(state, &grant.user_id).await?;

    let refresh = state
        .tokens
        .issue_refresh_token(&grant.user_id, &client.client_id, &grant.scope, grant.auth_time)
        .await
        .map_err(token_error)?;
    state
        .tokens
        .link_refresh_to_code(&redeemed.code_id, &refresh.id)
        .await
        .map_err(token_error)?;

    info!("Exchanged authorization code for client '{}'", client.client_id);
    mint_tokens(
        state,
        Issuance {
            user: &user,
            client_id: &client.client_id,
            scope: &grant.scope,
            auth_time: grant.auth_time,
            nonce: grant.nonce.as_deref(),
            refresh_token_id: &refresh.id,
            refresh_token: Some(refresh.token),
        },
    )
    .await
}

async fn refresh(
    state: &AppState,
    client: &RegisteredClient,
    request: &TokenRequest,
) -> Result<TokenResponse, OAuthError> {
    let token = required(&request.refresh_token, "refresh_token")?;

    // Scope is checked before the token is rotated so a bad request does not burn it
    let current = state
        .tokens
        .find_refresh_token(token)
        .await
        .map_err(token_error)?
        .ok_or_else(|| token_error(TokenError::RefreshTokenNotFound))?;
    let scope = narrow_scope(&current.scope, request.scope.as_deref())?;

    let outcome = state
        .tokens
        .rotate_refresh_token(token, &client.client_id)
        .await
        .map_err(token_error)?;
    let user = load_user(state, &outcome.record.user_id).await?;

    let (refresh_token_id, refresh_token) = match outcome.rotated {
        Some(rotated) => (rotated.id, Some(rotated.token)),
        None => (outcome.presented_id, None),
    };

    debug!("Refreshed tokens for client '{}'", client.client_id);
    mint_tokens(
        state,
        Issuance {
            user: &user,
            client_id: &client.client_id,
            scope: &scope,
            auth_time: outcome.record.auth_time,
            nonce: None,
            refresh_token_id: &refresh_token_id,
            refresh_token,
        },
    )
    .await
}

/// OAuth 2.0 token endpoint (RFC 6749 §4.1.3 and §6)
#[utoipa::path(
    post,
    path = "/oauth/token",
    tag = OAUTH_TAG,
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "Invalid request or grant", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 503, description = "Storage unavailable", body = OAuthError)
    )
)]
pub async fn token(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenRequest>, FormRejection>,
) -> Result<impl IntoResponse, OAuthError> {
    let Form(request) = form.map_err(malformed)?;
    let client = authenticate_client(
        &state,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    let response = match request.grant_type.as_str() {
        "authorization_code" => exchange_code(&state, &client, &request).await?,
        "refresh_token" => refresh(&state, &client, &request).await?,
        other => {
            debug!("Unsupported grant type '{other}' from client '{}'", client.client_id);
            return Err(OAuthError::unsupported_grant_type());
        }
    };
    Ok((presets::no_store(), Json(response)))
}

async fn introspect_token(
    state: &AppState,
    client: &RegisteredClient,
    token: &str,
) -> Result<IntrospectionResponse, OAuthError> {
    if looks_like_jwt(token) {
        return match state.guard.verifier().verify(token).await {
            Ok(claims) => Ok(IntrospectionResponse {
                active: true,
                scope: Some(claims.scope),
                client_id: Some(claims.aud.clone()),
                sub: Some(claims.sub),
                token_type: Some("Bearer".to_string()),
                exp: Some(claims.exp),
                iat: Some(claims.iat),
                iss: Some(claims.iss),
                aud: Some(claims.aud),
                jti: Some(claims.jti),
            }),
            Err(e) if e.is_transient() => {
                error!("Cannot introspect, key set unavailable: {e}");
                Err(OAuthError::temporarily_unavailable())
            }
            Err(e) => {
                debug!("Introspected token is not active: {e}");
                Ok(IntrospectionResponse::inactive())
            }
        };
    }

    let Some(record) = state
        .tokens
        .find_refresh_token(token)
        .await
        .map_err(token_error)?
    else {
        return Ok(IntrospectionResponse::inactive());
    };
    if record.client_id != client.client_id {
        debug!("Client '{}' introspected another client's refresh token", client.client_id);
        return Ok(IntrospectionResponse::inactive());
    }
    let subject = match state.users.find_by_id(&record.user_id).await {
        Ok(Some(user)) => user.subject().to_string(),
        Ok(None) => return Ok(IntrospectionResponse::inactive()),
        Err(e) => {
            error!("User directory failure: {e}");
            return Err(OAuthError::temporarily_unavailable());
        }
    };

    Ok(IntrospectionResponse {
        active: true,
        scope: Some(record.scope),
        client_id: Some(record.client_id),
        sub: Some(subject),
        token_type: Some("refresh_token".to_string()),
        exp: Some(record.expires_at),
        iat: Some(record.issued_at),
        iss: Some(state.settings.server.issuer.clone()),
        aud: None,
        jti: None,
    })
}

/// Token introspection (RFC 7662). Only confidential clients may introspect.
#[utoipa::path(
    post,
    path = "/oauth/introspect",
    tag = OAUTH_TAG,
    request_body(content = TokenHintRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token state", body = IntrospectionResponse),
        (status = 400, description = "Invalid request", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError)
    )
)]
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenHintRequest>, FormRejection>,
) -> Result<impl IntoResponse, OAuthError> {
    let Form(request) = form.map_err(malformed)?;
    let client = authenticate_client(
        &state,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;
    if !client.is_confidential() {
        return Err(OAuthError::unauthorized_client(
            "Introspection requires a confidential client",
        ));
    }

    let response = introspect_token(&state, &client, &request.token).await?;
    Ok((presets::no_store(), Json(response)))
}

async fn revoke_token(
    state: &AppState,
    client: &RegisteredClient,
    token: &str,
) -> Result<(), OAuthError> {
    if looks_like_jwt(token) {
        match state.guard.verifier().verify_allowing_expired(token).await {
            Ok(claims) if claims.aud == client.client_id => {
                if state
                    .tokens
                    .revoke_by_access_jti(&claims.jti)
                    .await
                    .map_err(token_error)?
                {
                    info!("Revoked the refresh token behind an access token for client '{}'", client.client_id);
                }
            }
            Ok(_) => debug!("Client '{}' tried to revoke another client's token", client.client_id),
            Err(e) if e.is_transient() => {
                error!("Cannot revoke, key set unavailable: {e}");
                return Err(OAuthError::temporarily_unavailable());
            }
            Err(e) => debug!("Ignoring revocation of an unverifiable token: {e}"),
        }
        return Ok(());
    }

    match state
        .tokens
        .find_refresh_token(token)
        .await
        .map_err(token_error)?
    {
        Some(record) if record.client_id == client.client_id => {
            state
                .tokens
                .revoke_refresh_token(token)
                .await
                .map_err(token_error)?;
            info!("Revoked refresh token for client '{}'", client.client_id);
        }
        Some(_) => debug!("Client '{}' tried to revoke another client's token", client.client_id),
        None => debug!("Ignoring revocation of an unknown token"),
    }
    Ok(())
}

/// Token revocation (RFC 7009). Answers 200 whether or not the token was known.
///
/// Revoking an access token revokes the refresh token it was issued with; the
/// access token itself stays valid until it expires.
#[utoipa::path(
    post,
    path = "/oauth/revoke",
    tag = OAUTH_TAG,
    request_body(content = TokenHintRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token revoked or unknown"),
        (status = 400, description = "Invalid request", body = OAuthError),
        (status = 401, description = "Client authentication failed", body = OAuthError),
        (status = 503, description = "Storage unavailable", body = OAuthError)
    )
)]
pub async fn revoke(
    State(state): State<AppState>,
    headers: HeaderMap,
    form: Result<Form<TokenHintRequest>, FormRejection>,
) -> Result<impl IntoResponse, OAuthError> {
    let Form(request) = form.map_err(malformed)?;
    let client = authenticate_client(
        &state,
        &headers,
        request.client_id.as_deref(),
        request.client_secret.as_deref(),
    )
    .await?;

    revoke_token(&state, &client, &request.token).await?;
    Ok((presets::no_store(), StatusCode::OK))
}

fn userinfo_for(claims: &AccessTokenClaims) -> UserInfoResponse {
    let mut info = UserInfoResponse {
        sub: claims.sub.clone(),
        ..Default::default()
    };
    if claims.has_scope("email") {
        info.email = Some(claims.email.clone());
        info.email_verified = Some(claims.email_verified);
    }
    if claims.has_scope("profile") {
        info.name = Some(claims.name.clone());
    }
    if claims.has_scope("permissions") {
        info.perms = Some(claims.perms.clone());
        info.memberships = Some(claims.memberships.clone());
    }
    info
}

/// OpenID Connect userinfo. Claims are limited to what the token's scope covers.
#[utoipa::path(
    get,
    path = "/oauth/userinfo",
    tag = OAUTH_TAG,
    responses(
        (status = 200, description = "Claims about the token's subject", body = UserInfoResponse),
        (status = 401, description = "Missing or invalid bearer token")
    ),
    security(("bearer" = []))
)]
pub async fn userinfo(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, GuardError> {
    let token = extract_bearer(&headers)?.ok_or(GuardError::Malformed)?;
    let claims = state.guard.verifier().verify(&token).await?;
    Ok((presets::no_store(), Json(userinfo_for(&claims))))
}
