//! Interactive half of the authorization code flow: request validation,
//! login hand-off, consent and code issuance.

use crate::api::oauth::models::{
    AuthorizationRequest, ConsentForm, OAuthError, PendingAuthorization,
};
use crate::api::oauth::token_manager::CodeGrant;
use crate::clients::RegisteredClient;
use crate::headers::presets;
use crate::openapi::OAUTH_TAG;
use crate::pages;
use crate::pkce::{self, CodeChallengeMethod};
use crate::session::SessionData;
use crate::state::AppState;
use axum::Form;
use axum::extract::rejection::{FormRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use http::{StatusCode, Uri};
use log::{debug, error, info};
use url::Url;

/// How long a validated request may wait for login and consent
const PENDING_MAX_AGE_SECS: i64 = 600;

const DEFAULT_SCOPE: &str = "openid";

fn invalid_target() -> Response {
    pages::error_response(
        StatusCode::BAD_REQUEST,
        "The application sent an invalid sign-in request.",
    )
}

/// Sends the browser back to the client with extra query parameters and the
/// client's `state`
fn redirect_to_client(redirect_uri: &str, params: &[(&str, &str)], state: Option<&str>) -> Response {
    let Ok(mut url) = Url::parse(redirect_uri) else {
        error!("Registered redirect URI '{redirect_uri}' is not a valid URL");
        return invalid_target();
    };
    {
        let mut query = url.query_pairs_mut();
        for (name, value) in params {
            query.append_pair(name, value);
        }
        if let Some(state) = state {
            query.append_pair("state", state);
        }
    }
    Redirect::to(url.as_str()).into_response()
}

fn redirect_with_error(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> Response {
    let description = error.error_description.as_deref().unwrap_or_default();
    redirect_to_client(
        redirect_uri,
        &[("error", error.error.as_str()), ("error_description", description)],
        state,
    )
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|value| !value.is_empty())
}

/// Granted scope in request order, without duplicates
fn resolve_scope(requested: Option<&str>, supported: &[String]) -> Result<String, OAuthError> {
    let requested = requested
        .filter(|scope| !scope.trim().is_empty())
        .unwrap_or(DEFAULT_SCOPE);

    let mut granted: Vec<&str> = Vec::new();
    for scope in requested.split_whitespace() {
        if !supported.iter().any(|s| s == scope) {
            return Err(OAuthError::invalid_scope(&format!("Unsupported scope '{scope}'")));
        }
        if !granted.contains(&scope) {
            granted.push(scope);
        }
    }
    Ok(granted.join(" "))
}

/// Everything except the client and redirect URI, which are checked first
fn validate_request(
    state: &AppState,
    client: &RegisteredClient,
    redirect_uri: &str,
    request: &AuthorizationRequest,
) -> Result<PendingAuthorization, OAuthError> {
    if request.response_type.as_deref() != Some("code") {
        return Err(OAuthError::unsupported_response_type());
    }

    let scope = resolve_scope(
        request.scope.as_deref(),
        &state.settings.oauth.supported_scopes(),
    )?;

    let (code_challenge, code_challenge_method) = match non_empty(&request.code_challenge) {
        Some(challenge) => {
            let method = CodeChallengeMethod::from_request(request.code_challenge_method.as_deref())
                .map_err(|_| OAuthError::invalid_request("Unsupported code_challenge_method"))?;
            if !pkce::is_valid_challenge(challenge) {
                return Err(OAuthError::invalid_request("code_challenge is malformed"));
            }
            (Some(challenge.to_string()), Some(method))
        }
        None if non_empty(&request.code_challenge_method).is_some() => {
            return Err(OAuthError::invalid_request(
                "code_challenge_method was sent without a code_challenge",
            ));
        }
        None if client.require_pkce => {
            return Err(OAuthError::invalid_request("code_challenge is required"));
        }
        None => (None, None),
    };

    Ok(PendingAuthorization {
        client_id: client.client_id.clone(),
        redirect_uri: redirect_uri.to_string(),
        scope,
        state: request.state.clone(),
        code_challenge,
        code_challenge_method,
        nonce: non_empty(&request.nonce).map(str::to_string),
        created_at: chrono::Utc::now().timestamp(),
    })
}

/// Mints a code for an approved request and sends it to the client
async fn approve(state: &AppState, session: &SessionData, pending: PendingAuthorization) -> Response {
    let Some(user_id) = session.user_id.clone() else {
        return Redirect::to("/login").into_response();
    };

    let grant = CodeGrant {
        user_id,
        client_id: pending.client_id.clone(),
        redirect_uri: pending.redirect_uri.clone(),
        scope: pending.scope.clone(),
        code_challenge: pending.code_challenge.clone(),
        code_challenge_method: pending.code_challenge_method,
        nonce: pending.nonce.clone(),
        auth_time: session
            .auth_time
            .unwrap_or_else(|| chrono::Utc::now().timestamp()),
    };

    match state.tokens.issue_code(grant).await {
        Ok(code) => {
            info!("Issued authorization code to client '{}'", pending.client_id);
            redirect_to_client(
                &pending.redirect_uri,
                &[("code", code.as_str())],
                pending.state.as_deref(),
            )
        }
        Err(e) => {
            error!("Failed to issue authorization code: {e}");
            redirect_with_error(
                &pending.redirect_uri,
                &OAuthError::temporarily_unavailable(),
                pending.state.as_deref(),
            )
        }
    }
}

/// OAuth 2.0 authorization endpoint (RFC 6749 §4.1.1, RFC 7636 §4.3)
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    tag = OAUTH_TAG,
    params(AuthorizationRequest),
    responses(
        (status = 303, description = "Redirect to login, or to the client with a code or an error"),
        (status = 200, description = "Consent page", content_type = "text/html"),
        (status = 400, description = "Unknown client or unregistered redirect URI", content_type = "text/html")
    )
)]
pub async fn authorize(
    State(state): State<AppState>,
    mut session: SessionData,
    uri: Uri,
    query: Result<Query<AuthorizationRequest>, QueryRejection>,
) -> Response {
    let Ok(Query(request)) = query else {
        debug!("Unparseable authorization request");
        return invalid_target();
    };

    // Until the client and redirect URI check out, errors are never sent to the redirect URI
    let (Some(client_id), Some(redirect_uri)) =
        (non_empty(&request.client_id), non_empty(&request.redirect_uri))
    else {
        return invalid_target();
    };
    let Ok(client) = state
        .clients
        .resolve_authorization(client_id, redirect_uri)
        .await
    else {
        return invalid_target();
    };

    let pending = match validate_request(&state, &client, redirect_uri, &request) {
        Ok(pending) => pending,
        Err(e) => {
            debug!("Authorization request from '{}' rejected: {}", client_id, e.error);
            return redirect_with_error(redirect_uri, &e, request.state.as_deref());
        }
    };

    if !session.is_authenticated() {
        session.pending_authorization = Some(pending);
        session.return_to = uri.path_and_query().map(|pq| pq.as_str().to_string());
        return (state.sessions.save(&session), Redirect::to("/login")).into_response();
    }

    if client.is_system {
        debug!("First-party client '{}' skips consent", client.client_id);
        session.pending_authorization = None;
        let response = approve(&state, &session, pending).await;
        return (state.sessions.save(&session), response).into_response();
    }

    let scopes: Vec<String> = pending.scope.split_whitespace().map(str::to_string).collect();
    session.pending_authorization = Some(pending);
    let csrf = session.ensure_csrf_token();
    let scope_refs: Vec<&str> = scopes.iter().map(String::as_str).collect();
    let page = pages::consent_page(&csrf, client.display_name(), &client.client_id, &scope_refs);
    (state.sessions.save(&session), presets::no_store(), page).into_response()
}

/// Consent decision
#[utoipa::path(
    post,
    path = "/oauth/authorize",
    tag = OAUTH_TAG,
    request_body(content = ConsentForm, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 303, description = "Redirect to the client with a code or access_denied"),
        (status = 400, description = "No matching authorization request", content_type = "text/html"),
        (status = 403, description = "Missing or invalid CSRF token", content_type = "text/html")
    )
)]
pub async fn decide(
    State(state): State<AppState>,
    mut session: SessionData,
    form: Result<Form<ConsentForm>, FormRejection>,
) -> Response {
    if !session.is_authenticated() {
        return Redirect::to("/login").into_response();
    }
    let Ok(Form(form)) = form else {
        return pages::error_response(StatusCode::BAD_REQUEST, "The consent form was incomplete.");
    };

    let Some(pending) = session.pending_authorization.take() else {
        return pages::error_response(
            StatusCode::BAD_REQUEST,
            "There is no sign-in request waiting for your approval.",
        );
    };
    let jar = state.sessions.save(&session);

    if pending.client_id != form.client_id {
        debug!("Consent posted for '{}' but pending request is for '{}'", form.client_id, pending.client_id);
        return (jar, invalid_target()).into_response();
    }
    if chrono::Utc::now().timestamp() - pending.created_at > PENDING_MAX_AGE_SECS {
        return (
            jar,
            pages::error_response(
                StatusCode::BAD_REQUEST,
                "This sign-in request has expired. Please start again from the application.",
            ),
        )
            .into_response();
    }
    if state
        .clients
        .resolve_authorization(&pending.client_id, &pending.redirect_uri)
        .await
        .is_err()
    {
        return (jar, invalid_target()).into_response();
    }

    let response = match form.decision.as_str() {
        "approve" => approve(&state, &session, pending).await,
        "deny" => {
            info!("User denied access to client '{}'", pending.client_id);
            redirect_with_error(
                &pending.redirect_uri,
                &OAuthError::access_denied("The user denied the request"),
                pending.state.as_deref(),
            )
        }
        _ => pages::error_response(StatusCode::BAD_REQUEST, "Unknown consent decision."),
    };
    (jar, response).into_response()
}
