use super::LoginError;
use crate::pages;
use crate::pkce::{self, CodeChallengeMethod};
use crate::session::{SessionData, generate_token, is_safe_return_to};
use crate::state::AppState;
use crate::users::normalize_email;
use axum::Form;
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use http::StatusCode;
use log::{debug, info};
use serde::Deserialize;
use subtle::ConstantTimeEq;

#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// Local path to continue to once signed in
    pub return_to: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EmailForm {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct CodeForm {
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

fn callback_uri(state: &AppState) -> String {
    state.settings.server.url_for("/auth/callback")
}

/// Finishes a successful login: the session is marked signed in and the
/// browser goes on to wherever it was headed.
fn signed_in(state: &AppState, mut session: SessionData, user_id: &str) -> Response {
    session.authenticate(user_id);
    let target = session.take_return_to();
    (state.sessions.save(&session), Redirect::to(&target)).into_response()
}

pub async fn login_form(
    State(state): State<AppState>,
    mut session: SessionData,
    Query(query): Query<LoginQuery>,
) -> Response {
    if let Some(target) = query.return_to.filter(|target| is_safe_return_to(target)) {
        session.return_to = Some(target);
    }

    if session.is_authenticated() {
        let target = session.take_return_to();
        return (state.sessions.save(&session), Redirect::to(&target)).into_response();
    }

    let csrf = session.ensure_csrf_token();
    let page = pages::login_page(&csrf, &state.providers.links(), None);
    (state.sessions.save(&session), page).into_response()
}

/// Sends a one-time password when the address belongs to an account. The
/// response is the same either way.
pub async fn request_code(
    State(state): State<AppState>,
    mut session: SessionData,
    Form(form): Form<EmailForm>,
) -> Response {
    let email = normalize_email(&form.email);
    if email.is_empty() || !email.contains('@') {
        let csrf = session.ensure_csrf_token();
        let page = pages::login_page(
            &csrf,
            &state.providers.links(),
            Some("Enter a valid email address."),
        );
        return (StatusCode::BAD_REQUEST, state.sessions.save(&session), page).into_response();
    }

    let user = match state.users.find_by_email(&email).await {
        Ok(user) => user,
        Err(e) => return LoginError::from(e).into_response(),
    };
    if user.is_none() {
        debug!("No account for the submitted email, no code sent");
    }
    if let Err(e) = state.otps.issue(&email, user.as_ref().map(|u| u.id.as_str())).await {
        return e.into_response();
    }

    session.login_email = Some(email.clone());
    let csrf = session.ensure_csrf_token();
    let page = pages::otp_page(&csrf, &email, None);
    (state.sessions.save(&session), page).into_response()
}

pub async fn verify_code(
    State(state): State<AppState>,
    mut session: SessionData,
    Form(form): Form<CodeForm>,
) -> Response {
    let Some(email) = session.login_email.clone() else {
        return Redirect::to("/login").into_response();
    };

    match state.otps.verify(&email, &form.code).await {
        Ok(user_id) => {
            info!("User '{user_id}' signed in with a one-time password");
            signed_in(&state, session, &user_id)
        }
        Err(LoginError::InvalidCode) => {
            let csrf = session.ensure_csrf_token();
            let page = pages::otp_page(&csrf, &email, Some("That code is invalid or has expired."));
            (StatusCode::BAD_REQUEST, state.sessions.save(&session), page).into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn start_federated(
    State(state): State<AppState>,
    mut session: SessionData,
    Path(provider_name): Path<String>,
) -> Response {
    let Some(provider) = state.providers.get(&provider_name) else {
        return LoginError::UnknownProvider.into_response();
    };

    let oauth_state = generate_token();
    let verifier = pkce::generate_code_verifier();
    let challenge = pkce::challenge_from_verifier(&verifier, CodeChallengeMethod::S256);

    session.oauth_state = Some(oauth_state.clone());
    session.oauth_provider = Some(provider_name);
    session.oauth_verifier = Some(verifier);

    let target = provider.authorize_url(&callback_uri(&state), &oauth_state, &challenge);
    (state.sessions.save(&session), Redirect::to(&target)).into_response()
}

/// Return leg of a federated login. The outbound `state` is consumed whether
/// or not the callback succeeds.
pub async fn federated_callback(
    State(state): State<AppState>,
    mut session: SessionData,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let expected_state = session.oauth_state.take();
    let provider_name = session.oauth_provider.take();
    let verifier = session.oauth_verifier.take();

    match complete_federated(&state, expected_state, provider_name, verifier, query).await {
        Ok(user_id) => signed_in(&state, session, &user_id),
        Err(e) => (state.sessions.save(&session), e).into_response(),
    }
}

async fn complete_federated(
    state: &AppState,
    expected_state: Option<String>,
    provider_name: Option<String>,
    verifier: Option<String>,
    query: CallbackQuery,
) -> Result<String, LoginError> {
    let (Some(expected_state), Some(provider_name), Some(verifier)) =
        (expected_state, provider_name, verifier)
    else {
        return Err(LoginError::StateMismatch);
    };

    let presented = query.state.unwrap_or_default();
    if !bool::from(presented.as_bytes().ct_eq(expected_state.as_bytes())) {
        return Err(LoginError::StateMismatch);
    }
    if let Some(error) = query.error {
        return Err(LoginError::Provider(format!("provider returned '{error}'")));
    }
    let code = query
        .code
        .filter(|code| !code.is_empty())
        .ok_or_else(|| LoginError::Provider("callback without a code".to_string()))?;

    let provider = state
        .providers
        .get(&provider_name)
        .ok_or(LoginError::UnknownProvider)?;
    let identity = provider
        .exchange(&code, &callback_uri(state), &verifier)
        .await?;

    let user = state
        .users
        .find_by_email(&identity.email)
        .await?
        .ok_or(LoginError::UnknownUser)?;
    info!("User '{}' signed in through '{}'", user.id, provider_name);
    Ok(user.id)
}

pub async fn logout(State(state): State<AppState>, session: SessionData) -> impl IntoResponse {
    if let Some(user_id) = &session.user_id {
        info!("User '{user_id}' signed out");
    }
    (state.sessions.clear(), Redirect::to("/login"))
}

pub async fn landing(State(state): State<AppState>, mut session: SessionData) -> Response {
    let Some(user_id) = session.user_id.clone() else {
        return Redirect::to("/login").into_response();
    };

    let display_name = match state.users.find_by_id(&user_id).await {
        Ok(Some(user)) if !user.name.is_empty() => user.name,
        Ok(Some(user)) => user.email,
        Ok(None) => user_id,
        Err(e) => return LoginError::from(e).into_response(),
    };

    let csrf = session.ensure_csrf_token();
    let page = pages::landing_page(&csrf, &display_name);
    (state.sessions.save(&session), page).into_response()
}
