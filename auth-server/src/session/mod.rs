//! Browser sessions.
//!
//! There is no server-side session table: the whole session is one private
//! (encrypted and authenticated) cookie. Anything that fails to decrypt or parse
//! is treated as no session at all. Rotating the cookie key signs everyone out.

mod middleware;

pub use middleware::{load_session, require_auth, validate_csrf};

use crate::api::oauth::models::PendingAuthorization;
use crate::config::SessionConfig;
use axum::extract::FromRequestParts;
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use http::HeaderMap;
use http::request::Parts;
use log::{debug, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SessionData {
    /// Absent for anonymous sessions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Unix seconds of the last successful login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_time: Option<i64>,
    /// `state` sent to the federated provider on the outbound leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_provider: Option<String>,
    /// PKCE verifier for the outbound leg
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oauth_verifier: Option<String>,
    /// Local path to continue to after login
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_to: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csrf_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending_authorization: Option<PendingAuthorization>,
    /// Email a one-time password was sent to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_email: Option<String>,
}

impl SessionData {
    pub fn is_authenticated(&self) -> bool {
        self.user_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// Returns the CSRF token, creating one if the session has none yet
    pub fn ensure_csrf_token(&mut self) -> String {
        self.csrf_token.get_or_insert_with(generate_token).clone()
    }

    /// Marks the session as signed in. The CSRF token is replaced and the
    /// state of any unfinished login attempt is dropped.
    pub fn authenticate(&mut self, user_id: &str) {
        self.user_id = Some(user_id.to_string());
        self.auth_time = Some(chrono::Utc::now().timestamp());
        self.csrf_token = Some(generate_token());
        self.oauth_state = None;
        self.oauth_provider = None;
        self.oauth_verifier = None;
        self.login_email = None;
    }

    /// Where to go after login. Consumes the stored target.
    pub fn take_return_to(&mut self) -> String {
        self.return_to
            .take()
            .filter(|target| is_safe_return_to(target))
            .unwrap_or_else(|| "/".to_string())
    }

    fn sign_out(&mut self) {
        self.user_id = None;
        self.auth_time = None;
    }
}

impl<S: Send + Sync> FromRequestParts<S> for SessionData {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(parts
            .extensions
            .get::<SessionData>()
            .cloned()
            .unwrap_or_default())
    }
}

#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    cookie_name: String,
    secure: bool,
    max_age: i64,
    public_paths: Arc<[String]>,
}

impl SessionStore {
    pub fn new(config: &SessionConfig, key: Key) -> Self {
        Self {
            key,
            cookie_name: config.cookie_name.clone(),
            secure: config.secure,
            max_age: i64::try_from(config.max_age).unwrap_or(i64::MAX),
            public_paths: config.public_paths().into(),
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Decrypts the session cookie. Never fails: a missing, tampered or
    /// unparseable cookie yields an empty session, and a login older than
    /// `max_age` yields an anonymous one.
    pub fn load(&self, headers: &HeaderMap) -> SessionData {
        let jar = PrivateCookieJar::from_headers(headers, self.key.clone());
        let Some(cookie) = jar.get(&self.cookie_name) else {
            return SessionData::default();
        };

        let mut data = match serde_json::from_str::<SessionData>(cookie.value()) {
            Ok(data) => data,
            Err(e) => {
                warn!("Discarding unreadable session cookie: {e}");
                return SessionData::default();
            }
        };

        if let Some(auth_time) = data.auth_time {
            if chrono::Utc::now().timestamp() - auth_time > self.max_age {
                debug!("Session login is older than max age, treating as anonymous");
                data.sign_out();
            }
        }
        data
    }

    pub fn is_authenticated(&self, headers: &HeaderMap) -> bool {
        self.load(headers).is_authenticated()
    }

    /// The cookie update that persists `data`; return it alongside the response
    pub fn save(&self, data: &SessionData) -> PrivateCookieJar {
        let value = match serde_json::to_string(data) {
            Ok(value) => value,
            Err(e) => {
                warn!("Failed to encode session, clearing it: {e}");
                return self.clear();
            }
        };
        let cookie = self.cookie(value, time::Duration::seconds(self.max_age));
        PrivateCookieJar::new(self.key.clone()).add(cookie)
    }

    /// An immediately expiring cookie that replaces the session
    pub fn clear(&self) -> PrivateCookieJar {
        let cookie = self.cookie(String::new(), time::Duration::ZERO);
        PrivateCookieJar::new(self.key.clone()).add(cookie)
    }

    pub fn is_public_path(&self, path: &str) -> bool {
        let path = if path.len() > 1 {
            path.trim_end_matches('/')
        } else {
            path
        };
        self.public_paths.iter().any(|public| {
            path == public
                || path
                    .strip_prefix(public.as_str())
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn cookie(&self, value: String, max_age: time::Duration) -> Cookie<'static> {
        Cookie::build((self.cookie_name.clone(), value))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .max_age(max_age)
            .build()
    }
}

/// 32 bytes from the OS CSPRNG, base64url without padding
pub fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Only local absolute paths are followed after login
pub fn is_safe_return_to(target: &str) -> bool {
    target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(char::is_control)
}
