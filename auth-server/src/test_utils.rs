use crate::api::login::otp::tests::RecordingOtpSender;
use crate::clients::{RegisteredClient, hash_secret};
use crate::config::Settings;
use crate::create_app;
use crate::session::SessionData;
use crate::state::AppState;
use crate::users::UserProfile;
use axum::Router;
use axum::body::Body;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use http::{HeaderMap, HeaderValue, Method, Request, StatusCode, header};
use http_body_util::BodyExt;
use log::LevelFilter;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use token_guard::AccessTokenClaims;
use tower::ServiceExt;

pub const ALICE_ID: &str = "7";
pub const ALICE_EMAIL: &str = "alice@example.com";
pub const ADMIN_ID: &str = "1";
pub const ADMIN_EMAIL: &str = "admin@example.com";
pub const SVC_SECRET: &str = "svc-secret";

/// RFC 7636 appendix B
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
pub const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

pub const APP_REDIRECT: &str = "https://app.example/cb";

/// - `c1`: public app, PKCE required
/// - `svc`: confidential backend
/// - `dash`: first-party app that skips consent
pub fn test_clients() -> Vec<RegisteredClient> {
    vec![
        RegisteredClient {
            client_id: "c1".to_string(),
            name: "Example App".to_string(),
            secret_hash: None,
            redirect_uris: vec![APP_REDIRECT.to_string()],
            require_pkce: true,
            is_system: false,
        },
        RegisteredClient {
            client_id: "svc".to_string(),
            name: "Backend Service".to_string(),
            secret_hash: Some(hash_secret(SVC_SECRET).expect("hash test secret")),
            redirect_uris: vec!["https://svc.example/cb".to_string()],
            require_pkce: false,
            is_system: false,
        },
        RegisteredClient {
            client_id: "dash".to_string(),
            name: "Dashboard".to_string(),
            secret_hash: None,
            redirect_uris: vec!["https://dash.example/cb".to_string()],
            require_pkce: true,
            is_system: true,
        },
    ]
}

pub fn test_users() -> Vec<UserProfile> {
    vec![
        UserProfile {
            id: ALICE_ID.to_string(),
            public_id: "usr_alice".to_string(),
            email: ALICE_EMAIL.to_string(),
            name: "Alice Liddell".to_string(),
            email_verified: true,
            permissions: vec!["projects:read".to_string()],
            memberships: HashMap::from([("42".to_string(), "editor".to_string())]),
        },
        UserProfile {
            id: ADMIN_ID.to_string(),
            public_id: "usr_admin".to_string(),
            email: ADMIN_EMAIL.to_string(),
            name: "Ada Admin".to_string(),
            email_verified: true,
            permissions: vec!["clients:manage".to_string()],
            memberships: HashMap::new(),
        },
    ]
}

/// Authorization request from `c1`'s registered redirect with `state=xyz`
pub fn authorize_uri(client_id: &str, challenge: &str) -> String {
    format!(
        "/oauth/authorize?response_type=code&client_id={client_id}\
         &redirect_uri=https%3A%2F%2Fapp.example%2Fcb\
         &scope=openid%20email%20profile%20permissions&state=xyz\
         &code_challenge={challenge}&code_challenge_method=S256"
    )
}

/// The whole application behind `oneshot`, with a cookie jar that keeps the
/// session cookie between browser-style requests.
///
/// ```rust
/// let fixture = TestFixture::new().await;
/// fixture.sign_in(ALICE_EMAIL).await;
/// let response = fixture.browse("/").await;
/// response.assert_ok();
/// ```
pub struct TestFixture {
    pub app: Router,
    pub state: AppState,
    pub settings: Settings,
    /// Every one-time password "emailed" during the test
    pub otp_outbox: Arc<RecordingOtpSender>,
    session_cookie: Mutex<Option<String>>,
}

impl TestFixture {
    pub async fn new() -> Self {
        Self::with_settings(Settings::for_tests()).await
    }

    pub async fn with_settings(settings: Settings) -> Self {
        Self::build(settings, |_| {}).await
    }

    /// Lets a test swap parts of the state (e.g. login providers) before the
    /// router is built
    pub async fn build(settings: Settings, configure: impl FnOnce(&mut AppState)) -> Self {
        Self::setup_logger(LevelFilter::Debug);

        let otp_outbox = Arc::new(RecordingOtpSender::default());
        let mut state = AppState::for_tests_with(settings.clone(), otp_outbox.clone());
        configure(&mut state);
        let app = create_app(state.clone());

        Self {
            app,
            state,
            settings,
            otp_outbox,
            session_cookie: Mutex::new(None),
        }
    }

    pub fn setup_logger(level: LevelFilter) {
        let _ = env_logger::builder()
            .filter_level(level)
            .is_test(true)
            .try_init();
    }

    /// Sends a request as-is, without the session cookie
    pub async fn send(&self, request: Request<Body>) -> TestResponse {
        let response = self
            .app
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to read response body")
            .to_bytes();

        let body = String::from_utf8_lossy(&bytes).into_owned();
        let json = serde_json::from_slice(&bytes).unwrap_or_else(|_| serde_json::json!({}));
        TestResponse {
            status,
            headers,
            body,
            json,
        }
    }

    pub async fn get(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    pub async fn get_bearer(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri.as_ref())
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .body(Body::empty())
            .expect("Failed to build request");
        self.send(request).await
    }

    /// POST with a bearer token; an empty token sends no `Authorization` header
    pub async fn post_bearer(&self, uri: impl AsRef<str>, token: &str) -> TestResponse {
        let mut builder = Request::builder().method(Method::POST).uri(uri.as_ref());
        if !token.is_empty() {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        self.send(builder.body(Body::empty()).expect("Failed to build request"))
            .await
    }

    /// Form POST with client credentials in the body, as public clients send them
    pub async fn post_form(&self, uri: impl AsRef<str>, fields: &[(&str, &str)]) -> TestResponse {
        let request = form_request(uri.as_ref())
            .body(Body::from(encode_form(fields)))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// Form POST authenticated with HTTP Basic
    pub async fn post_form_basic(
        &self,
        uri: impl AsRef<str>,
        fields: &[(&str, &str)],
        client_id: &str,
        client_secret: &str,
    ) -> TestResponse {
        let credentials = STANDARD.encode(format!("{client_id}:{client_secret}"));
        let request = form_request(uri.as_ref())
            .header(header::AUTHORIZATION, format!("Basic {credentials}"))
            .body(Body::from(encode_form(fields)))
            .expect("Failed to build request");
        self.send(request).await
    }

    /// GET as a browser: sends and then updates the session cookie
    pub async fn browse(&self, uri: impl AsRef<str>) -> TestResponse {
        let request = self
            .with_cookie(Request::builder().method(Method::GET).uri(uri.as_ref()))
            .body(Body::empty())
            .expect("Failed to build request");
        self.send_as_browser(request).await
    }

    /// Posts a form as a browser. The session's CSRF token is added unless the
    /// test supplies its own `csrf_token` field.
    pub async fn submit(&self, uri: impl AsRef<str>, fields: &[(&str, &str)]) -> TestResponse {
        let mut fields: Vec<(&str, &str)> = fields.to_vec();
        let csrf = self.csrf_token().unwrap_or_default();
        if !fields.iter().any(|(name, _)| *name == "csrf_token") {
            fields.push(("csrf_token", &csrf));
        }

        let request = self
            .with_cookie(form_request(uri.as_ref()))
            .body(Body::from(encode_form(&fields)))
            .expect("Failed to build request");
        self.send_as_browser(request).await
    }

    /// The session the browser currently holds
    pub fn session(&self) -> SessionData {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = self.session_cookie.lock().unwrap().as_deref() {
            headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        }
        self.state.sessions.load(&headers)
    }

    pub fn csrf_token(&self) -> Option<String> {
        self.session().csrf_token
    }

    /// Signs in through the email code flow
    pub async fn sign_in(&self, email: &str) {
        self.browse("/login").await;
        self.submit("/login/email", &[("email", email)]).await;
        let code = self
            .otp_outbox
            .last_code_for(email)
            .expect("a code was sent");
        let response = self.submit("/login/verify", &[("code", &code)]).await;
        assert_eq!(response.status, StatusCode::SEE_OTHER, "{}", response.body);
    }

    /// Runs the browser half of the code flow for `c1` and returns the code
    pub async fn authorization_code(&self, email: &str) -> String {
        if !self.session().is_authenticated() {
            let response = self.browse(authorize_uri("c1", CHALLENGE)).await;
            assert_eq!(response.location(), "/login");
            self.sign_in(email).await;
        }
        let response = self.browse(authorize_uri("c1", CHALLENGE)).await;
        response.assert_ok();

        let response = self
            .submit(
                "/oauth/authorize",
                &[("decision", "approve"), ("client_id", "c1")],
            )
            .await;
        assert!(response.location().starts_with(APP_REDIRECT));
        assert_eq!(response.query_param("state").as_deref(), Some("xyz"));
        response.query_param("code").expect("redirect carries a code")
    }

    /// Exchanges a code from [`Self::authorization_code`] at the token endpoint
    pub async fn exchange(&self, code: &str) -> TestResponse {
        self.post_form(
            "/oauth/token",
            &[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", APP_REDIRECT),
                ("code_verifier", VERIFIER),
                ("client_id", "c1"),
            ],
        )
        .await
    }

    /// Access token signed by the server for `user_id` with every scope
    pub async fn access_token_for(&self, user_id: &str, client_id: &str) -> String {
        let user = self
            .state
            .users
            .find_by_id(user_id)
            .await
            .unwrap()
            .expect("a test user");
        let now = chrono::Utc::now().timestamp();
        let claims = AccessTokenClaims {
            iss: self.settings.server.issuer.clone(),
            sub: user.subject().to_string(),
            aud: client_id.to_string(),
            exp: now + 300,
            iat: now,
            nbf: now,
            jti: uuid::Uuid::new_v4().to_string(),
            scope: "openid email profile permissions".to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            email_verified: user.email_verified,
            perms: user.permissions.clone(),
            memberships: user.memberships.clone(),
        };
        self.state.keys.sign(&claims).unwrap()
    }

    fn with_cookie(&self, builder: http::request::Builder) -> http::request::Builder {
        match self.session_cookie.lock().unwrap().as_deref() {
            Some(cookie) => builder.header(header::COOKIE, cookie),
            None => builder,
        }
    }

    async fn send_as_browser(&self, request: Request<Body>) -> TestResponse {
        let response = self.send(request).await;
        let prefix = format!("{}=", self.state.sessions.cookie_name());
        for value in response.headers.get_all(header::SET_COOKIE) {
            let value = value.to_str().unwrap();
            let pair = value.split(';').next().unwrap_or_default().trim();
            if !pair.starts_with(&prefix) {
                continue;
            }
            let cleared = pair.len() == prefix.len() || value.contains("Max-Age=0");
            *self.session_cookie.lock().unwrap() = (!cleared).then(|| pair.to_string());
        }
        response
    }
}

fn form_request(uri: &str) -> http::request::Builder {
    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
}

fn encode_form(fields: &[(&str, &str)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(fields)
        .finish()
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// Raw body, for HTML pages
    pub body: String,
    /// Parsed body, or an empty object when it is not JSON
    pub json: Value,
}

impl TestResponse {
    pub fn assert_status(&self, expected: StatusCode) -> &Self {
        assert_eq!(
            self.status, expected,
            "Expected status {} but got {} with body: {}",
            expected, self.status, self.body
        );
        self
    }

    pub fn assert_ok(&self) -> &Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn location(&self) -> &str {
        self.headers
            .get(header::LOCATION)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
    }

    /// Query parameter of the redirect target
    pub fn query_param(&self, name: &str) -> Option<String> {
        let base = url::Url::parse("http://localhost").unwrap();
        let target = base.join(self.location()).ok()?;
        target
            .query_pairs()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.into_owned())
    }
}
