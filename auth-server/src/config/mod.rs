pub(crate) use crate::config::cache::{CacheConfig, CacheStore};
pub(crate) use crate::config::keys::KeysConfig;
pub(crate) use crate::config::login::LoginConfig;
pub(crate) use crate::config::oauth::OAuthConfig;
pub(crate) use crate::config::server::ServerConfig;
pub(crate) use crate::config::session::SessionConfig;
use confique::Config;

pub mod cache;
pub mod keys;
pub mod login;
pub mod oauth;
pub mod server;
pub mod session;

/// Main configuration structure for the authorization server.
///
/// Every field can be set through an `AUTH_*` environment variable.
#[derive(Debug, Config, Clone)]
pub struct Settings {
    /// Listener and public identity
    #[config(nested)]
    pub server: ServerConfig,

    /// Authorization flow lifetimes and client registry
    #[config(nested)]
    pub oauth: OAuthConfig,

    /// Signing keys and key set publication
    #[config(nested)]
    pub keys: KeysConfig,

    /// Browser session cookie
    #[config(nested)]
    pub session: SessionConfig,

    /// Storage for codes, refresh tokens and one-time passwords
    #[config(nested)]
    pub cache: CacheConfig,

    /// Login entry points
    #[config(nested)]
    pub login: LoginConfig,
}

impl Settings {
    /// Loads the configuration from environment variables
    pub fn new() -> Result<Self, confique::Error> {
        Self::builder().env().load()
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                port: 0,
                issuer: "https://auth.test".to_string(),
                healthcheck_timeout: 1.0,
                outbound_timeout: 5,
            },
            oauth: OAuthConfig {
                code_ttl: 600,
                access_token_ttl: 900,
                refresh_token_ttl: 86400,
                rotate_refresh_tokens: true,
                clients_file: None,
                scopes: "openid email profile permissions".to_string(),
            },
            keys: KeysConfig {
                signing_key_path: "../testdata/signing_key.pem".to_string(),
                signing_kid: "key-2024-01".to_string(),
                retired_jwks_path: None,
                remote_jwks_url: None,
                jwks_cache_ttl: 300,
                max_forced_refreshes_per_minute: 10,
                fetch_timeout: 5,
                leeway: 30,
            },
            session: SessionConfig {
                cookie_key: None,
                cookie_name: "auth_session".to_string(),
                secure: false,
                max_age: 3600,
                public_paths: "/login,/auth/callback,/logout,/oauth/authorize".to_string(),
            },
            cache: CacheConfig {
                store: CacheStore::InMemory,
                capacity_mib: 16,
                redis_url: String::new(),
                redis_prefix: "auth-test:".to_string(),
            },
            login: LoginConfig {
                users_file: None,
                providers_file: None,
                otp_ttl: 300,
                otp_max_attempts: 5,
                otp_max_issues: 5,
                otp_issue_window: 3600,
            },
        }
    }
}
