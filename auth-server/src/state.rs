use crate::api::login::{LoggingOtpSender, OtpManager, ProviderRegistry};
use crate::api::oauth::token_manager::TokenManager;
use crate::clients::ClientRegistry;
use crate::config::Settings;
use crate::keys::KeyManager;
use crate::session::SessionStore;
use crate::store::Store;
use crate::users::{InMemoryUserDirectory, UserDirectory};
use axum_extra::extract::cookie::Key;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;
use token_guard::{KeySource, TokenGuard, TokenVerifier, TokenVerifierBuilder};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub keys: Arc<KeyManager>,
    /// Verifies this server's own access tokens (userinfo, introspection, admin)
    pub guard: TokenGuard,
    pub clients: Arc<ClientRegistry>,
    pub users: Arc<dyn UserDirectory>,
    pub tokens: TokenManager,
    pub otps: OtpManager,
    pub sessions: SessionStore,
    pub providers: Arc<ProviderRegistry>,
}

fn startup_error(what: &str, e: impl std::fmt::Display) -> std::io::Error {
    std::io::Error::other(format!("Failed to {what}: {e}"))
}

impl AppState {
    fn create_http_client(settings: &Settings) -> Result<reqwest::Client, reqwest::Error> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.server.outbound_timeout))
            .connect_timeout(Duration::from_secs(2))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
    }

    /// Decodes the configured cookie key. Without one, a random key is used and
    /// sessions do not survive a restart.
    fn cookie_key(settings: &Settings) -> Result<Key, std::io::Error> {
        let Some(encoded) = settings.session.cookie_key.as_deref() else {
            warn!("No session cookie key configured; sessions will not survive a restart");
            return Ok(Key::generate());
        };
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| startup_error("decode the session cookie key", e))?;
        Key::try_from(bytes.as_slice()).map_err(|_| {
            startup_error(
                "load the session cookie key",
                "at least 64 bytes are required",
            )
        })
    }

    /// Verifier for the server's own tokens. Reads the local key manager
    /// unless a remote key set is configured (e.g. behind a key service).
    fn create_verifier(
        settings: &Settings,
        keys: Arc<KeyManager>,
    ) -> Result<TokenVerifier, token_guard::GuardError> {
        let config = &settings.keys;
        let builder = TokenVerifierBuilder::new(settings.server.issuer.clone())
            .with_leeway(config.leeway)
            .with_cache_ttl(Duration::from_secs(config.jwks_cache_ttl))
            .with_max_forced_refreshes_per_minute(config.max_forced_refreshes_per_minute)
            .with_fetch_timeout(Duration::from_secs(config.fetch_timeout));

        match &config.remote_jwks_url {
            Some(url) => {
                info!("Verifying tokens against remote key set {url}");
                builder.build_remote(url.clone())
            }
            None => Ok(builder.build_with_source(keys as Arc<dyn KeySource>)),
        }
    }

    pub async fn new(settings: Settings) -> Result<Self, std::io::Error> {
        let keys = Arc::new(
            KeyManager::from_config(&settings.keys)
                .map_err(|e| startup_error("load signing keys", e))?,
        );
        let verifier = Self::create_verifier(&settings, keys.clone())
            .map_err(|e| startup_error("build token verifier", e))?;

        let clients = match &settings.oauth.clients_file {
            Some(path) => ClientRegistry::from_file(path),
            None => {
                warn!("No clients file configured; no client can sign in");
                ClientRegistry::new(Vec::new())
            }
        }
        .map_err(|e| startup_error("load clients", e))?;

        let users: Arc<dyn UserDirectory> = match &settings.login.users_file {
            Some(path) => Arc::new(
                InMemoryUserDirectory::from_file(path)
                    .map_err(|e| startup_error("load users", e))?,
            ),
            None => {
                warn!("No users file configured; nobody can sign in");
                Arc::new(InMemoryUserDirectory::default())
            }
        };

        let http_client =
            Self::create_http_client(&settings).map_err(|e| startup_error("build HTTP client", e))?;
        let providers = match &settings.login.providers_file {
            Some(path) => ProviderRegistry::from_file(path, http_client)
                .map_err(|e| startup_error("load login providers", e))?,
            None => ProviderRegistry::default(),
        };

        let tokens = TokenManager::from_config(&settings.cache, &settings.oauth)
            .await
            .map_err(|e| startup_error("create token store", e))?;
        let otp_store = Store::create(&settings.cache, settings.login.otp_ttl)
            .await
            .map_err(|e| startup_error("create one-time password store", e))?;
        let quota_store = Store::create(&settings.cache, settings.login.otp_issue_window)
            .await
            .map_err(|e| startup_error("create one-time password quota store", e))?;
        let otps = OtpManager::new(
            otp_store,
            quota_store,
            &settings.login,
            Arc::new(LoggingOtpSender),
        );

        let sessions = SessionStore::new(&settings.session, Self::cookie_key(&settings)?);

        Ok(Self {
            settings: Arc::new(settings),
            keys,
            guard: TokenGuard::new(Arc::new(verifier)),
            clients: Arc::new(clients),
            users,
            tokens,
            otps,
            sessions,
            providers: Arc::new(providers),
        })
    }

    /// In-memory state seeded with the test clients and users
    #[cfg(test)]
    pub fn for_tests(settings: Settings) -> Self {
        Self::for_tests_with(settings, Arc::new(LoggingOtpSender))
    }

    #[cfg(test)]
    pub fn for_tests_with(
        settings: Settings,
        sender: Arc<dyn crate::api::login::otp::OtpSender>,
    ) -> Self {
        use crate::test_utils::{test_clients, test_users};

        let keys = Arc::new(KeyManager::from_config(&settings.keys).expect("test signing key"));
        let verifier =
            Self::create_verifier(&settings, keys.clone()).expect("test token verifier");
        let oauth = &settings.oauth;
        let tokens = TokenManager::new(
            Store::in_memory(oauth.code_ttl),
            Store::in_memory(oauth.refresh_token_ttl),
            Store::in_memory(oauth.access_token_ttl),
            oauth,
        );
        let otps = OtpManager::new(
            Store::in_memory(settings.login.otp_ttl),
            Store::in_memory(settings.login.otp_issue_window),
            &settings.login,
            sender,
        );

        Self {
            keys,
            guard: TokenGuard::new(Arc::new(verifier)),
            clients: Arc::new(ClientRegistry::new(test_clients()).expect("test clients")),
            users: Arc::new(InMemoryUserDirectory::new(test_users())),
            tokens,
            otps,
            sessions: SessionStore::new(&settings.session, Key::generate()),
            providers: Arc::new(ProviderRegistry::default()),
            settings: Arc::new(settings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cookie_key_must_be_long_enough() {
        let mut settings = Settings::for_tests();

        settings.session.cookie_key = Some(STANDARD.encode([7u8; 64]));
        assert!(AppState::cookie_key(&settings).is_ok());

        settings.session.cookie_key = Some(STANDARD.encode([7u8; 32]));
        assert!(AppState::cookie_key(&settings).is_err());

        settings.session.cookie_key = Some("not base64!".to_string());
        assert!(AppState::cookie_key(&settings).is_err());
    }

    #[tokio::test]
    async fn test_new_with_in_memory_store() {
        let state = AppState::new(Settings::for_tests()).await.unwrap();
        assert_eq!(state.keys.active_kid(), "key-2024-01");
        assert!(state.clients.get("c1").await.is_none());
        assert!(state.tokens.health_check().await.is_ok());
    }

    #[test]
    fn test_state_clones_share_data() {
        let state = AppState::for_tests(Settings::for_tests());
        let clone = state.clone();
        assert!(Arc::ptr_eq(&state.settings, &clone.settings));
        assert!(Arc::ptr_eq(&state.clients, &clone.clients));
    }
}
