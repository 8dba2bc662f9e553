//! Sign-in through an external OAuth 2.0 identity provider.
//!
//! Only the standard `email`, `email_verified` and `name` userinfo claims are
//! read. The local account is found by email, so a provider has to vouch for
//! the address.

use super::LoginError;
use crate::pages::ProviderLink;
use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Deserialize;
use std::sync::Arc;
use url::Url;

#[derive(Debug, Clone, PartialEq)]
pub struct FederatedIdentity {
    pub email: String,
    pub email_verified: Option<bool>,
    pub name: Option<String>,
}

#[async_trait]
pub trait FederatedProvider: Send + Sync {
    /// Path segment under `/login/`
    fn name(&self) -> &str;

    fn label(&self) -> &str;

    /// Where to send the browser, carrying our `state` and PKCE challenge
    fn authorize_url(&self, redirect_uri: &str, state: &str, code_challenge: &str) -> String;

    /// Redeems the provider's code and reads the signed-in identity
    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<FederatedIdentity, LoginError>;
}

fn default_scope() -> String {
    "openid email profile".to_string()
}

/// One entry of the providers file
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub label: String,
    pub client_id: String,
    pub client_secret: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
    #[serde(default = "default_scope")]
    pub scope: String,
}

#[derive(Deserialize)]
struct ProviderTokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct ProviderUserInfo {
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
}

/// A provider speaking plain OAuth 2.0 with a userinfo endpoint
pub struct OAuth2Provider {
    config: ProviderConfig,
    authorize_url: Url,
    http: reqwest::Client,
}

impl OAuth2Provider {
    pub fn new(config: ProviderConfig, http: reqwest::Client) -> Result<Self, LoginError> {
        let authorize_url = Url::parse(&config.authorize_url).map_err(|e| {
            LoginError::Config(format!("provider '{}' authorize_url: {e}", config.name))
        })?;
        for (field, value) in [("token_url", &config.token_url), ("userinfo_url", &config.userinfo_url)] {
            Url::parse(value)
                .map_err(|e| LoginError::Config(format!("provider '{}' {field}: {e}", config.name)))?;
        }
        Ok(Self {
            config,
            authorize_url,
            http,
        })
    }

    async fn fetch_access_token(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<String, LoginError> {
        let response = self
            .http
            .post(&self.config.token_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", redirect_uri),
                ("client_id", self.config.client_id.as_str()),
                ("client_secret", self.config.client_secret.as_str()),
                ("code_verifier", code_verifier),
            ])
            .send()
            .await
            .map_err(|e| LoginError::Provider(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(LoginError::Provider(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token: ProviderTokenResponse = response
            .json()
            .await
            .map_err(|e| LoginError::Provider(format!("unreadable token response: {e}")))?;
        Ok(token.access_token)
    }
}

#[async_trait]
impl FederatedProvider for OAuth2Provider {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn label(&self) -> &str {
        &self.config.label
    }

    fn authorize_url(&self, redirect_uri: &str, state: &str, code_challenge: &str) -> String {
        let mut url = self.authorize_url.clone();
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.config.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("scope", &self.config.scope)
            .append_pair("state", state)
            .append_pair("code_challenge", code_challenge)
            .append_pair("code_challenge_method", "S256");
        url.into()
    }

    async fn exchange(
        &self,
        code: &str,
        redirect_uri: &str,
        code_verifier: &str,
    ) -> Result<FederatedIdentity, LoginError> {
        let access_token = self
            .fetch_access_token(code, redirect_uri, code_verifier)
            .await?;

        let response = self
            .http
            .get(&self.config.userinfo_url)
            .bearer_auth(access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| LoginError::Provider(format!("userinfo request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(LoginError::Provider(format!(
                "userinfo endpoint returned {}",
                response.status()
            )));
        }

        let info: ProviderUserInfo = response
            .json()
            .await
            .map_err(|e| LoginError::Provider(format!("unreadable userinfo: {e}")))?;

        let email = info
            .email
            .filter(|email| !email.trim().is_empty())
            .ok_or_else(|| LoginError::Provider("userinfo has no email".to_string()))?;
        if info.email_verified == Some(false) {
            debug!("Provider '{}' reports an unverified email", self.config.name);
            return Err(LoginError::UnverifiedEmail);
        }

        Ok(FederatedIdentity {
            email,
            email_verified: info.email_verified,
            name: info.name,
        })
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn FederatedProvider>>,
}

impl ProviderRegistry {
    pub fn new(providers: Vec<Arc<dyn FederatedProvider>>) -> Self {
        Self { providers }
    }

    pub fn from_configs(
        configs: Vec<ProviderConfig>,
        http: reqwest::Client,
    ) -> Result<Self, LoginError> {
        let providers = configs
            .into_iter()
            .map(|config| {
                OAuth2Provider::new(config, http.clone())
                    .map(|provider| Arc::new(provider) as Arc<dyn FederatedProvider>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(providers))
    }

    pub fn from_file(path: &str, http: reqwest::Client) -> Result<Self, LoginError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| LoginError::Config(format!("{path}: {e}")))?;
        let configs: Vec<ProviderConfig> =
            serde_json::from_str(&json).map_err(|e| LoginError::Config(format!("{path}: {e}")))?;
        let registry = Self::from_configs(configs, http)?;
        info!("Loaded {} login provider(s) from {}", registry.providers.len(), path);
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FederatedProvider>> {
        let provider = self.providers.iter().find(|p| p.name() == name).cloned();
        if provider.is_none() {
            warn!("Unknown login provider '{name}'");
        }
        provider
    }

    pub fn links(&self) -> Vec<ProviderLink<'_>> {
        self.providers
            .iter()
            .map(|provider| ProviderLink {
                name: provider.name(),
                label: provider.label(),
            })
            .collect()
    }
}
