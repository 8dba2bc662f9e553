use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::Client;

use crate::error::GuardError;
use crate::jwk::JwkSet;

/// Where the verifier obtains the current public key set from.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self) -> Result<JwkSet, GuardError>;
}

#[async_trait]
impl<T: KeySource + ?Sized> KeySource for Arc<T> {
    async fn fetch(&self) -> Result<JwkSet, GuardError> {
        (**self).fetch().await
    }
}

/// Fetches the key set from a JWKS endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpKeySource {
    client: Client,
    url: String,
}

impl HttpKeySource {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, GuardError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout.min(Duration::from_secs(2)))
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .build()
            .map_err(|e| GuardError::KeyFetch(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl KeySource for HttpKeySource {
    async fn fetch(&self) -> Result<JwkSet, GuardError> {
        debug!("Fetching key set from {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| GuardError::KeyFetch(format!("request to {} failed: {e}", self.url)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GuardError::KeyFetch(format!(
                "{} returned status {status}",
                self.url
            )));
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| GuardError::KeyFetch(format!("invalid key set document: {e}")))
    }
}

/// A fixed key set, for embedding the verifier next to the signer.
#[derive(Debug, Clone, Default)]
pub struct StaticKeySource {
    keys: JwkSet,
}

impl StaticKeySource {
    pub fn new(keys: JwkSet) -> Self {
        Self { keys }
    }
}

#[async_trait]
impl KeySource for StaticKeySource {
    async fn fetch(&self) -> Result<JwkSet, GuardError> {
        Ok(self.keys.clone())
    }
}
