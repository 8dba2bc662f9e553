//! Registered OAuth clients.
//!
//! Confidential clients hold an Argon2id hash of their secret; public clients
//! (native and single-page apps) have no secret and always have to use PKCE.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use log::{debug, info, warn};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Unknown client or unregistered redirect URI. Deliberately does not say which.
    #[error("Unknown client or unregistered redirect URI")]
    InvalidAuthorizationTarget,
    #[error("Client authentication failed")]
    AuthenticationFailed,
    #[error("Client not found")]
    NotFound,
    #[error("Client '{0}' is public and has no secret")]
    PublicClient(String),
    #[error("Failed to hash client secret: {0}")]
    Hash(String),
    #[error("Failed to load clients: {0}")]
    Load(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegisteredClient {
    pub client_id: String,
    #[serde(default)]
    pub name: String,
    /// Argon2 PHC string; `None` for public clients
    #[serde(default, skip_serializing)]
    pub secret_hash: Option<String>,
    /// Exact-match set
    pub redirect_uris: Vec<String>,
    #[serde(default = "default_true")]
    pub require_pkce: bool,
    /// First-party clients skip the consent screen
    #[serde(default)]
    pub is_system: bool,
}

fn default_true() -> bool {
    true
}

impl RegisteredClient {
    pub fn is_confidential(&self) -> bool {
        self.secret_hash.is_some()
    }

    pub fn allows_redirect(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.client_id
        } else {
            &self.name
        }
    }
}

/// Seed file entry. A plaintext `secret` is hashed on load.
#[derive(Debug, Deserialize)]
struct ClientSeed {
    #[serde(flatten)]
    client: RegisteredClient,
    #[serde(default)]
    secret_hash: Option<String>,
    #[serde(default)]
    secret: Option<String>,
}

pub struct ClientRegistry {
    clients: RwLock<HashMap<String, RegisteredClient>>,
    dummy_hash: String,
}

impl ClientRegistry {
    pub fn new(clients: Vec<RegisteredClient>) -> Result<Self, ClientError> {
        let clients = clients
            .into_iter()
            .map(|mut client| {
                if !client.is_confidential() && !client.require_pkce {
                    warn!(
                        "Client '{}' is public; enforcing PKCE",
                        client.client_id
                    );
                    client.require_pkce = true;
                }
                (client.client_id.clone(), client)
            })
            .collect();

        Ok(Self {
            clients: RwLock::new(clients),
            dummy_hash: hash_secret(&generate_secret())?,
        })
    }

    /// Loads a JSON array of clients
    pub fn from_json(json: &str) -> Result<Self, ClientError> {
        let seeds: Vec<ClientSeed> =
            serde_json::from_str(json).map_err(|e| ClientError::Load(e.to_string()))?;

        let mut clients = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let mut client = seed.client;
            client.secret_hash = match (seed.secret_hash, seed.secret) {
                (Some(hash), _) => {
                    PasswordHash::new(&hash).map_err(|e| {
                        ClientError::Load(format!(
                            "invalid secret_hash for '{}': {e}",
                            client.client_id
                        ))
                    })?;
                    Some(hash)
                }
                (None, Some(secret)) => Some(hash_secret(&secret)?),
                (None, None) => None,
            };
            clients.push(client);
        }

        info!("Loaded {} OAuth client(s)", clients.len());
        Self::new(clients)
    }

    pub fn from_file(path: &str) -> Result<Self, ClientError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Load(format!("{path}: {e}")))?;
        Self::from_json(&json)
    }

    pub async fn get(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.read().await.get(client_id).cloned()
    }

    /// Looks up the client for an authorization request. The redirect URI must
    /// match a registered one byte for byte.
    pub async fn resolve_authorization(
        &self,
        client_id: &str,
        redirect_uri: &str,
    ) -> Result<RegisteredClient, ClientError> {
        match self.get(client_id).await {
            Some(client) if client.allows_redirect(redirect_uri) => Ok(client),
            _ => {
                debug!("Rejected authorization target for client '{}'", client_id);
                Err(ClientError::InvalidAuthorizationTarget)
            }
        }
    }

    /// Authenticates a client at the token, revocation and introspection endpoints.
    ///
    /// Confidential clients must present their secret. Public clients must not
    /// present one.
    pub async fn authenticate(
        &self,
        client_id: &str,
        secret: Option<&str>,
    ) -> Result<RegisteredClient, ClientError> {
        let Some(client) = self.get(client_id).await else {
            if let Some(secret) = secret {
                // Same work as a real check so response time does not reveal the client
                let _ = verify_secret(secret, &self.dummy_hash).await;
            }
            return Err(ClientError::AuthenticationFailed);
        };

        match (&client.secret_hash, secret) {
            (Some(hash), Some(secret)) => {
                if verify_secret(secret, hash).await {
                    Ok(client)
                } else {
                    Err(ClientError::AuthenticationFailed)
                }
            }
            (None, None) => Ok(client),
            _ => Err(ClientError::AuthenticationFailed),
        }
    }

    /// Replaces the secret of a confidential client and returns the new plaintext
    pub async fn rotate_secret(&self, client_id: &str) -> Result<String, ClientError> {
        let secret = generate_secret();
        let hash = hash_secret(&secret)?;

        let mut clients = self.clients.write().await;
        let client = clients.get_mut(client_id).ok_or(ClientError::NotFound)?;
        if !client.is_confidential() {
            return Err(ClientError::PublicClient(client_id.to_string()));
        }
        client.secret_hash = Some(hash);

        info!("Rotated secret for client '{}'", client_id);
        Ok(secret)
    }
}

/// Argon2id with a random salt, PHC string format
pub fn hash_secret(secret: &str) -> Result<String, ClientError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ClientError::Hash(e.to_string()))
}

async fn verify_secret(secret: &str, hash: &str) -> bool {
    let secret = secret.to_string();
    let hash = hash.to_string();
    tokio::task::spawn_blocking(move || {
        PasswordHash::new(&hash)
            .map(|parsed| {
                Argon2::default()
                    .verify_password(secret.as_bytes(), &parsed)
                    .is_ok()
            })
            .unwrap_or(false)
    })
    .await
    .unwrap_or(false)
}

fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
