//! Token signing and key publication.
//!
//! One RSA key is active and signs every token. Public keys of retired signing
//! keys can be loaded next to it so tokens minted before a rotation keep
//! validating until they expire.

use crate::config::KeysConfig;
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::info;
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use serde::Serialize;
use thiserror::Error;
use token_guard::{GuardError, Jwk, JwkSet, KeySource};

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("Failed to read key file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("Invalid RSA private key: {0}")]
    InvalidPem(String),
    #[error("Invalid key set: {0}")]
    InvalidJwks(#[from] serde_json::Error),
    #[error("Failed to sign token: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),
}

pub struct SigningKey {
    kid: String,
    encoding_key: EncodingKey,
    public: Jwk,
}

impl SigningKey {
    /// Parses a PKCS#8 or PKCS#1 RSA private key
    pub fn from_pem(kid: impl Into<String>, pem: &str) -> Result<Self, KeyError> {
        let kid = kid.into();
        let private = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;
        let encoding_key = EncodingKey::from_rsa_pem(pem.as_bytes())
            .map_err(|e| KeyError::InvalidPem(e.to_string()))?;

        let n = URL_SAFE_NO_PAD.encode(private.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(private.e().to_bytes_be());

        Ok(Self {
            public: Jwk::rsa_signing(kid.clone(), n, e),
            kid,
            encoding_key,
        })
    }

    pub fn kid(&self) -> &str {
        &self.kid
    }

    pub fn public_jwk(&self) -> &Jwk {
        &self.public
    }
}

pub struct KeyManager {
    active: SigningKey,
    retired: Vec<Jwk>,
}

impl KeyManager {
    pub fn new(active: SigningKey, retired: Vec<Jwk>) -> Self {
        let retired = retired
            .into_iter()
            .filter(|jwk| jwk.kid != active.kid)
            .collect();
        Self { active, retired }
    }

    pub fn from_config(config: &KeysConfig) -> Result<Self, KeyError> {
        let pem = read_file(&config.signing_key_path)?;
        let active = SigningKey::from_pem(config.signing_kid.clone(), &pem)?;

        let retired = match &config.retired_jwks_path {
            Some(path) => serde_json::from_str::<JwkSet>(&read_file(path)?)?.keys,
            None => Vec::new(),
        };

        info!(
            "Loaded signing key '{}' with {} retired key(s)",
            active.kid(),
            retired.len()
        );
        Ok(Self::new(active, retired))
    }

    pub fn active_kid(&self) -> &str {
        self.active.kid()
    }

    /// Compact RS256 JWS over `claims` with the active `kid` in the header
    pub fn sign<T: Serialize>(&self, claims: &T) -> Result<String, KeyError> {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.active.kid.clone());
        Ok(jsonwebtoken::encode(&header, claims, &self.active.encoding_key)?)
    }

    /// The published key set: the active key first, then retired keys
    pub fn jwks(&self) -> JwkSet {
        let mut keys = Vec::with_capacity(1 + self.retired.len());
        keys.push(self.active.public.clone());
        keys.extend(self.retired.iter().cloned());
        JwkSet::new(keys)
    }
}

#[async_trait]
impl KeySource for KeyManager {
    async fn fetch(&self) -> Result<JwkSet, GuardError> {
        Ok(self.jwks())
    }
}

fn read_file(path: &str) -> Result<String, KeyError> {
    std::fs::read_to_string(path).map_err(|source| KeyError::Io {
        path: path.to_string(),
        source,
    })
}
