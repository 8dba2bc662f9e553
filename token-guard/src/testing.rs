//! Fixtures shared by the unit tests.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header};

use crate::claims::AccessTokenClaims;
use crate::error::GuardError;
use crate::jwk::{Jwk, JwkSet};
use crate::key_source::KeySource;

pub const ISSUER: &str = "https://auth.example.com";
pub const AUDIENCE: &str = "client-1";

pub const SIGNING_KID: &str = "key-2024-01";
pub const SIGNING_PEM: &str = include_str!("../../testdata/signing_key.pem");
pub const SIGNING_N: &str = "n7bmEKRdW_HnJAx1gqA5AQWE-AZUyhaRvPOiCG5jQDVCcIiES-aEAxhdSim7JDX4Dxuv3nxYajgqGTnDnjTYnDTTxyll15Gihn5xZKy_1FbGcaNUIOtLOn0AymzPhn50MbFR4qMCEGRl_kdNosFvn5UKb-5sH3CixJcMaxbkFUFm4fOmIyRn5N5GnzVASndIgHHJ_T9t4GZqOzXB9O1B-wHKCscKi7DjJIu0Dp6TXyKp6fyMH3VWk5Z9RgMM0RnRY-not-42mdaripTCjHdLIimceTqMnT1-U6I6Vwv1dYhQpgJV6Xh_wuaNAyFpq21RFVZYt1kUJKdSSon8yXABWQ";

pub const ROTATED_KID: &str = "key-2024-06";
pub const ROTATED_PEM: &str = include_str!("../../testdata/rotated_key.pem");
pub const ROTATED_N: &str = "swuj711DqRKsGFDTxDhBbvkRgbqao2ZiQv8wMHeZQTqen418Xxr0WvAo5VVudMw0VgpsVdcQ5otHmwv49kN8KYPqhjFqepgCnSKnyoa-6b6ZOOTssTgOIRxxOgKsK_kupXb2oyoP0a55ezrMxHg6r3uyfEmjtuFn5LGQzopcQmg9k0uCNQpfikrI1sc5DDYXk23gDn9YyZHkUaIt1lQSHOWMnVZsVNRfM4vKged1MIv6daz8VwMH_Q22Ey24Ci7O-h8zjgIg7hW4Wg_MyDBQQRw_9eJ-qXqfq9VbKz8SFKCuE8M_rToSpWkF5XVQmIB3CYqT0221BfX_qjSTENHcaQ";

pub fn signing_jwk() -> Jwk {
    Jwk::rsa_signing(SIGNING_KID, SIGNING_N, "AQAB")
}

pub fn rotated_jwk() -> Jwk {
    Jwk::rsa_signing(ROTATED_KID, ROTATED_N, "AQAB")
}

pub fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs() as i64
}

pub fn claims_for(sub: &str) -> AccessTokenClaims {
    let now = now();
    AccessTokenClaims {
        iss: ISSUER.to_string(),
        sub: sub.to_string(),
        aud: AUDIENCE.to_string(),
        exp: now + 900,
        iat: now,
        nbf: now,
        jti: format!("jti-{sub}"),
        scope: "openid email".to_string(),
        email: format!("{sub}@example.com"),
        name: sub.to_string(),
        email_verified: true,
        perms: vec!["projects:read".to_string()],
        memberships: [("42".to_string(), "editor".to_string())].into(),
    }
}

pub fn sign_with(claims: &AccessTokenClaims, kid: &str, pem: &str) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    jsonwebtoken::encode(&header, claims, &key).unwrap()
}

pub fn sign(claims: &AccessTokenClaims) -> String {
    sign_with(claims, SIGNING_KID, SIGNING_PEM)
}

/// Key source whose published set can be swapped and whose fetches are counted.
pub struct CountingSource {
    keys: Mutex<JwkSet>,
    fetches: AtomicUsize,
    failing: Mutex<bool>,
}

impl CountingSource {
    pub fn new(keys: Vec<Jwk>) -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(JwkSet::new(keys)),
            fetches: AtomicUsize::new(0),
            failing: Mutex::new(false),
        })
    }

    pub fn publish(&self, keys: Vec<Jwk>) {
        *self.keys.lock().unwrap() = JwkSet::new(keys);
    }

    pub fn fail(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeySource for CountingSource {
    async fn fetch(&self) -> Result<JwkSet, GuardError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        // Widen the window for concurrent callers
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        if *self.failing.lock().unwrap() {
            return Err(GuardError::KeyFetch("connection refused".to_string()));
        }
        Ok(self.keys.lock().unwrap().clone())
    }
}
