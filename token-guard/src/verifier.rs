use std::sync::Arc;

use jsonwebtoken::errors::{Error as JwtError, ErrorKind};
use jsonwebtoken::{Algorithm, Validation};
use log::debug;
use serde::de::DeserializeOwned;

use crate::builder::TokenVerifierBuilder;
use crate::claims::AccessTokenClaims;
use crate::error::GuardError;
use crate::jwk::JwkSet;
use crate::jwks_cache::JwksCache;

/// Validates RS256 tokens against the published key set.
///
/// A token whose key id is unknown, or whose signature fails against the
/// cached key, triggers one forced refresh of the set and one retry. That
/// covers key rotation without restarting the service.
pub struct TokenVerifier {
    issuer: String,
    audience: Option<String>,
    leeway: u64,
    keys: Arc<JwksCache>,
}

impl TokenVerifier {
    pub(crate) fn new(
        issuer: String,
        audience: Option<String>,
        leeway: u64,
        keys: Arc<JwksCache>,
    ) -> Self {
        Self {
            issuer,
            audience,
            leeway,
            keys,
        }
    }

    pub fn builder(issuer: impl Into<String>) -> TokenVerifierBuilder {
        TokenVerifierBuilder::new(issuer)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    pub fn keys(&self) -> &Arc<JwksCache> {
        &self.keys
    }

    pub async fn verify(&self, token: &str) -> Result<AccessTokenClaims, GuardError> {
        self.verify_claims(token).await
    }

    /// Like [`verify`](Self::verify) but for any claims shape.
    pub async fn verify_claims<T: DeserializeOwned>(&self, token: &str) -> Result<T, GuardError> {
        self.verify_inner(token, true).await
    }

    /// Checks signature, issuer and audience but accepts an expired token.
    /// Used where the caller only needs to know who issued what, such as revocation.
    pub async fn verify_allowing_expired(
        &self,
        token: &str,
    ) -> Result<AccessTokenClaims, GuardError> {
        self.verify_inner(token, false).await
    }

    async fn verify_inner<T: DeserializeOwned>(
        &self,
        token: &str,
        validate_exp: bool,
    ) -> Result<T, GuardError> {
        let kid = key_id(token)?;
        let keys = self.keys.get().await?;

        match self.decode(token, &keys, &kid, validate_exp) {
            Err(err @ (GuardError::UnknownKeyId | GuardError::InvalidSignature)) => {
                debug!("Token with kid '{}' failed ({}), refreshing key set", kid, err);
                match self.keys.force_refresh().await? {
                    Some(fresh) => self.decode(token, &fresh, &kid, validate_exp),
                    None => Err(err),
                }
            }
            result => result,
        }
    }

    fn decode<T: DeserializeOwned>(
        &self,
        token: &str,
        keys: &JwkSet,
        kid: &str,
        validate_exp: bool,
    ) -> Result<T, GuardError> {
        let jwk = keys.find(kid).ok_or(GuardError::UnknownKeyId)?;
        let key = jwk.decoding_key()?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_issuer(&[self.issuer.as_str()]);
        match &self.audience {
            Some(audience) => validation.set_audience(&[audience.as_str()]),
            None => validation.validate_aud = false,
        }
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = self.leeway;
        validation.validate_nbf = true;
        validation.validate_exp = validate_exp;

        jsonwebtoken::decode::<T>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(classify)
    }
}

fn key_id(token: &str) -> Result<String, GuardError> {
    let header = jsonwebtoken::decode_header(token).map_err(|_| GuardError::Malformed)?;
    if header.alg != Algorithm::RS256 {
        return Err(GuardError::Malformed);
    }
    header
        .kid
        .filter(|kid| !kid.is_empty())
        .ok_or(GuardError::Malformed)
}

fn classify(err: JwtError) -> GuardError {
    match err.kind() {
        ErrorKind::ExpiredSignature => GuardError::Expired,
        ErrorKind::InvalidSignature => GuardError::InvalidSignature,
        ErrorKind::InvalidIssuer => GuardError::InvalidClaims("issuer mismatch".to_string()),
        ErrorKind::InvalidAudience => GuardError::InvalidClaims("audience mismatch".to_string()),
        ErrorKind::ImmatureSignature => GuardError::InvalidClaims("not yet valid".to_string()),
        ErrorKind::MissingRequiredClaim(claim) => {
            GuardError::InvalidClaims(format!("missing claim '{claim}'"))
        }
        ErrorKind::InvalidRsaKey(_) | ErrorKind::InvalidKeyFormat => {
            GuardError::InvalidKey(err.to_string())
        }
        _ => GuardError::Malformed,
    }
}
