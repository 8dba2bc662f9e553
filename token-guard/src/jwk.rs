use jsonwebtoken::DecodingKey;
use serde::{Deserialize, Serialize};

use crate::error::GuardError;

/// A single public key in JWK form. Only RSA signing keys are usable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use", default)]
    pub key_use: String,
    pub kid: String,
    #[serde(default)]
    pub alg: String,
    /// Base64url modulus
    #[serde(default)]
    pub n: String,
    /// Base64url exponent
    #[serde(default)]
    pub e: String,
}

impl Jwk {
    pub fn rsa_signing(kid: impl Into<String>, n: impl Into<String>, e: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            kid: kid.into(),
            alg: "RS256".to_string(),
            n: n.into(),
            e: e.into(),
        }
    }

    pub fn decoding_key(&self) -> Result<DecodingKey, GuardError> {
        if self.kty != "RSA" {
            return Err(GuardError::InvalidKey(format!(
                "unsupported key type '{}' for kid '{}'",
                self.kty, self.kid
            )));
        }
        if !self.alg.is_empty() && self.alg != "RS256" {
            return Err(GuardError::InvalidKey(format!(
                "unsupported algorithm '{}' for kid '{}'",
                self.alg, self.kid
            )));
        }
        DecodingKey::from_rsa_components(&self.n, &self.e)
            .map_err(|e| GuardError::InvalidKey(e.to_string()))
    }
}

/// The published key set, `{"keys": [...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    pub fn new(keys: Vec<Jwk>) -> Self {
        Self { keys }
    }

    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|key| key.kid == kid)
    }

    pub fn contains(&self, kid: &str) -> bool {
        self.find(kid).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[test]
    fn test_serializes_use_field() {
        let jwk = testing::signing_jwk();
        let value = serde_json::to_value(&jwk).unwrap();
        assert_eq!(value["use"], "sig");
        assert_eq!(value["kty"], "RSA");
        assert_eq!(value["alg"], "RS256");
        assert_eq!(value["kid"], testing::SIGNING_KID);
        assert!(value.get("key_use").is_none());
    }

    #[test]
    fn test_find_by_kid() {
        let set = JwkSet::new(vec![testing::signing_jwk(), testing::rotated_jwk()]);
        assert_eq!(set.find(testing::ROTATED_KID).unwrap().n, testing::ROTATED_N);
        assert!(set.find("missing").is_none());
    }

    #[test]
    fn test_rejects_non_rsa_keys() {
        let set: JwkSet = serde_json::from_value(serde_json::json!({
            "keys": [{"kty": "EC", "kid": "ec-1", "crv": "P-256", "x": "abc", "y": "def"}]
        }))
        .unwrap();
        let err = set.find("ec-1").unwrap().decoding_key().err().unwrap();
        assert!(matches!(err, GuardError::InvalidKey(_)));
    }

    #[test]
    fn test_builds_decoding_key() {
        assert!(testing::signing_jwk().decoding_key().is_ok());
    }
}
