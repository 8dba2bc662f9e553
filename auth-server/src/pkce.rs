//! Proof Key for Code Exchange (RFC 7636)

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodeChallengeMethod {
    S256,
    #[serde(rename = "plain")]
    Plain,
}

impl CodeChallengeMethod {
    /// Method for an authorization request. A challenge sent without a method is `plain`.
    pub fn from_request(method: Option<&str>) -> Result<Self, UnsupportedMethod> {
        match method {
            None | Some("") => Ok(Self::Plain),
            Some(value) => value.parse(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S256 => "S256",
            Self::Plain => "plain",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported code_challenge_method")]
pub struct UnsupportedMethod;

impl FromStr for CodeChallengeMethod {
    type Err = UnsupportedMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "S256" => Ok(Self::S256),
            "plain" => Ok(Self::Plain),
            _ => Err(UnsupportedMethod),
        }
    }
}

impl fmt::Display for CodeChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn challenge_from_verifier(verifier: &str, method: CodeChallengeMethod) -> String {
    match method {
        CodeChallengeMethod::S256 => URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes())),
        CodeChallengeMethod::Plain => verifier.to_string(),
    }
}

pub fn verify(verifier: &str, challenge: &str, method: CodeChallengeMethod) -> bool {
    challenge_from_verifier(verifier, method) == challenge
}

/// Like [`verify`] with the method as sent on the wire; unknown methods never verify.
pub fn verify_str(verifier: &str, challenge: &str, method: &str) -> bool {
    method
        .parse::<CodeChallengeMethod>()
        .map(|method| verify(verifier, challenge, method))
        .unwrap_or(false)
}

/// `code_verifier = 43*128unreserved`
pub fn is_valid_verifier(verifier: &str) -> bool {
    (MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&verifier.len())
        && verifier
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
}

/// Challenges share the verifier alphabet; S256 challenges are always 43 characters.
pub fn is_valid_challenge(challenge: &str) -> bool {
    is_valid_verifier(challenge)
}

/// A fresh 64-character verifier from the OS CSPRNG
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; 48];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    // RFC 7636 Appendix B
    const RFC_VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const RFC_CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    #[test]
    fn test_s256_matches_rfc_vector() {
        assert_eq!(
            challenge_from_verifier(RFC_VERIFIER, CodeChallengeMethod::S256),
            RFC_CHALLENGE
        );
        assert!(verify(RFC_VERIFIER, RFC_CHALLENGE, CodeChallengeMethod::S256));
    }

    #[test]
    fn test_plain_is_identity() {
        assert_eq!(
            challenge_from_verifier(RFC_VERIFIER, CodeChallengeMethod::Plain),
            RFC_VERIFIER
        );
        assert!(verify(RFC_VERIFIER, RFC_VERIFIER, CodeChallengeMethod::Plain));
        assert!(!verify(RFC_VERIFIER, RFC_CHALLENGE, CodeChallengeMethod::Plain));
    }

    #[test]
    fn test_any_mutation_fails() {
        for _ in 0..20 {
            let verifier = generate_code_verifier();
            let challenge = challenge_from_verifier(&verifier, CodeChallengeMethod::S256);
            assert!(verify(&verifier, &challenge, CodeChallengeMethod::S256));

            let mut mutated: Vec<u8> = verifier.clone().into_bytes();
            mutated[10] = if mutated[10] == b'A' { b'B' } else { b'A' };
            let mutated = String::from_utf8(mutated).unwrap();
            assert!(!verify(&mutated, &challenge, CodeChallengeMethod::S256));

            let truncated = &verifier[..verifier.len() - 1];
            assert!(!verify(truncated, &challenge, CodeChallengeMethod::S256));
        }
    }

    #[test]
    fn test_unknown_method_fails_closed() {
        assert!(verify_str(RFC_VERIFIER, RFC_CHALLENGE, "S256"));
        assert!(!verify_str(RFC_VERIFIER, RFC_CHALLENGE, "s256"));
        assert!(!verify_str(RFC_VERIFIER, RFC_VERIFIER, "PLAIN"));
        assert!(!verify_str(RFC_VERIFIER, RFC_CHALLENGE, "S512"));
        assert!(!verify_str(RFC_VERIFIER, RFC_CHALLENGE, ""));
    }

    #[test]
    fn test_method_from_request() {
        assert_eq!(
            CodeChallengeMethod::from_request(None),
            Ok(CodeChallengeMethod::Plain)
        );
        assert_eq!(
            CodeChallengeMethod::from_request(Some("S256")),
            Ok(CodeChallengeMethod::S256)
        );
        assert_eq!(
            CodeChallengeMethod::from_request(Some("md5")),
            Err(UnsupportedMethod)
        );
    }

    #[test]
    fn test_method_serde_uses_wire_names() {
        assert_eq!(
            serde_json::to_string(&CodeChallengeMethod::Plain).unwrap(),
            "\"plain\""
        );
        assert_eq!(
            serde_json::from_str::<CodeChallengeMethod>("\"S256\"").unwrap(),
            CodeChallengeMethod::S256
        );
    }

    #[test]
    fn test_verifier_syntax() {
        assert!(is_valid_verifier(RFC_VERIFIER));
        assert!(is_valid_verifier(&"a".repeat(43)));
        assert!(is_valid_verifier(&"~._-".repeat(32)));
        assert!(!is_valid_verifier(&"a".repeat(42)));
        assert!(!is_valid_verifier(&"a".repeat(129)));
        assert!(!is_valid_verifier(&format!("{}+", "a".repeat(43))));
        assert!(!is_valid_verifier(&format!("{} ", "a".repeat(43))));
    }

    #[test]
    fn test_generated_verifiers_are_valid_and_distinct() {
        let first = generate_code_verifier();
        let second = generate_code_verifier();
        assert_eq!(first.len(), 64);
        assert!(is_valid_verifier(&first));
        assert_ne!(first, second);
    }
}
