//! Email one-time passwords.
//!
//! Codes are six digits, stored only as a salted SHA-256 hash keyed by a hash of
//! the email address, and die after `otp_ttl` seconds or `otp_max_attempts`
//! wrong guesses, whichever comes first. An address gets at most
//! `otp_max_issues` codes per `otp_issue_window`, and a replacement code
//! inherits the wrong guesses of the one it replaces.

use super::LoginError;
use crate::config::LoginConfig;
use crate::store::{Store, StoreBackend};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use log::{debug, info, warn};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use subtle::ConstantTimeEq;

const OTP_PREFIX: &str = "otp:";
const QUOTA_PREFIX: &str = "otp_quota:";
const CODE_DIGITS: usize = 6;

/// Delivers a freshly issued code to its owner
#[async_trait]
pub trait OtpSender: Send + Sync {
    async fn send(&self, email: &str, code: &str) -> Result<(), LoginError>;
}

/// Records that a code went out without revealing it or its recipient.
/// Stands in for real email delivery, which lives outside this server.
#[derive(Debug, Default)]
pub struct LoggingOtpSender;

#[async_trait]
impl OtpSender for LoggingOtpSender {
    async fn send(&self, _email: &str, _code: &str) -> Result<(), LoginError> {
        info!("One-time password issued");
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OtpRecord {
    user_id: String,
    salt: String,
    code_hash: String,
    attempts: u32,
    expires_at: i64,
}

/// Codes requested for one address in the current window
#[derive(Debug, Clone, Serialize, Deserialize)]
struct IssueQuota {
    issued: u32,
    window_ends: i64,
}

#[derive(Clone)]
pub struct OtpManager {
    codes: Store,
    quotas: Store,
    ttl: i64,
    max_attempts: u32,
    max_issues: u32,
    issue_window: i64,
    sender: Arc<dyn OtpSender>,
}

impl OtpManager {
    /// `quotas` should keep entries for at least `otp_issue_window` seconds
    pub fn new(
        codes: Store,
        quotas: Store,
        config: &LoginConfig,
        sender: Arc<dyn OtpSender>,
    ) -> Self {
        Self {
            codes,
            quotas,
            ttl: to_secs(config.otp_ttl),
            max_attempts: config.otp_max_attempts.max(1),
            max_issues: config.otp_max_issues.max(1),
            issue_window: to_secs(config.otp_issue_window),
            sender,
        }
    }

    /// Counts a code request against the address and, when `user_id` is
    /// known, issues a code and hands it to the sender. Unknown addresses use
    /// up the same quota so the limit does not reveal which accounts exist.
    /// A new code replaces any outstanding one for the same address.
    pub async fn issue(&self, email: &str, user_id: Option<&str>) -> Result<(), LoginError> {
        let key = storage_key(OTP_PREFIX, email);
        self.count_issue(email).await?;
        let Some(user_id) = user_id else {
            return Ok(());
        };

        let now = chrono::Utc::now().timestamp();
        let inherited = self
            .codes
            .get::<OtpRecord>(&key)
            .await?
            .filter(|previous| now < previous.expires_at)
            .map_or(0, |previous| previous.attempts);

        let code = generate_code();
        let salt = crate::session::generate_token();
        let record = OtpRecord {
            user_id: user_id.to_string(),
            code_hash: hash_code(&salt, &code),
            salt,
            attempts: inherited,
            expires_at: now + self.ttl,
        };

        self.codes.set(&key, &record).await?;
        self.sender.send(email, &code).await
    }

    async fn count_issue(&self, email: &str) -> Result<(), LoginError> {
        let key = storage_key(QUOTA_PREFIX, email);
        let now = chrono::Utc::now().timestamp();
        let mut quota = self
            .quotas
            .get::<IssueQuota>(&key)
            .await?
            .filter(|quota| now < quota.window_ends)
            .unwrap_or(IssueQuota {
                issued: 0,
                window_ends: now.saturating_add(self.issue_window),
            });

        if quota.issued >= self.max_issues {
            warn!("One-time password request refused, issue limit reached");
            return Err(LoginError::TooManyCodes);
        }
        quota.issued += 1;
        self.quotas.set(&key, &quota).await?;
        Ok(())
    }

    /// Checks a code and returns the user it was issued for. The record is
    /// taken out of the store while it is checked, so concurrent guesses
    /// cannot share an attempt.
    pub async fn verify(&self, email: &str, code: &str) -> Result<String, LoginError> {
        let key = storage_key(OTP_PREFIX, email);
        let Some(mut record) = self.codes.take::<OtpRecord>(&key).await? else {
            debug!("No outstanding one-time password for this address");
            return Err(LoginError::InvalidCode);
        };

        if chrono::Utc::now().timestamp() >= record.expires_at {
            debug!("One-time password has expired");
            return Err(LoginError::InvalidCode);
        }

        let presented = code.trim();
        let well_formed =
            presented.len() == CODE_DIGITS && presented.bytes().all(|b| b.is_ascii_digit());
        if well_formed && record.attempts < self.max_attempts {
            let expected = record.code_hash.as_bytes();
            let actual = hash_code(&record.salt, presented);
            if bool::from(actual.as_bytes().ct_eq(expected)) {
                return Ok(record.user_id);
            }
        }

        record.attempts += 1;
        if record.attempts < self.max_attempts {
            self.codes.set(&key, &record).await?;
        } else {
            warn!("One-time password discarded after {} wrong attempts", record.attempts);
        }
        Err(LoginError::InvalidCode)
    }
}

fn to_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn storage_key(prefix: &str, email: &str) -> String {
    let digest = Sha256::digest(crate::users::normalize_email(email).as_bytes());
    format!("{prefix}{}", URL_SAFE_NO_PAD.encode(digest))
}

fn hash_code(salt: &str, code: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(b":");
    hasher.update(code.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

fn generate_code() -> String {
    let value: u32 = rand::rngs::OsRng.gen_range(0..1_000_000);
    format!("{value:06}")
}
