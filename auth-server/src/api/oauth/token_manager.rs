//! Authorization code and refresh token persistence.
//!
//! Codes and refresh tokens are only ever stored under a SHA-256 hash of their
//! value, so the store never holds a usable credential.

use crate::api::oauth::models::{ConsumedCode, StoredAuthorizationCode, StoredRefreshToken};
use crate::config::{CacheConfig, OAuthConfig};
use crate::pkce::{self, CodeChallengeMethod};
use crate::store::{Store, StoreBackend, StoreError};
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use log::{debug, warn};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const CODE_PREFIX: &str = "oauth_code:";
const CONSUMED_PREFIX: &str = "oauth_code_used:";
const REFRESH_PREFIX: &str = "oauth_refresh:";
const JTI_PREFIX: &str = "oauth_jti:";
const FAMILY_PREFIX: &str = "oauth_family:";

#[derive(Debug, Error)]
pub enum TokenError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Authorization code is invalid or expired")]
    CodeNotFound,
    #[error("Authorization code was already used")]
    CodeReplayed,
    #[error("Authorization code was issued to another client")]
    ClientMismatch,
    #[error("redirect_uri does not match the authorization request")]
    RedirectUriMismatch,
    #[error("PKCE verification failed: {0}")]
    Pkce(&'static str),
    #[error("Refresh token is invalid or expired")]
    RefreshTokenNotFound,
}

/// What the user approved, ready to be turned into a code
#[derive(Debug, Clone)]
pub struct CodeGrant {
    pub user_id: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: String,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<CodeChallengeMethod>,
    pub nonce: Option<String>,
    pub auth_time: i64,
}

#[derive(Debug, Clone)]
pub struct RedeemedCode {
    pub grant: StoredAuthorizationCode,
    /// Handle for [`TokenManager::link_refresh_to_code`]
    pub code_id: String,
}

#[derive(Debug, Clone)]
pub struct IssuedRefreshToken {
    pub token: String,
    pub id: String,
    pub record: StoredRefreshToken,
}

#[derive(Debug, Clone)]
pub struct RefreshOutcome {
    pub record: StoredRefreshToken,
    /// Id of the token that was presented
    pub presented_id: String,
    /// Replacement token when rotation is enabled
    pub rotated: Option<IssuedRefreshToken>,
}

#[derive(Clone)]
pub struct TokenManager {
    /// Live authorization codes
    codes: Store,
    /// Refresh tokens, consumed-code tombstones and the live refresh token of
    /// each code's rotation chain. Tombstones outlive the code so a late
    /// replay can still revoke the chain.
    grants: Store,
    /// Access token id -> refresh token id
    links: Store,
    code_ttl: i64,
    refresh_ttl: i64,
    rotate_refresh_tokens: bool,
}

impl TokenManager {
    pub fn new(codes: Store, grants: Store, links: Store, config: &OAuthConfig) -> Self {
        Self {
            codes,
            grants,
            links,
            code_ttl: to_secs(config.code_ttl),
            refresh_ttl: to_secs(config.refresh_token_ttl),
            rotate_refresh_tokens: config.rotate_refresh_tokens,
        }
    }

    pub async fn from_config(cache: &CacheConfig, oauth: &OAuthConfig) -> Result<Self, StoreError> {
        let codes = Store::create(cache, oauth.code_ttl).await?;
        let grants = Store::create(cache, oauth.refresh_token_ttl.max(oauth.code_ttl)).await?;
        let links = Store::create(cache, oauth.access_token_ttl).await?;
        Ok(Self::new(codes, grants, links, oauth))
    }

    pub async fn health_check(&self) -> Result<(), String> {
        self.codes.health_check().await
    }

    /// Mints a single-use authorization code for an approved request
    pub async fn issue_code(&self, grant: CodeGrant) -> Result<String, TokenError> {
        let code = generate_secure_token();
        let now = now();
        let record = StoredAuthorizationCode {
            user_id: grant.user_id,
            client_id: grant.client_id,
            redirect_uri: grant.redirect_uri,
            scope: grant.scope,
            code_challenge: grant.code_challenge,
            code_challenge_method: grant.code_challenge_method,
            nonce: grant.nonce,
            auth_time: grant.auth_time,
            issued_at: now,
            expires_at: now + self.code_ttl,
        };

        self.codes.set(&storage_key(CODE_PREFIX, &code), &record).await?;
        debug!(
            "Issued authorization code for user '{}' via client '{}', expires in {}s",
            record.user_id, record.client_id, self.code_ttl
        );
        Ok(code)
    }

    /// Redeems an authorization code.
    ///
    /// The code is removed from the store before anything else is checked, so it
    /// is spent even if a later check fails or the caller never gets a response.
    /// A second redemption finds the tombstone and revokes whatever the first one
    /// produced.
    pub async fn redeem_code(
        &self,
        code: &str,
        client_id: &str,
        redirect_uri: &str,
        code_verifier: Option<&str>,
    ) -> Result<RedeemedCode, TokenError> {
        let code_id = token_id(code);
        let taken: Option<StoredAuthorizationCode> = self
            .codes
            .take(&format!("{CODE_PREFIX}{code_id}"))
            .await?;

        let Some(grant) = taken else {
            self.handle_replay(&code_id).await?;
            return Err(TokenError::CodeNotFound);
        };

        let tombstone = ConsumedCode {
            client_id: grant.client_id.clone(),
            replayed: false,
        };
        self.grants
            .set(&format!("{CONSUMED_PREFIX}{code_id}"), &tombstone)
            .await?;

        if now() >= grant.expires_at {
            return Err(TokenError::CodeNotFound);
        }
        if grant.client_id != client_id {
            warn!("Authorization code presented by a different client '{}'", client_id);
            return Err(TokenError::ClientMismatch);
        }
        if grant.redirect_uri != redirect_uri {
            return Err(TokenError::RedirectUriMismatch);
        }
        check_pkce(&grant, code_verifier)?;

        debug!(
            "Redeemed authorization code for user '{}' via client '{}'",
            grant.user_id, grant.client_id
        );
        Ok(RedeemedCode { grant, code_id })
    }

    async fn handle_replay(&self, code_id: &str) -> Result<(), TokenError> {
        let key = format!("{CONSUMED_PREFIX}{code_id}");
        let Some(mut tombstone) = self.grants.get::<ConsumedCode>(&key).await? else {
            return Ok(());
        };

        warn!(
            "Authorization code for client '{}' was presented again, revoking derived tokens",
            tombstone.client_id
        );
        // Marked before the chain is read; rotation checks the mark after
        // moving the chain forward, so one of the two always sees the other
        tombstone.replayed = true;
        self.grants.set(&key, &tombstone).await?;
        self.revoke_family(code_id).await?;
        Err(TokenError::CodeReplayed)
    }

    async fn revoke_family(&self, family_id: &str) -> Result<(), TokenError> {
        let current: Option<String> = self
            .grants
            .take(&format!("{FAMILY_PREFIX}{family_id}"))
            .await?;
        if let Some(refresh_id) = current {
            self.revoke_refresh_token_id(&refresh_id).await?;
        }
        Ok(())
    }

    async fn family_replayed(&self, family_id: &str) -> Result<bool, TokenError> {
        let tombstone: Option<ConsumedCode> = self
            .grants
            .get(&format!("{CONSUMED_PREFIX}{family_id}"))
            .await?;
        Ok(tombstone.is_some_and(|tombstone| tombstone.replayed))
    }

    /// Makes a freshly issued refresh token the head of the code's rotation
    /// chain. If the code was replayed in the meantime the token is revoked
    /// straight away.
    pub async fn link_refresh_to_code(
        &self,
        code_id: &str,
        refresh_token_id: &str,
    ) -> Result<(), TokenError> {
        let key = format!("{REFRESH_PREFIX}{refresh_token_id}");
        if let Some(mut record) = self.grants.get::<StoredRefreshToken>(&key).await? {
            record.family_id = Some(code_id.to_string());
            self.grants.set(&key, &record).await?;
        }
        self.grants
            .set(&format!("{FAMILY_PREFIX}{code_id}"), &refresh_token_id)
            .await?;

        if self.family_replayed(code_id).await? {
            self.revoke_family(code_id).await?;
            self.revoke_refresh_token_id(refresh_token_id).await?;
            return Err(TokenError::CodeReplayed);
        }
        Ok(())
    }

    pub async fn issue_refresh_token(
        &self,
        user_id: &str,
        client_id: &str,
        scope: &str,
        auth_time: i64,
    ) -> Result<IssuedRefreshToken, TokenError> {
        let now = now();
        let record = StoredRefreshToken {
            user_id: user_id.to_string(),
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            auth_time,
            issued_at: now,
            expires_at: now + self.refresh_ttl,
            family_id: None,
        };
        self.store_refresh_token(record).await
    }

    async fn store_refresh_token(
        &self,
        record: StoredRefreshToken,
    ) -> Result<IssuedRefreshToken, TokenError> {
        let token = generate_secure_token();
        let id = token_id(&token);
        self.grants
            .set(&format!("{REFRESH_PREFIX}{id}"), &record)
            .await?;
        Ok(IssuedRefreshToken { token, id, record })
    }

    /// Looks up a live refresh token
    pub async fn find_refresh_token(
        &self,
        token: &str,
    ) -> Result<Option<StoredRefreshToken>, TokenError> {
        let record: Option<StoredRefreshToken> = self
            .grants
            .get(&storage_key(REFRESH_PREFIX, token))
            .await?;
        Ok(record.filter(|record| now() < record.expires_at))
    }

    /// Exchanges a refresh token. With rotation enabled the presented token is
    /// retired atomically and a replacement with the same absolute expiry is issued.
    pub async fn rotate_refresh_token(
        &self,
        token: &str,
        client_id: &str,
    ) -> Result<RefreshOutcome, TokenError> {
        let presented_id = token_id(token);
        let key = format!("{REFRESH_PREFIX}{presented_id}");

        let record = self
            .find_refresh_token(token)
            .await?
            .ok_or(TokenError::RefreshTokenNotFound)?;
        if record.client_id != client_id {
            warn!("Refresh token presented by a different client '{}'", client_id);
            return Err(TokenError::RefreshTokenNotFound);
        }

        if !self.rotate_refresh_tokens {
            return Ok(RefreshOutcome {
                record,
                presented_id,
                rotated: None,
            });
        }

        // Only one concurrent refresh gets to retire the token
        let record: StoredRefreshToken = self
            .grants
            .take(&key)
            .await?
            .ok_or(TokenError::RefreshTokenNotFound)?;
        let mut successor = record.clone();
        successor.issued_at = now();
        let rotated = self.store_refresh_token(successor).await?;

        if let Some(family_id) = &record.family_id {
            self.grants
                .set(&format!("{FAMILY_PREFIX}{family_id}"), &rotated.id)
                .await?;
            if self.family_replayed(family_id).await? {
                warn!("Refresh token chain of a replayed authorization code, revoking");
                self.revoke_family(family_id).await?;
                self.revoke_refresh_token_id(&rotated.id).await?;
                return Err(TokenError::RefreshTokenNotFound);
            }
        }

        debug!(
            "Rotated refresh token for user '{}' via client '{}'",
            record.user_id, record.client_id
        );
        Ok(RefreshOutcome {
            record,
            presented_id,
            rotated: Some(rotated),
        })
    }

    pub async fn revoke_refresh_token(&self, token: &str) -> Result<(), TokenError> {
        self.revoke_refresh_token_id(&token_id(token)).await
    }

    pub async fn revoke_refresh_token_id(&self, id: &str) -> Result<(), TokenError> {
        self.grants.delete(&format!("{REFRESH_PREFIX}{id}")).await?;
        debug!("Revoked refresh token");
        Ok(())
    }

    /// Remembers which refresh token an access token was minted alongside
    pub async fn link_access_token(
        &self,
        jti: &str,
        refresh_token_id: &str,
    ) -> Result<(), TokenError> {
        self.links
            .set(&format!("{JTI_PREFIX}{jti}"), &refresh_token_id)
            .await?;
        Ok(())
    }

    /// Revokes the refresh token linked to an access token. The access token
    /// itself stays valid until it expires.
    pub async fn revoke_by_access_jti(&self, jti: &str) -> Result<bool, TokenError> {
        let key = format!("{JTI_PREFIX}{jti}");
        let Some(refresh_id) = self.links.take::<String>(&key).await? else {
            return Ok(false);
        };
        self.revoke_refresh_token_id(&refresh_id).await?;
        Ok(true)
    }
}

fn check_pkce(
    grant: &StoredAuthorizationCode,
    code_verifier: Option<&str>,
) -> Result<(), TokenError> {
    match (&grant.code_challenge, code_verifier) {
        (None, None) => Ok(()),
        (None, Some(_)) => Err(TokenError::Pkce(
            "code_verifier sent but no code_challenge was registered",
        )),
        (Some(_), None) => Err(TokenError::Pkce("code_verifier is required")),
        (Some(challenge), Some(verifier)) => {
            if !pkce::is_valid_verifier(verifier) {
                return Err(TokenError::Pkce("code_verifier is malformed"));
            }
            let method = grant
                .code_challenge_method
                .unwrap_or(CodeChallengeMethod::Plain);
            if pkce::verify(verifier, challenge, method) {
                Ok(())
            } else {
                Err(TokenError::Pkce("code_verifier does not match code_challenge"))
            }
        }
    }
}

/// Storage id of a code or refresh token
pub fn token_id(raw: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(raw.as_bytes()))
}

fn storage_key(prefix: &str, raw: &str) -> String {
    format!("{prefix}{}", token_id(raw))
}

/// 32 random bytes (256 bits), base64url without padding
fn generate_secure_token() -> String {
    let mut bytes = [0u8; 32];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn to_secs(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REDIRECT: &str = "https://app.example/cb";
    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn config(rotate: bool) -> OAuthConfig {
        OAuthConfig {
            code_ttl: 600,
            access_token_ttl: 900,
            refresh_token_ttl: 3600,
            rotate_refresh_tokens: rotate,
            clients_file: None,
            scopes: "openid".to_string(),
        }
    }

    fn manager_with(config: OAuthConfig) -> TokenManager {
        TokenManager::new(
            Store::in_memory(config.code_ttl),
            Store::in_memory(config.refresh_token_ttl),
            Store::in_memory(config.access_token_ttl),
            &config,
        )
    }

    fn manager() -> TokenManager {
        manager_with(config(true))
    }

    fn grant(challenge: Option<(&str, CodeChallengeMethod)>) -> CodeGrant {
        CodeGrant {
            user_id: "7".to_string(),
            client_id: "c1".to_string(),
            redirect_uri: REDIRECT.to_string(),
            scope: "openid email".to_string(),
            code_challenge: challenge.map(|(c, _)| c.to_string()),
            code_challenge_method: challenge.map(|(_, m)| m),
            nonce: Some("n-1".to_string()),
            auth_time: 1_700_000_000,
        }
    }

    fn s256() -> Option<(&'static str, CodeChallengeMethod)> {
        Some((CHALLENGE, CodeChallengeMethod::S256))
    }

    #[tokio::test]
    async fn test_issue_and_redeem_code() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        assert_eq!(code.len(), 43);

        let redeemed = manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .unwrap();
        assert_eq!(redeemed.grant.user_id, "7");
        assert_eq!(redeemed.grant.scope, "openid email");
        assert_eq!(redeemed.grant.nonce.as_deref(), Some("n-1"));
        assert_eq!(redeemed.code_id, token_id(&code));
    }

    #[tokio::test]
    async fn test_code_is_single_use() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();

        manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some(VERIFIER)).await,
            Err(TokenError::CodeReplayed)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_redemption_has_one_winner() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        let successes = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let manager = manager.clone();
            let code = code.clone();
            let successes = successes.clone();
            tasks.push(tokio::spawn(async move {
                if manager
                    .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
                    .await
                    .is_ok()
                {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_redemption_still_burns_code() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();

        assert!(matches!(
            manager
                .redeem_code(&code, "c1", "https://app.example/cb/", Some(VERIFIER))
                .await,
            Err(TokenError::RedirectUriMismatch)
        ));
        assert!(manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_client_mismatch() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c2", REDIRECT, Some(VERIFIER)).await,
            Err(TokenError::ClientMismatch)
        ));
    }

    #[tokio::test]
    async fn test_unknown_code() {
        assert!(matches!(
            manager().redeem_code("nope", "c1", REDIRECT, None).await,
            Err(TokenError::CodeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_expired_code() {
        let mut short = config(true);
        short.code_ttl = 0;
        let manager = TokenManager::new(
            Store::in_memory(60),
            Store::in_memory(60),
            Store::in_memory(60),
            &short,
        );
        let code = manager.issue_code(grant(None)).await.unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, None).await,
            Err(TokenError::CodeNotFound)
        ));
    }

    #[tokio::test]
    async fn test_pkce_rules() {
        let manager = manager();

        let code = manager.issue_code(grant(s256())).await.unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, None).await,
            Err(TokenError::Pkce(_))
        ));

        let code = manager.issue_code(grant(s256())).await.unwrap();
        let wrong = "a".repeat(43);
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some(&wrong)).await,
            Err(TokenError::Pkce(_))
        ));

        let code = manager.issue_code(grant(s256())).await.unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some("short")).await,
            Err(TokenError::Pkce("code_verifier is malformed"))
        ));

        let code = manager.issue_code(grant(None)).await.unwrap();
        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some(VERIFIER)).await,
            Err(TokenError::Pkce(_))
        ));

        let code = manager
            .issue_code(grant(Some((VERIFIER, CodeChallengeMethod::Plain))))
            .await
            .unwrap();
        assert!(manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_pkce_error_does_not_echo_verifier() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        let verifier = "z".repeat(50);
        let err = manager
            .redeem_code(&code, "c1", REDIRECT, Some(&verifier))
            .await
            .unwrap_err();
        let message = err.to_string();
        assert!(!message.contains(&verifier));
        assert!(!message.contains("50"));
    }

    #[tokio::test]
    async fn test_replay_revokes_linked_refresh_token() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        let redeemed = manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .unwrap();

        let refresh = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        manager
            .link_refresh_to_code(&redeemed.code_id, &refresh.id)
            .await
            .unwrap();
        assert!(manager.find_refresh_token(&refresh.token).await.unwrap().is_some());

        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some(VERIFIER)).await,
            Err(TokenError::CodeReplayed)
        ));
        assert!(manager.find_refresh_token(&refresh.token).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_replay_before_link_revokes_on_link() {
        let manager = manager();
        let code = manager.issue_code(grant(s256())).await.unwrap();
        let redeemed = manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .unwrap();
        assert!(manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .is_err());

        let refresh = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        assert!(matches!(
            manager.link_refresh_to_code(&redeemed.code_id, &refresh.id).await,
            Err(TokenError::CodeReplayed)
        ));
        assert!(manager.find_refresh_token(&refresh.token).await.unwrap().is_none());
    }

    async fn redeem_and_link(manager: &TokenManager) -> (String, IssuedRefreshToken) {
        let code = manager.issue_code(grant(s256())).await.unwrap();
        let redeemed = manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .unwrap();
        let refresh = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        manager
            .link_refresh_to_code(&redeemed.code_id, &refresh.id)
            .await
            .unwrap();
        (code, refresh)
    }

    #[tokio::test]
    async fn test_replay_revokes_rotated_successors() {
        let manager = manager();
        let (code, refresh) = redeem_and_link(&manager).await;

        let first = manager
            .rotate_refresh_token(&refresh.token, "c1")
            .await
            .unwrap()
            .rotated
            .unwrap();
        let second = manager
            .rotate_refresh_token(&first.token, "c1")
            .await
            .unwrap()
            .rotated
            .unwrap();
        assert_eq!(second.record.family_id, Some(token_id(&code)));

        assert!(matches!(
            manager.redeem_code(&code, "c1", REDIRECT, Some(VERIFIER)).await,
            Err(TokenError::CodeReplayed)
        ));
        assert!(manager.find_refresh_token(&second.token).await.unwrap().is_none());
        assert!(matches!(
            manager.rotate_refresh_token(&second.token, "c1").await,
            Err(TokenError::RefreshTokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_rotation_after_replay_yields_nothing() {
        let manager = manager_with(config(false));
        let (code, refresh) = redeem_and_link(&manager).await;

        assert!(manager
            .redeem_code(&code, "c1", REDIRECT, Some(VERIFIER))
            .await
            .is_err());
        assert!(matches!(
            manager.rotate_refresh_token(&refresh.token, "c1").await,
            Err(TokenError::RefreshTokenNotFound)
        ));
    }

    #[tokio::test]
    async fn test_tokens_outside_a_code_chain_rotate_freely() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        assert!(issued.record.family_id.is_none());
        let rotated = manager
            .rotate_refresh_token(&issued.token, "c1")
            .await
            .unwrap()
            .rotated
            .unwrap();
        assert!(rotated.record.family_id.is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotation_retires_old_token() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid email", 10)
            .await
            .unwrap();

        let outcome = manager
            .rotate_refresh_token(&issued.token, "c1")
            .await
            .unwrap();
        let rotated = outcome.rotated.expect("rotation is enabled");
        assert_ne!(rotated.token, issued.token);
        assert_eq!(rotated.record.expires_at, issued.record.expires_at);
        assert_eq!(outcome.record.scope, "openid email");
        assert_eq!(outcome.presented_id, issued.id);

        assert!(matches!(
            manager.rotate_refresh_token(&issued.token, "c1").await,
            Err(TokenError::RefreshTokenNotFound)
        ));
        assert!(manager.rotate_refresh_token(&rotated.token, "c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_refresh_has_one_winner() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        let successes = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            let token = issued.token.clone();
            let successes = successes.clone();
            tasks.push(tokio::spawn(async move {
                if manager.rotate_refresh_token(&token, "c1").await.is_ok() {
                    successes.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(successes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_token() {
        let manager = manager_with(config(false));
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();

        let outcome = manager.rotate_refresh_token(&issued.token, "c1").await.unwrap();
        assert!(outcome.rotated.is_none());
        assert!(manager.rotate_refresh_token(&issued.token, "c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_token_bound_to_client() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();

        assert!(matches!(
            manager.rotate_refresh_token(&issued.token, "c2").await,
            Err(TokenError::RefreshTokenNotFound)
        ));
        assert!(manager.rotate_refresh_token(&issued.token, "c1").await.is_ok());
    }

    #[tokio::test]
    async fn test_revoke_by_access_jti() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        manager.link_access_token("jti-1", &issued.id).await.unwrap();

        assert!(manager.revoke_by_access_jti("jti-1").await.unwrap());
        assert!(manager.find_refresh_token(&issued.token).await.unwrap().is_none());
        assert!(!manager.revoke_by_access_jti("jti-1").await.unwrap());
        assert!(!manager.revoke_by_access_jti("unknown").await.unwrap());
    }

    #[tokio::test]
    async fn test_revoke_refresh_token() {
        let manager = manager();
        let issued = manager
            .issue_refresh_token("7", "c1", "openid", 0)
            .await
            .unwrap();
        manager.revoke_refresh_token(&issued.token).await.unwrap();
        assert!(manager.find_refresh_token(&issued.token).await.unwrap().is_none());
    }
}
