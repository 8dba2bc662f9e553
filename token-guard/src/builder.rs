use std::sync::Arc;
use std::time::Duration;

use crate::error::GuardError;
use crate::jwks_cache::JwksCache;
use crate::key_source::{HttpKeySource, KeySource};
use crate::verifier::TokenVerifier;

const DEFAULT_LEEWAY_SECS: u64 = 30;
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
const DEFAULT_FORCED_REFRESHES_PER_MINUTE: u32 = 10;
const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Builder for [`TokenVerifier`].
///
/// # Example
/// ```no_run
/// use token_guard::TokenVerifierBuilder;
///
/// # fn build() -> Result<(), token_guard::GuardError> {
/// let verifier = TokenVerifierBuilder::new("https://auth.example.com")
///     .with_audience("dashboard")
///     .with_leeway(10)
///     .build_remote("https://auth.example.com/.well-known/jwks.json")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct TokenVerifierBuilder {
    issuer: String,
    audience: Option<String>,
    leeway: u64,
    cache_ttl: Duration,
    max_forced_refreshes: u32,
    fetch_timeout: Duration,
}

impl TokenVerifierBuilder {
    pub fn new(issuer: impl Into<String>) -> Self {
        Self {
            issuer: issuer.into(),
            audience: None,
            leeway: DEFAULT_LEEWAY_SECS,
            cache_ttl: DEFAULT_CACHE_TTL,
            max_forced_refreshes: DEFAULT_FORCED_REFRESHES_PER_MINUTE,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }

    /// Require `aud` to match. Without this the audience is not checked.
    pub fn with_audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    /// Clock skew tolerance in seconds for `exp` and `nbf`
    pub fn with_leeway(mut self, seconds: u64) -> Self {
        self.leeway = seconds;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_max_forced_refreshes_per_minute(mut self, max: u32) -> Self {
        self.max_forced_refreshes = max;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn build_with_source(self, source: Arc<dyn KeySource>) -> TokenVerifier {
        let keys = JwksCache::new(source, self.cache_ttl, self.max_forced_refreshes);
        TokenVerifier::new(self.issuer, self.audience, self.leeway, Arc::new(keys))
    }

    pub fn build_remote(self, jwks_url: impl Into<String>) -> Result<TokenVerifier, GuardError> {
        let source = HttpKeySource::new(jwks_url, self.fetch_timeout)?;
        Ok(self.build_with_source(Arc::new(source)))
    }
}
