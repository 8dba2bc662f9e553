use confique::Config;

/// Signing keys and published key set
#[derive(Debug, Config, Clone)]
pub struct KeysConfig {
    /// PEM file holding the active RSA private key (PKCS#8 or PKCS#1)
    #[config(env = "AUTH_KEYS_SIGNING_KEY_PATH", default = "keys/signing_key.pem")]
    pub signing_key_path: String,

    /// Key id published for the active key
    #[config(env = "AUTH_KEYS_SIGNING_KID", default = "default")]
    pub signing_kid: String,

    /// JWKS file with retired public keys still accepted during a rotation window
    #[config(env = "AUTH_KEYS_RETIRED_JWKS_PATH")]
    pub retired_jwks_path: Option<String>,

    /// Validate tokens against this remote key set instead of the local keys
    #[config(env = "AUTH_KEYS_REMOTE_JWKS_URL")]
    pub remote_jwks_url: Option<String>,

    /// Key set cache lifetime in seconds, also the public max-age (default: 300)
    #[config(env = "AUTH_KEYS_JWKS_CACHE_TTL", default = 300)]
    pub jwks_cache_ttl: u64,

    /// Upper bound on forced key set refreshes per minute (default: 10)
    #[config(env = "AUTH_KEYS_MAX_FORCED_REFRESHES_PER_MINUTE", default = 10)]
    pub max_forced_refreshes_per_minute: u32,

    /// Remote key set fetch timeout in seconds (default: 5)
    #[config(env = "AUTH_KEYS_FETCH_TIMEOUT", default = 5)]
    pub fetch_timeout: u64,

    /// Clock skew tolerance for exp/nbf in seconds (default: 30)
    #[config(env = "AUTH_KEYS_LEEWAY", default = 30)]
    pub leeway: u64,
}
