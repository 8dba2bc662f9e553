use confique::Config;
use serde::Deserialize;

/// Specifies which store implementation backs codes, refresh tokens and one-time passwords
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub enum CacheStore {
    /// Process-local; codes do not survive a restart and are not shared between instances
    InMemory,
    Redis,
}

/// Configuration for the storage subsystem
#[derive(Debug, Config, Clone)]
pub struct CacheConfig {
    /// Store type: "in-memory" (default) or "redis"
    #[config(env = "AUTH_CACHE_STORE", default = "in-memory")]
    pub store: CacheStore,

    /// In-memory capacity per store in MiB (default: 64)
    #[config(env = "AUTH_CACHE_CAPACITY_MIB", default = 64)]
    pub capacity_mib: usize,

    /// Redis connection string
    #[config(env = "AUTH_CACHE_REDIS_URL", default = "")]
    pub redis_url: String,

    /// Prefix for every Redis key written by this server
    #[config(env = "AUTH_CACHE_REDIS_PREFIX", default = "auth:")]
    pub redis_prefix: String,
}
