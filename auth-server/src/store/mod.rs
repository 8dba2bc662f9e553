//! Expiring key/value storage for authorization codes, refresh tokens and
//! one-time passwords.
//!
//! Every [`Store`] has a single lifetime applied to all of its entries, so the
//! server keeps one store per kind of record. `take` is the primitive that makes
//! single-use codes safe: it reads and removes an entry in one step, so two
//! concurrent redemptions of the same code cannot both see it.

use crate::config::{CacheConfig, CacheStore};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

pub mod memory;
pub mod redis;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Failed to parse stored value: {0}")]
    Deserialization(String),
    #[error("Redis error: {0}")]
    Redis(String),
    #[error("Configuration error: {0}")]
    Config(String),
}

#[async_trait::async_trait]
pub trait StoreBackend: Send + Sync {
    /// Insert or overwrite a value; it expires after the store's lifetime
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T)
    -> Result<(), StoreError>;

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError>;

    /// Atomically read and remove a value. At most one caller observes `Some`.
    async fn take<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError>;

    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Ok when the backend can serve requests, otherwise a readable reason
    async fn health_check(&self) -> Result<(), String>;
}

#[derive(Clone)]
pub enum Store {
    InMemory(memory::InMemoryStore),
    Redis(redis::RedisStore),
}

#[async_trait::async_trait]
impl StoreBackend for Store {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.set(key, value).await,
            Self::Redis(store) => store.set(key, value).await,
        }
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self {
            Self::InMemory(store) => store.get(key).await,
            Self::Redis(store) => store.get(key).await,
        }
    }

    async fn take<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self {
            Self::InMemory(store) => store.take(key).await,
            Self::Redis(store) => store.take(key).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match self {
            Self::InMemory(store) => store.delete(key).await,
            Self::Redis(store) => store.delete(key).await,
        }
    }

    async fn health_check(&self) -> Result<(), String> {
        match self {
            Self::InMemory(store) => store.health_check().await,
            Self::Redis(store) => store.health_check().await,
        }
    }
}

impl Store {
    /// Build a store whose entries live for `ttl_secs`
    pub async fn create(config: &CacheConfig, ttl_secs: u64) -> Result<Self, StoreError> {
        match config.store {
            CacheStore::InMemory => {
                let store = memory::InMemoryStore::new(ttl_secs, config.capacity_mib)
                    .map_err(StoreError::Config)?;
                Ok(Self::InMemory(store))
            }
            CacheStore::Redis => {
                if config.redis_url.is_empty() {
                    return Err(StoreError::Config(
                        "AUTH_CACHE_REDIS_URL is required for the redis store".to_string(),
                    ));
                }
                let store =
                    redis::RedisStore::new(&config.redis_url, &config.redis_prefix, ttl_secs)
                        .await
                        .map_err(StoreError::Config)?;
                Ok(Self::Redis(store))
            }
        }
    }

    #[cfg(test)]
    pub fn in_memory(ttl_secs: u64) -> Self {
        Self::InMemory(
            memory::InMemoryStore::new(ttl_secs, 16).expect("in-memory store should build"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, PartialEq, Clone)]
    struct Record {
        owner: String,
    }

    fn record(owner: &str) -> Record {
        Record {
            owner: owner.to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_basic_operations() {
        let store = Store::in_memory(60);

        store.set("k", &record("alice")).await.unwrap();
        assert_eq!(store.get::<Record>("k").await.unwrap(), Some(record("alice")));
        assert_eq!(store.get::<Record>("missing").await.unwrap(), None);

        store.delete("k").await.unwrap();
        assert_eq!(store.get::<Record>("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_take_removes_entry() {
        let store = Store::in_memory(60);
        store.set("code", &record("alice")).await.unwrap();

        assert_eq!(store.take::<Record>("code").await.unwrap(), Some(record("alice")));
        assert_eq!(store.take::<Record>("code").await.unwrap(), None);
        assert_eq!(store.get::<Record>("code").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_concurrent_take_has_single_winner() {
        let store = Store::in_memory(60);
        store.set("code", &record("alice")).await.unwrap();

        let winners = Arc::new(AtomicUsize::new(0));
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let store = store.clone();
            let winners = winners.clone();
            tasks.push(tokio::spawn(async move {
                if store.take::<Record>("code").await.unwrap().is_some() {
                    winners.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_create_requires_redis_url() {
        let config = CacheConfig {
            store: CacheStore::Redis,
            capacity_mib: 16,
            redis_url: String::new(),
            redis_prefix: "auth:".to_string(),
        };
        let result = Store::create(&config, 60).await;
        assert!(matches!(result, Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_create_in_memory() {
        let config = CacheConfig {
            store: CacheStore::InMemory,
            capacity_mib: 16,
            redis_url: String::new(),
            redis_prefix: "auth:".to_string(),
        };
        let store = Store::create(&config, 60).await.unwrap();
        assert!(store.health_check().await.is_ok());
    }
}
