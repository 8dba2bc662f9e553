use super::{StoreBackend, StoreError};
use async_trait::async_trait;
use log::error;
use redis::{AsyncCommands, Client, aio::ConnectionManager};
use serde::{Serialize, de::DeserializeOwned};

/// Store shared between server instances. Keys are namespaced with a prefix.
#[derive(Clone)]
pub struct RedisStore {
    conn_manager: ConnectionManager,
    prefix: String,
    ttl_secs: u64,
}

impl RedisStore {
    pub async fn new(redis_url: &str, prefix: &str, ttl_secs: u64) -> Result<Self, String> {
        let client =
            Client::open(redis_url).map_err(|err| format!("Invalid Redis URL: {err}"))?;
        let conn_manager = ConnectionManager::new(client)
            .await
            .map_err(|err| format!("Failed to create Redis connection manager: {err}"))?;

        let mut conn = conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(|err| format!("Failed to ping Redis: {err}"))?;

        Ok(Self {
            conn_manager,
            prefix: prefix.to_string(),
            ttl_secs,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }

    fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, StoreError> {
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|e| StoreError::Deserialization(e.to_string()))
        })
        .transpose()
    }
}

#[async_trait]
impl StoreBackend for RedisStore {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        conn.set_ex::<_, _, ()>(self.key(key), serialized, self.ttl_secs)
            .await
            .map_err(|err| {
                error!("Redis error while setting key {key}: {err}");
                StoreError::Redis(err.to_string())
            })
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = conn.get(self.key(key)).await.map_err(|err| {
            error!("Redis error while getting key {key}: {err}");
            StoreError::Redis(err.to_string())
        })?;
        Self::decode(raw)
    }

    async fn take<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        let mut conn = self.conn_manager.clone();
        let raw: Option<String> = redis::cmd("GETDEL")
            .arg(self.key(key))
            .query_async(&mut conn)
            .await
            .map_err(|err| {
                error!("Redis error while taking key {key}: {err}");
                StoreError::Redis(err.to_string())
            })?;
        Self::decode(raw)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn_manager.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(|err| {
            error!("Redis error while deleting key {key}: {err}");
            StoreError::Redis(err.to_string())
        })
    }

    async fn health_check(&self) -> Result<(), String> {
        let mut conn = self.conn_manager.clone();
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map(|_| ())
            .map_err(|err| format!("Redis health check failed: {err}"))
    }
}
