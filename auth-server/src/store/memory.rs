use super::{StoreBackend, StoreError};
use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use serde::{Serialize, de::DeserializeOwned};
use std::time::Duration;

/// Process-local store backed by moka, bounded by the serialized size of its entries
#[derive(Clone)]
pub struct InMemoryStore {
    entries: MokaCache<String, String>,
}

impl InMemoryStore {
    pub fn new(ttl_secs: u64, capacity_mib: usize) -> Result<Self, String> {
        let max_capacity_bytes = capacity_mib
            .checked_mul(1024 * 1024)
            .and_then(|bytes| u64::try_from(bytes).ok())
            .ok_or_else(|| format!("store capacity of {capacity_mib} MiB is too large"))?;

        let entries = MokaCache::builder()
            .time_to_live(Duration::from_secs(ttl_secs))
            .weigher(|key: &String, value: &String| -> u32 {
                (key.len() + value.len()).try_into().unwrap_or(u32::MAX)
            })
            .max_capacity(max_capacity_bytes)
            .build();

        Ok(Self { entries })
    }

    fn decode<T: DeserializeOwned>(raw: Option<String>) -> Result<Option<T>, StoreError> {
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|e| StoreError::Deserialization(e.to_string()))
        })
        .transpose()
    }
}

#[async_trait]
impl StoreBackend for InMemoryStore {
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let serialized = serde_json::to_string(value)?;
        self.entries.insert(key.to_string(), serialized).await;
        Ok(())
    }

    async fn get<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        Self::decode(self.entries.get(key).await)
    }

    async fn take<T: DeserializeOwned + Send + Sync>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        // moka's remove hands back the value to exactly one caller
        Self::decode(self.entries.remove(key).await)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.entries.invalidate(key).await;
        Ok(())
    }

    async fn health_check(&self) -> Result<(), String> {
        Ok(())
    }
}
