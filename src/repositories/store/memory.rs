use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

use super::{check_quota, KeyValueStore, StoreError};

#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, String>>,
    quota: Option<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: u64) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            quota: Some(quota),
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).map(|value| value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let sizes: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len() as u64))
            .collect();
        check_quota(self.quota, key, value.len() as u64, sizes)?;

        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_remove() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));

        store.remove("k").await.unwrap();
        assert!(store.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_writes_over_quota_and_keeps_old_value() {
        let store = MemoryStore::with_quota(16);
        store.set("k", "small").await.unwrap();

        let result = store.set("k", "a value far too large for it").await;
        assert!(matches!(result, Err(StoreError::Capacity { .. })));
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("small"));
    }
}
