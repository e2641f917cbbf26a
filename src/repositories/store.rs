use async_trait::async_trait;

mod file;
mod memory;
mod postgres;

pub use file::FileStore;
pub use memory::MemoryStore;
pub use postgres::PostgresStore;

pub const REGISTERED_USERS: &str = "registered_users";
pub const CURRENT_SESSION: &str = "current_session";
pub const GLOBAL_DAILY_COUNTER: &str = "global_daily_counter";
pub const ONBOARDING_COMPLETED: &str = "onboarding_completed";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Storage quota exceeded writing {key}: {needed} bytes over a {quota} byte quota")]
    Capacity { key: String, needed: u64, quota: u64 },
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// String-keyed blob storage. Values are opaque serialized documents.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

/// Checks that replacing `key` with `new_len` bytes keeps the total within
/// `quota`. `sizes` yields `(key, len)` for every stored value.
pub(crate) fn check_quota<I>(
    quota: Option<u64>,
    key: &str,
    new_len: u64,
    sizes: I,
) -> Result<(), StoreError>
where
    I: IntoIterator<Item = (String, u64)>,
{
    let Some(quota) = quota else {
        return Ok(());
    };

    let others: u64 = sizes
        .into_iter()
        .filter(|(k, _)| k != key)
        .map(|(k, len)| k.len() as u64 + len)
        .sum();
    let needed = others + key.len() as u64 + new_len;

    if needed > quota {
        return Err(StoreError::Capacity {
            key: key.to_string(),
            needed,
            quota,
        });
    }

    Ok(())
}
