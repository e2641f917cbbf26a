use async_trait::async_trait;
use std::path::{Path, PathBuf};

use super::{check_quota, KeyValueStore, StoreError};

/// One `<key>.json` file per key inside a directory.
#[derive(Clone)]
pub struct FileStore {
    dir: PathBuf,
    quota: Option<u64>,
}

impl FileStore {
    pub async fn open(dir: impl AsRef<Path>, quota: Option<u64>) -> Result<Self, StoreError> {
        let dir = dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Backend(format!("{}: {}", dir.display(), e)))?;

        Ok(Self { dir, quota })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn sizes(&self) -> Result<Vec<(String, u64)>, StoreError> {
        let mut sizes = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?
        {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let len = entry
                .metadata()
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?
                .len();
            sizes.push((stem.to_string(), len));
        }

        Ok(sizes)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let sizes = self.sizes().await?;
        check_quota(self.quota, key, value.len() as u64, sizes)?;

        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Backend(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn persists_across_instances() {
        let dir = tempfile::tempdir().unwrap();

        let store = FileStore::open(dir.path(), None).await.unwrap();
        store.set("registered_users", "[]").await.unwrap();
        drop(store);

        let reopened = FileStore::open(dir.path(), None).await.unwrap();
        assert_eq!(
            reopened.get("registered_users").await.unwrap().as_deref(),
            Some("[]")
        );
        assert!(reopened.get("missing").await.unwrap().is_none());
        reopened.remove("missing").await.unwrap();
    }

    #[tokio::test]
    async fn enforces_quota() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::open(dir.path(), Some(40)).await.unwrap();

        store.set("a", "0123456789").await.unwrap();
        let result = store.set("b", &"x".repeat(64)).await;

        assert!(matches!(result, Err(StoreError::Capacity { .. })));
        assert!(store.get("b").await.unwrap().is_none());
    }
}
