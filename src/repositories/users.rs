use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

use crate::models::users::UserRecord;
use crate::repositories::store::{
    KeyValueStore, StoreError, CURRENT_SESSION, ONBOARDING_COMPLETED, REGISTERED_USERS,
};

/// Copy of a user collection that could not be read at all.
pub const UNREADABLE_USERS: &str = "registered_users_unreadable";

/// The registered-user collection as loaded. Entries that do not decode as a
/// user are carried along untouched and written back after the readable ones.
#[derive(Debug, Default)]
pub struct UserCollection {
    pub users: Vec<UserRecord>,
    pub unreadable: Vec<Value>,
}

fn decode_user(entry: &Value) -> Option<UserRecord> {
    match UserRecord::deserialize(entry) {
        Ok(user) if !user.username.trim().is_empty() => Some(user),
        Ok(_) => {
            log::warn!("Keeping user entry without a username as is.");
            None
        }
        Err(e) => {
            log::warn!("Keeping unreadable user entry as is: {}", e);
            None
        }
    }
}

#[derive(Clone)]
pub struct UserRepository {
    store: Arc<dyn KeyValueStore>,
}

impl UserRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Loads the registered-user collection record by record. A missing key
    /// is an empty collection. A document that is not a list at all is
    /// copied to `UNREADABLE_USERS` before being treated as empty.
    pub async fn load_users(&self) -> Result<UserCollection, StoreError> {
        let Some(raw) = self.store.get(REGISTERED_USERS).await? else {
            return Ok(UserCollection::default());
        };

        let entries = match serde_json::from_str::<Vec<Value>>(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                log::error!(
                    "User collection is unreadable, saving a copy under {}: {}",
                    UNREADABLE_USERS,
                    e
                );
                self.store.set(UNREADABLE_USERS, &raw).await?;
                return Ok(UserCollection::default());
            }
        };

        let mut collection = UserCollection::default();
        for entry in entries {
            match decode_user(&entry) {
                Some(user) => collection.users.push(user),
                None => collection.unreadable.push(entry),
            }
        }

        Ok(collection)
    }

    pub async fn save_users(&self, users: &[UserRecord], unreadable: &[Value]) -> Result<(), StoreError> {
        let mut entries = users
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<Value>, _>>()?;
        entries.extend_from_slice(unreadable);

        let raw = serde_json::to_string(&entries)?;
        self.store.set(REGISTERED_USERS, &raw).await
    }

    pub async fn load_session(&self) -> Result<Option<UserRecord>, StoreError> {
        let Some(raw) = self.store.get(CURRENT_SESSION).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<Option<UserRecord>>(&raw) {
            Ok(session) => Ok(session),
            Err(e) => {
                log::error!("Discarding unreadable session: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn save_session(&self, user: &UserRecord) -> Result<(), StoreError> {
        let raw = serde_json::to_string(user)?;
        self.store.set(CURRENT_SESSION, &raw).await
    }

    pub async fn clear_session(&self) -> Result<(), StoreError> {
        self.store.remove(CURRENT_SESSION).await
    }

    pub async fn onboarding_completed(&self) -> Result<bool, StoreError> {
        let raw = self.store.get(ONBOARDING_COMPLETED).await?;
        Ok(raw
            .and_then(|raw| serde_json::from_str::<bool>(&raw).ok())
            .unwrap_or(false))
    }

    pub async fn set_onboarding_completed(&self) -> Result<(), StoreError> {
        self.store.set(ONBOARDING_COMPLETED, "true").await
    }
}
