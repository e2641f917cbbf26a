use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::models::counters::GlobalDailyCounter;
use crate::repositories::store::{KeyValueStore, StoreError, GLOBAL_DAILY_COUNTER};

/// Global daily survey counter. Reads apply the day rollover; increments
/// are serialized within this process.
#[derive(Clone)]
pub struct CounterRepository {
    store: Arc<dyn KeyValueStore>,
    write_lock: Arc<Mutex<()>>,
}

impl CounterRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    async fn load(&self) -> Result<GlobalDailyCounter, StoreError> {
        let raw = self.store.get(GLOBAL_DAILY_COUNTER).await?;
        Ok(raw
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default())
    }

    async fn save(&self, counter: &GlobalDailyCounter) -> Result<(), StoreError> {
        let raw = serde_json::to_string(counter)?;
        self.store.set(GLOBAL_DAILY_COUNTER, &raw).await
    }

    pub async fn current(&self, today: NaiveDate) -> Result<GlobalDailyCounter, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut counter = self.load().await?;

        if counter.roll_over(today) {
            log::info!("Global survey counter reset for {}", today);
            self.save(&counter).await?;
        }

        Ok(counter)
    }

    /// Consumes one global slot for today unless `cap` slots are already
    /// taken. Slots are never returned.
    pub async fn consume(
        &self,
        today: NaiveDate,
        cap: u64,
    ) -> Result<Option<GlobalDailyCounter>, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut counter = self.load().await?;

        counter.roll_over(today);
        if counter.count >= cap {
            return Ok(None);
        }

        counter.count += 1;
        self.save(&counter).await?;

        Ok(Some(counter))
    }

    pub async fn set(&self, counter: &GlobalDailyCounter) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.save(counter).await
    }
}
