use async_trait::async_trait;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};

use super::{check_quota, KeyValueStore, StoreError};

#[derive(Clone)]
pub struct PostgresStore {
    conn: PgPool,
    quota: Option<u64>,
}

impl PostgresStore {
    pub async fn connect(url: &str, quota: Option<u64>) -> Result<Self, StoreError> {
        let conn = PgPoolOptions::new()
            .max_connections(5)
            .connect(url)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { conn, quota })
    }
}

#[async_trait]
impl KeyValueStore for PostgresStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv_store WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        row.map(|row| row.try_get::<String, _>("value"))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.quota.is_some() {
            let rows = sqlx::query("SELECT key, LENGTH(value)::BIGINT AS len FROM kv_store")
                .fetch_all(&self.conn)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            let sizes = rows
                .iter()
                .map(|row| {
                    let key: String = row.try_get("key")?;
                    let len: i64 = row.try_get("len")?;
                    Ok((key, len.max(0) as u64))
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(|e| StoreError::Backend(e.to_string()))?;
            check_quota(self.quota, key, value.len() as u64, sizes)?;
        }

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value) VALUES ($1, $2)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value)
        .execute(&self.conn)
        .await
        .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.conn)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(())
    }
}
