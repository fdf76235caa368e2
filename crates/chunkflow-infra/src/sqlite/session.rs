//! SQLite session store implementation.
//!
//! Implements `SessionStore` from `chunkflow-core` over the
//! `workflow_records` table. Values are stored as JSON text and deserialized
//! on read.

use chrono::Utc;
use chunkflow_core::storage::session_store::SessionStore;
use chunkflow_types::error::RepositoryError;
use serde_json::Value;
use sqlx::Row;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `SessionStore`.
pub struct SqliteSessionStore {
    pool: DatabasePool,
}

impl SqliteSessionStore {
    /// Create a new session store backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

impl SessionStore for SqliteSessionStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        let row = sqlx::query("SELECT value FROM workflow_records WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let value_str: String = row
                    .try_get("value")
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                let value: Value = serde_json::from_str(&value_str)
                    .map_err(|e| RepositoryError::Query(format!("invalid JSON value: {e}")))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        let now = Utc::now().to_rfc3339();
        let value_str = serde_json::to_string(value)
            .map_err(|e| RepositoryError::Query(format!("failed to serialize value: {e}")))?;

        sqlx::query(
            r#"INSERT INTO workflow_records (key, value, created_at, updated_at)
               VALUES (?, ?, ?, ?)
               ON CONFLICT (key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at"#,
        )
        .bind(key)
        .bind(&value_str)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM workflow_records WHERE key = ?")
            .bind(key)
            .execute(&self.pool.writer)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        // substr() instead of LIKE: chunk ids may contain '%' or '_'.
        let rows = sqlx::query(
            "SELECT key FROM workflow_records WHERE substr(key, 1, length(?1)) = ?1 ORDER BY key",
        )
        .bind(prefix)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in &rows {
            let key: String = row
                .try_get("key")
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            keys.push(key);
        }

        Ok(keys)
    }
}
