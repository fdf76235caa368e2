//! In-memory session store.
//!
//! Backed by a `DashMap`, suitable for tests and for single-process runs that
//! do not need state to survive a restart.

use chunkflow_types::error::RepositoryError;
use dashmap::DashMap;
use serde_json::Value;

use super::session_store::SessionStore;

/// `SessionStore` holding records in a concurrent hash map.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    records: DashMap<String, Value>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records (parent and child).
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn load(&self, key: &str) -> Result<Option<Value>, RepositoryError> {
        Ok(self.records.get(key).map(|entry| entry.value().clone()))
    }

    async fn save(&self, key: &str, value: &Value) -> Result<(), RepositoryError> {
        self.records.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), RepositoryError> {
        self.records.remove(key);
        Ok(())
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, RepositoryError> {
        let mut keys: Vec<String> = self
            .records
            .iter()
            .filter(|entry| entry.key().starts_with(prefix))
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }
}
