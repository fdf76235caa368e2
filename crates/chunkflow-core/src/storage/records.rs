//! Typed record layer over a [`SessionStore`].
//!
//! Wraps the raw JSON store with (de)serialization of the versioned
//! [`WorkflowSession`] and [`ChunkChildState`] records, so the engine never
//! handles loose JSON blobs directly.
//!
//! Parent records have several in-process writers (status transitions, cache
//! fills, synthesize). They go through [`SessionRecords::update_session`],
//! which serializes writes per session and re-reads the record under the lock,
//! so a slow operation never writes back a stale copy.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use chunkflow_types::error::RepositoryError;
use chunkflow_types::session::{
    child_id, ChunkChildState, WorkflowSession, CHILD_KEY_SEPARATOR, SESSION_SCHEMA_VERSION,
};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::session_store::SessionStore;

// ---------------------------------------------------------------------------
// SessionRecords
// ---------------------------------------------------------------------------

/// Typed access to parent and child records.
///
/// Generic over `S: SessionStore` so it works with any storage backend
/// (SQLite, in-memory). Cloning shares the underlying store.
pub struct SessionRecords<S: SessionStore> {
    store: Arc<S>,
    write_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl<S: SessionStore> Clone for SessionRecords<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            write_locks: Arc::clone(&self.write_locks),
        }
    }
}

impl<S: SessionStore> SessionRecords<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            write_locks: Arc::new(DashMap::new()),
        }
    }

    /// Access the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    // -----------------------------------------------------------------------
    // Parent records
    // -----------------------------------------------------------------------

    /// Load a session by id. `Ok(None)` means the session was never started.
    pub async fn load_session(
        &self,
        session_id: &str,
    ) -> Result<Option<WorkflowSession>, RecordError> {
        let session: Option<WorkflowSession> = self.load_typed(session_id).await?;
        if let Some(session) = &session {
            check_version(session_id, session.schema_version)?;
        }
        Ok(session)
    }

    pub async fn save_session(&self, session: &WorkflowSession) -> Result<(), RecordError> {
        self.save_typed(&session.session_id, session).await?;
        tracing::debug!(
            session_id = session.session_id.as_str(),
            status = %session.status,
            "saved session record"
        );
        Ok(())
    }

    /// Re-read the session, apply `change`, and save it, all under the
    /// session's write lock.
    ///
    /// Returns `Ok(None)` when the record no longer exists (purged meanwhile);
    /// nothing is written in that case.
    pub async fn update_session<F>(
        &self,
        session_id: &str,
        change: F,
    ) -> Result<Option<WorkflowSession>, RecordError>
    where
        F: FnOnce(&mut WorkflowSession),
    {
        let _guard = self.write_lock(session_id).await;
        let Some(mut session) = self.load_session(session_id).await? else {
            return Ok(None);
        };
        change(&mut session);
        session.touch();
        self.save_session(&session).await?;
        Ok(Some(session))
    }

    async fn write_lock(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.write_locks.entry(session_id.to_string()).or_default().value());
        lock.lock_owned().await
    }

    // -----------------------------------------------------------------------
    // Child records
    // -----------------------------------------------------------------------

    /// Load one chunk's child record. `Ok(None)` means the chunk never ran.
    pub async fn load_child(
        &self,
        session_id: &str,
        chunk_id: &str,
    ) -> Result<Option<ChunkChildState>, RecordError> {
        let key = child_id(session_id, chunk_id);
        let child: Option<ChunkChildState> = self.load_typed(&key).await?;
        if let Some(child) = &child {
            check_version(&key, child.schema_version)?;
        }
        Ok(child)
    }

    pub async fn save_child(&self, child: &ChunkChildState) -> Result<(), RecordError> {
        self.save_typed(&child.child_id, child).await?;
        tracing::debug!(
            child_id = child.child_id.as_str(),
            status = %child.status,
            remaining = child.remaining.len(),
            "saved child record"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Delete a session and every child record derived from it.
    ///
    /// Returns the number of records removed.
    pub async fn purge_session(&self, session_id: &str) -> Result<usize, RecordError> {
        let prefix = format!("{session_id}{CHILD_KEY_SEPARATOR}");
        let child_keys = self.store.list_keys(&prefix).await?;
        let mut removed = 0;
        for key in &child_keys {
            self.store.delete(key).await?;
            removed += 1;
        }
        if self.store.load(session_id).await?.is_some() {
            self.store.delete(session_id).await?;
            removed += 1;
        }
        self.write_locks.remove(session_id);
        tracing::info!(session_id, removed, "purged session records");
        Ok(removed)
    }

    async fn load_typed<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RecordError> {
        match self.store.load(key).await? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|e| RecordError::Corrupt {
                    key: key.to_string(),
                    reason: e.to_string(),
                }),
            None => Ok(None),
        }
    }

    async fn save_typed<T: Serialize>(&self, key: &str, record: &T) -> Result<(), RecordError> {
        let value = serde_json::to_value(record).map_err(|e| RecordError::Corrupt {
            key: key.to_string(),
            reason: format!("failed to serialize record: {e}"),
        })?;
        self.store.save(key, &value).await?;
        Ok(())
    }
}

fn check_version(key: &str, version: u32) -> Result<(), RecordError> {
    if version > SESSION_SCHEMA_VERSION {
        return Err(RecordError::Corrupt {
            key: key.to_string(),
            reason: format!(
                "schema version {version} is newer than supported version {SESSION_SCHEMA_VERSION}"
            ),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors that can occur while reading or writing typed records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    /// Underlying store operation failed.
    #[error("session store error: {0}")]
    Repository(#[from] RepositoryError),

    /// A stored record could not be decoded.
    #[error("corrupt record '{key}': {reason}")]
    Corrupt { key: String, reason: String },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::InMemorySessionStore;
    use chunkflow_types::session::{BatchState, ChunkPlan, ChunkSeed};
    use serde_json::json;

    fn records() -> SessionRecords<InMemorySessionStore> {
        SessionRecords::new(Arc::new(InMemorySessionStore::new()))
    }

    fn session() -> WorkflowSession {
        let plan = ChunkPlan::from_seeds(vec![
            ChunkSeed::new("chunk-1", "One", vec![json!("a")]),
            ChunkSeed::new("chunk-2", "Two", vec![json!("b")]),
        ])
        .unwrap();
        WorkflowSession::new(
            "s-1".to_string(),
            "test".to_string(),
            plan,
            BatchState::new(5, 0),
        )
    }

    #[tokio::test]
    async fn test_session_roundtrip() {
        let records = records();
        let session = session();
        records.save_session(&session).await.unwrap();

        let loaded = records.load_session("s-1").await.unwrap().unwrap();
        assert_eq!(loaded, session);
    }

    #[tokio::test]
    async fn test_missing_records_are_none() {
        let records = records();
        assert!(records.load_session("nope").await.unwrap().is_none());
        assert!(records.load_child("nope", "chunk-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_child_roundtrip_uses_derived_key() {
        let records = records();
        let session = session();
        let child = ChunkChildState::seeded("s-1", &session.plan.chunks()[1]);
        records.save_child(&child).await.unwrap();

        assert!(records.store().load("s-1::chunk::chunk-2").await.unwrap().is_some());
        let loaded = records.load_child("s-1", "chunk-2").await.unwrap().unwrap();
        assert_eq!(loaded, child);
    }

    #[tokio::test]
    async fn test_undecodable_record_is_corrupt() {
        let records = records();
        records
            .store()
            .save("s-1", &json!({"unexpected": true}))
            .await
            .unwrap();

        let err = records.load_session("s-1").await.unwrap_err();
        assert!(matches!(err, RecordError::Corrupt { .. }));
    }

    #[tokio::test]
    async fn test_newer_schema_version_is_rejected() {
        let records = records();
        let mut session = session();
        session.schema_version = SESSION_SCHEMA_VERSION + 1;
        records.save_session(&session).await.unwrap();

        let err = records.load_session("s-1").await.unwrap_err();
        assert!(err.to_string().contains("newer than supported"));
    }

    #[tokio::test]
    async fn test_update_session_rereads_before_writing() {
        let records = records();
        records.save_session(&session()).await.unwrap();

        // A writer holding an old copy must not clobber a newer field.
        let stale = records.load_session("s-1").await.unwrap().unwrap();
        records
            .update_session("s-1", |s| s.batch.cache_ready = true)
            .await
            .unwrap();
        let updated = records
            .update_session("s-1", |s| s.status = chunkflow_types::session::SessionStatus::Sharding)
            .await
            .unwrap()
            .unwrap();

        assert!(!stale.batch.cache_ready);
        assert!(updated.batch.cache_ready);
        let stored = records.load_session("s-1").await.unwrap().unwrap();
        assert!(stored.batch.cache_ready);
        assert_eq!(stored.status, chunkflow_types::session::SessionStatus::Sharding);
    }

    #[tokio::test]
    async fn test_update_missing_session_writes_nothing() {
        let records = records();
        let updated = records.update_session("gone", |s| s.result = None).await.unwrap();
        assert!(updated.is_none());
        assert!(records.store().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_updates_are_not_lost() {
        let records = records();
        records.save_session(&session()).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let records = records.clone();
            tasks.push(tokio::spawn(async move {
                records
                    .update_session("s-1", |s| {
                        s.extensions.insert(format!("k{i}"), json!(i));
                    })
                    .await
                    .unwrap();
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let stored = records.load_session("s-1").await.unwrap().unwrap();
        assert_eq!(stored.extensions.len(), 16);
    }

    #[tokio::test]
    async fn test_purge_removes_parent_and_children() {
        let records = records();
        let session = session();
        records.save_session(&session).await.unwrap();
        for chunk in session.plan.chunks() {
            records
                .save_child(&ChunkChildState::seeded("s-1", chunk))
                .await
                .unwrap();
        }
        records.store().save("s-10", &json!(1)).await.unwrap();

        let removed = records.purge_session("s-1").await.unwrap();
        assert_eq!(removed, 3);
        assert!(records.load_session("s-1").await.unwrap().is_none());
        assert!(records.store().load("s-10").await.unwrap().is_some());
    }
}
