//! Session store trait.
//!
//! Defines the get/set-by-key contract for workflow session state.
//! Keys are either a session id (parent record) or a derived child id
//! (per-chunk record). Implementations live in chunkflow-infra and in
//! [`super::memory`].

use chunkflow_types::error::RepositoryError;
use serde_json::Value;

/// Trait for durable key/value persistence of workflow records.
///
/// Values are arbitrary JSON documents. Uses RPITIT (native async fn in
/// traits, Rust 2024 edition).
///
/// The store provides no locking. Callers only ever write records they
/// logically own: the parent record from start/shard/synthesize bookkeeping,
/// and each child record from the one executor processing that chunk.
pub trait SessionStore: Send + Sync {
    /// Load a record. Returns `Ok(None)` if the key does not exist; an `Err`
    /// always means the store itself failed.
    fn load(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<Option<Value>, RepositoryError>> + Send;

    /// Save a record (upsert).
    fn save(
        &self,
        key: &str,
        value: &Value,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Delete a record. No-op if the key does not exist.
    fn delete(
        &self,
        key: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// List keys starting with `prefix`, sorted ascending.
    fn list_keys(
        &self,
        prefix: &str,
    ) -> impl std::future::Future<Output = Result<Vec<String>, RepositoryError>> + Send;
}
