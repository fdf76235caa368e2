//! Database pool with split reader/writer connections in WAL mode.
//!
//! SQLite allows only one writer at a time. Chunk tasks save their child
//! records concurrently, so writes are funnelled through a single-connection
//! writer pool while reads (progress scans, session loads) fan out over a
//! multi-connection reader pool.

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::data_dir::resolve_data_dir;

/// File name of the session database inside the data directory.
pub const DATABASE_FILE: &str = "chunkflow.db";

/// Split read/write pool for SQLite with WAL mode.
///
/// - `reader`: Multi-connection pool (up to 8) for concurrent SELECT queries.
/// - `writer`: Single-connection pool for serialized INSERT/UPDATE/DELETE.
#[derive(Clone)]
pub struct DatabasePool {
    pub reader: SqlitePool,
    pub writer: SqlitePool,
}

impl DatabasePool {
    /// Create a new DatabasePool with split reader/writer connections.
    ///
    /// Runs migrations automatically on the writer pool.
    pub async fn new(database_url: &str) -> Result<Self, sqlx::Error> {
        let base_opts = SqliteConnectOptions::from_str(database_url)?
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(std::time::Duration::from_secs(5))
            .create_if_missing(true);

        let read_opts = base_opts.clone().read_only(true);
        let write_opts = base_opts;

        let writer = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(write_opts)
            .await?;

        // Run migrations on writer before opening reader pool
        sqlx::migrate!("../../migrations").run(&writer).await?;

        let reader = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(read_opts)
            .await?;

        tracing::debug!(database_url, "database pool ready");
        Ok(Self { reader, writer })
    }

    /// Open `{data_dir}/chunkflow.db`, creating the directory if needed.
    pub async fn open_in(data_dir: &Path) -> Result<Self, sqlx::Error> {
        tokio::fs::create_dir_all(data_dir).await?;
        Self::new(&database_url_in(data_dir)).await
    }
}

/// Database URL for the session database inside `data_dir`.
pub fn database_url_in(data_dir: &Path) -> String {
    format!("sqlite://{}?mode=rwc", data_dir.join(DATABASE_FILE).display())
}

/// Returns the default database URL based on `CHUNKFLOW_DATA_DIR`, falling
/// back to `~/.chunkflow/chunkflow.db`.
pub fn default_database_url() -> String {
    database_url_in(&resolve_data_dir())
}
