use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::StorageError;

/// Longest accepted collection (table) name.
const MAX_COLLECTION_NAME_LEN: usize = 64;

/// Returns true when `name` can be spliced into SQL as a table name:
/// ASCII letters, digits and underscores, not starting with a digit.
pub fn is_valid_collection_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    name.len() <= MAX_COLLECTION_NAME_LEN && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

// ============================================================================
// Database
// ============================================================================

#[derive(Clone)]
pub struct Database {
    pub(crate) pool: SqlitePool,
}

impl Database {
    /// Open a connection pool for `url`.
    ///
    /// The database file is created if missing. In-memory databases exist per
    /// connection, so their pool is pinned to a single connection that never
    /// idles out.
    pub async fn connect(url: &str) -> Result<Self, StorageError> {
        // busy_timeout=5000: SQLite waits up to 5 seconds for a concurrent
        // writer (another sync pass) before returning SQLITE_BUSY.
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .pragma("busy_timeout", "5000");

        let in_memory = url.contains(":memory:") || url.contains("mode=memory");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options
            .acquire_timeout(Duration::from_secs(10))
            .connect_with(options)
            .await?;

        tracing::debug!(in_memory = in_memory, "Opened article store");
        Ok(Self { pool })
    }

    /// Create the collection table and its indexes if they do not exist.
    ///
    /// All statements use `IF NOT EXISTS` and run in one transaction, so
    /// calling this on an existing collection is a no-op.
    pub(crate) async fn ensure_collection(&self, collection: &str) -> Result<(), StorageError> {
        if !is_valid_collection_name(collection) {
            return Err(StorageError::InvalidCollection(collection.to_string()));
        }

        self.create_collection(collection)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))
    }

    async fn create_collection(&self, collection: &str) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        // previous_hash holds the content hash as it was before the latest
        // write; NULL means the latest write was the insert.
        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {collection} (
                id INTEGER PRIMARY KEY,
                identifier TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                link TEXT NOT NULL,
                published_at TEXT NOT NULL,
                published_ts INTEGER,
                content_hash TEXT NOT NULL,
                previous_hash TEXT,
                imported_at INTEGER NOT NULL
            )
        "#
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{collection}_published ON {collection}(published_ts DESC)"
        ))
        .execute(&mut *tx)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{collection}_imported ON {collection}(imported_at DESC)"
        ))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Close every connection in the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
