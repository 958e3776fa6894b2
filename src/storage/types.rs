use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Store errors. During a sync pass these are per item: the pipeline records
/// them and moves on to the next item.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Collection name is not a plain SQL identifier
    #[error("Invalid collection name: {0}")]
    InvalidCollection(String),

    /// Creating the collection table or its indexes failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Connectivity or write failure
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

// ============================================================================
// Configuration
// ============================================================================

/// Settings needed to open the article store.
pub struct StoreConfig {
    /// Connection string, e.g. `sqlite:articles.db` or `sqlite::memory:`
    pub database_url: SecretString,
    /// Table the articles live in
    pub collection: String,
}

/// SEC-015: the connection string may carry credentials.
impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("database_url", &"[REDACTED]")
            .field("collection", &self.collection)
            .finish()
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// What a single upsert did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    /// No record had this identifier; one was created
    Inserted,
    /// Content differed; all fields were overwritten
    Updated,
    /// Content was identical; only `imported_at` was refreshed
    Unchanged,
}

/// Internal row type for article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleRow {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub published_at: String,
    pub published_ts: Option<i64>,
    pub content_hash: String,
    pub imported_at: i64,
}

impl ArticleRow {
    pub(crate) fn into_record(self) -> ArticleRecord {
        ArticleRecord {
            identifier: self.identifier,
            title: self.title,
            description: self.description,
            link: self.link,
            published_at: self.published_at,
            published_ts: self.published_ts.and_then(DateTime::from_timestamp_millis),
            content_hash: self.content_hash,
            imported_at: DateTime::from_timestamp_millis(self.imported_at)
                .unwrap_or(DateTime::UNIX_EPOCH),
        }
    }
}

/// A persisted article.
///
/// Feed fields are stored as received; `imported_at` is the time of the most
/// recent successful write for the identifier, including writes that left the
/// content unchanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub link: String,
    /// Raw publication time from the feed
    pub published_at: String,
    /// `published_at` parsed as RFC 2822/3339, when possible
    pub published_ts: Option<DateTime<Utc>>,
    pub content_hash: String,
    pub imported_at: DateTime<Utc>,
}
