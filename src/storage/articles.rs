use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::ExposeSecret;

use super::schema::Database;
use super::types::{ArticleRecord, ArticleRow, StorageError, StoreConfig, UpsertOutcome};
use crate::feed::FeedItem;

/// Maximum number of articles returned by a single listing (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Column list shared by every article query
const ARTICLE_COLUMNS: &str =
    "identifier, title, description, link, published_at, published_ts, content_hash, imported_at";

/// Persists feed items with idempotent upsert-by-identifier semantics.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Insert the item, or update the record sharing its identifier.
    ///
    /// Failures concern this item only; callers decide whether to continue.
    async fn upsert(&self, item: &FeedItem) -> Result<UpsertOutcome, StorageError>;
}

/// SQLite-backed article collection.
///
/// Cloning is cheap and shares the underlying pool; [`ArticleRepository::close`]
/// closes it for every clone.
#[derive(Clone)]
pub struct ArticleRepository {
    db: Database,
    collection: String,
    upsert_sql: String,
}

impl ArticleRepository {
    /// Connect to the store and select (creating if needed) the collection.
    ///
    /// # Errors
    ///
    /// - [`StorageError::InvalidCollection`] before any connection is made
    /// - [`StorageError::Database`] when the store is unreachable
    /// - [`StorageError::Migration`] when the collection cannot be created
    pub async fn connect(config: &StoreConfig) -> Result<Self, StorageError> {
        if !super::is_valid_collection_name(&config.collection) {
            return Err(StorageError::InvalidCollection(config.collection.clone()));
        }

        let db = Database::connect(config.database_url.expose_secret()).await?;
        if let Err(e) = db.ensure_collection(&config.collection).await {
            db.close().await;
            return Err(e);
        }

        tracing::info!(collection = %config.collection, "Article store ready");
        Ok(Self::new(db, &config.collection))
    }

    fn new(db: Database, collection: &str) -> Self {
        // One statement decides insert vs update, so concurrent writers for
        // the same identifier cannot lose an update. SET expressions see the
        // pre-update row, which is how previous_hash captures the old hash.
        let upsert_sql = format!(
            r#"
            INSERT INTO {c} (identifier, title, description, link, published_at,
                             published_ts, content_hash, previous_hash, imported_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, ?)
            ON CONFLICT(identifier) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                link = excluded.link,
                published_at = excluded.published_at,
                published_ts = excluded.published_ts,
                previous_hash = {c}.content_hash,
                content_hash = excluded.content_hash,
                imported_at = excluded.imported_at
            RETURNING content_hash, previous_hash
        "#,
            c = collection
        );

        Self {
            db,
            collection: collection.to_string(),
            upsert_sql,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Upsert with an explicit write time.
    ///
    /// `imported_at` is set to `now` on every successful write, including
    /// writes where the content is unchanged.
    pub async fn upsert_at(
        &self,
        item: &FeedItem,
        now: DateTime<Utc>,
    ) -> Result<UpsertOutcome, StorageError> {
        let content_hash = item.content_hash();
        let published_ts = item.published_timestamp().map(|ts| ts.timestamp_millis());

        let (stored_hash, previous_hash): (String, Option<String>) =
            sqlx::query_as(&self.upsert_sql)
                .bind(&item.identifier)
                .bind(&item.title)
                .bind(&item.description)
                .bind(&item.link)
                .bind(&item.published_at)
                .bind(published_ts)
                .bind(&content_hash)
                .bind(now.timestamp_millis())
                .fetch_one(&self.db.pool)
                .await?;

        let outcome = match previous_hash {
            None => UpsertOutcome::Inserted,
            Some(previous) if previous == stored_hash => UpsertOutcome::Unchanged,
            Some(_) => UpsertOutcome::Updated,
        };

        tracing::trace!(identifier = %item.identifier, outcome = ?outcome, "Upserted article");
        Ok(outcome)
    }

    /// Look up a single article by identifier.
    pub async fn get(&self, identifier: &str) -> Result<Option<ArticleRecord>, StorageError> {
        let row = sqlx::query_as::<_, ArticleRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM {} WHERE identifier = ?",
            self.collection
        ))
        .bind(identifier)
        .fetch_optional(&self.db.pool)
        .await?;

        Ok(row.map(ArticleRow::into_record))
    }

    /// Number of articles in the collection.
    pub async fn count(&self) -> Result<i64, StorageError> {
        let (count,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {}", self.collection))
            .fetch_one(&self.db.pool)
            .await?;
        Ok(count)
    }

    /// Most recent articles, newest publication first.
    ///
    /// Articles without a parseable publication time sort after dated ones,
    /// by `imported_at`. PERF-003: hard cap at MAX_ARTICLES (2000).
    pub async fn list_recent(&self, limit: i64) -> Result<Vec<ArticleRecord>, StorageError> {
        let limit = limit.clamp(0, MAX_ARTICLES);
        tracing::debug!(limit = limit, collection = %self.collection, "list_recent with limit cap");

        let rows = sqlx::query_as::<_, ArticleRow>(&format!(
            r#"
            SELECT {ARTICLE_COLUMNS}
            FROM {}
            ORDER BY published_ts IS NULL, published_ts DESC, imported_at DESC
            LIMIT ?
        "#,
            self.collection
        ))
        .bind(limit)
        .fetch_all(&self.db.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleRow::into_record).collect())
    }

    /// Release the store connection. Further calls on any clone fail with
    /// [`StorageError::Database`].
    pub async fn close(&self) {
        self.db.close().await;
        tracing::debug!(collection = %self.collection, "Article store closed");
    }
}

#[async_trait]
impl ArticleStore for ArticleRepository {
    async fn upsert(&self, item: &FeedItem) -> Result<UpsertOutcome, StorageError> {
        self.upsert_at(item, Utc::now()).await
    }
}
