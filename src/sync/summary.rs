use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use thiserror::Error;

use crate::feed::{FetchError, ParseError};
use crate::storage::UpsertOutcome;

/// Errors that abort a sync pass before any item is persisted.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),
    #[error("Parse failed: {0}")]
    Parse(#[from] ParseError),
}

/// Pipeline state. A pass moves `Idle → Fetching → Parsing → Persisting → Done`,
/// or stops at `Failed` from `Fetching` or `Parsing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Idle,
    Fetching,
    Parsing,
    Persisting,
    Done,
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncState::Idle => "idle",
            SyncState::Fetching => "fetching",
            SyncState::Parsing => "parsing",
            SyncState::Persisting => "persisting",
            SyncState::Done => "done",
            SyncState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Result of persisting one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ItemOutcome {
    Inserted,
    Updated,
    Unchanged,
    Failed { reason: String },
}

impl From<UpsertOutcome> for ItemOutcome {
    fn from(outcome: UpsertOutcome) -> Self {
        match outcome {
            UpsertOutcome::Inserted => ItemOutcome::Inserted,
            UpsertOutcome::Updated => ItemOutcome::Updated,
            UpsertOutcome::Unchanged => ItemOutcome::Unchanged,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub identifier: String,
    #[serde(flatten)]
    pub outcome: ItemOutcome,
}

/// Summary of one sync pass, suitable for structured logging.
///
/// Counts always add up: `fetched == inserted + updated + unchanged + failed`.
/// `items` lists per-item outcomes in feed order.
#[derive(Debug, Serialize)]
pub struct SyncSummary {
    pub url: String,
    pub state: SyncState,
    /// Items returned by the parser (after dropping those without identifier)
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    /// Items dropped by the parser for lacking an identifier
    pub dropped: usize,
    pub items: Vec<ItemReport>,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<SyncError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

fn serialize_error<S>(error: &Option<SyncError>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match error {
        Some(e) => serializer.serialize_some(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl SyncSummary {
    pub(crate) fn new(url: &str) -> Self {
        let now = Utc::now();
        Self {
            url: url.to_string(),
            state: SyncState::Idle,
            fetched: 0,
            inserted: 0,
            updated: 0,
            unchanged: 0,
            failed: 0,
            dropped: 0,
            items: Vec::new(),
            error: None,
            started_at: now,
            finished_at: now,
        }
    }

    pub(crate) fn record(&mut self, report: ItemReport) {
        match report.outcome {
            ItemOutcome::Inserted => self.inserted += 1,
            ItemOutcome::Updated => self.updated += 1,
            ItemOutcome::Unchanged => self.unchanged += 1,
            ItemOutcome::Failed { .. } => self.failed += 1,
        }
        self.items.push(report);
    }

    pub(crate) fn finish(mut self, state: SyncState, error: Option<SyncError>) -> Self {
        self.state = state;
        self.error = error;
        self.finished_at = Utc::now();
        self
    }

    /// True when the pass reached `Done`, even if some items failed.
    pub fn is_success(&self) -> bool {
        self.state == SyncState::Done
    }

    /// Turn a failed pass into its cause.
    pub fn into_result(mut self) -> Result<SyncSummary, SyncError> {
        match self.error.take() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}
