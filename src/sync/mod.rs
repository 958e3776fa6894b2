//! One fetch → parse → persist pass.
//!
//! [`SyncPipeline`] ties a [`FeedSource`](crate::feed::FeedSource) to an
//! [`ArticleStore`](crate::storage::ArticleStore) and reports a
//! [`SyncSummary`]. Fetch and parse failures abort the pass; store failures
//! are isolated to the item that caused them.

mod pipeline;
mod summary;

pub use pipeline::{SyncPipeline, DEFAULT_CONCURRENCY};
pub use summary::{ItemOutcome, ItemReport, SyncError, SyncState, SyncSummary};
