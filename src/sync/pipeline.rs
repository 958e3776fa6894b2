use futures::stream::{self, StreamExt};
use std::collections::HashMap;

use super::summary::{ItemOutcome, ItemReport, SyncError, SyncState, SyncSummary};
use crate::feed::{parse_feed, FeedItem, FeedSource};
use crate::storage::ArticleStore;

/// Default number of item upserts in flight during one pass.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// One fetch → parse → persist pass over a single feed.
///
/// Fetch and parse failures end the pass in [`SyncState::Failed`] with nothing
/// persisted. Once parsing succeeds the pass always reaches
/// [`SyncState::Done`]; store failures are recorded per item.
///
/// Upserts run concurrently (bounded by `concurrency`). Items that share an
/// identifier are upserted one after another in feed order, so the last
/// occurrence in the document is what ends up stored.
///
/// Dropping the future returned by [`SyncPipeline::run`] cancels the pass:
/// upserts that already committed stay committed, the rest are not attempted.
pub struct SyncPipeline<F, S> {
    source: F,
    store: S,
    concurrency: usize,
}

impl<F, S> SyncPipeline<F, S>
where
    F: FeedSource,
    S: ArticleStore,
{
    pub fn new(source: F, store: S) -> Self {
        Self {
            source,
            store,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    /// Set the upsert concurrency (values below 1 are treated as 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run one sync pass against `url`.
    ///
    /// Never panics on feed or store problems; inspect
    /// [`SyncSummary::state`] / [`SyncSummary::error`], or call
    /// [`SyncSummary::into_result`].
    pub async fn run(&self, url: &str) -> SyncSummary {
        let mut summary = SyncSummary::new(url);

        transition(&mut summary, SyncState::Fetching);
        let bytes = match self.source.fetch(url).await {
            Ok(bytes) => bytes,
            Err(e) => return fail(summary, SyncError::Fetch(e)),
        };

        transition(&mut summary, SyncState::Parsing);
        let parsed = match parse_feed(&bytes) {
            Ok(parsed) => parsed,
            Err(e) => return fail(summary, SyncError::Parse(e)),
        };

        if parsed.dropped > 0 {
            tracing::warn!(
                url = %url,
                dropped = parsed.dropped,
                "Feed items without identifier skipped"
            );
        }
        summary.fetched = parsed.items.len();
        summary.dropped = parsed.dropped;
        tracing::debug!(
            url = %url,
            channel = %parsed.channel_title,
            items = parsed.items.len(),
            "Feed parsed"
        );

        transition(&mut summary, SyncState::Persisting);
        for report in self.persist(parsed.items).await {
            summary.record(report);
        }

        let summary = summary.finish(SyncState::Done, None);
        tracing::info!(
            url = %url,
            fetched = summary.fetched,
            inserted = summary.inserted,
            updated = summary.updated,
            unchanged = summary.unchanged,
            failed = summary.failed,
            dropped = summary.dropped,
            "Sync pass complete"
        );
        summary
    }

    /// Upsert every item, returning reports in feed order.
    async fn persist(&self, items: Vec<FeedItem>) -> Vec<ItemReport> {
        // Group by identifier, keeping first-seen order of groups and feed
        // order within each group.
        let mut groups: Vec<Vec<(usize, FeedItem)>> = Vec::new();
        let mut group_of: HashMap<String, usize> = HashMap::new();
        for (position, item) in items.into_iter().enumerate() {
            match group_of.get(&item.identifier) {
                Some(&group) => groups[group].push((position, item)),
                None => {
                    group_of.insert(item.identifier.clone(), groups.len());
                    groups.push(vec![(position, item)]);
                }
            }
        }

        let store = &self.store;
        let batches: Vec<Vec<(usize, ItemReport)>> = stream::iter(groups)
            .map(|group| async move {
                let mut reports = Vec::with_capacity(group.len());
                for (position, item) in group {
                    let outcome = match store.upsert(&item).await {
                        Ok(outcome) => ItemOutcome::from(outcome),
                        Err(e) => {
                            tracing::warn!(
                                identifier = %item.identifier,
                                error = %e,
                                "Failed to persist feed item"
                            );
                            ItemOutcome::Failed {
                                reason: e.to_string(),
                            }
                        }
                    };
                    reports.push((
                        position,
                        ItemReport {
                            identifier: item.identifier,
                            outcome,
                        },
                    ));
                }
                reports
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut reports: Vec<(usize, ItemReport)> = batches.into_iter().flatten().collect();
        reports.sort_by_key(|(position, _)| *position);
        reports.into_iter().map(|(_, report)| report).collect()
    }
}

fn transition(summary: &mut SyncSummary, next: SyncState) {
    tracing::debug!(url = %summary.url, from = %summary.state, to = %next, "Sync state change");
    summary.state = next;
}

fn fail(summary: SyncSummary, error: SyncError) -> SyncSummary {
    tracing::warn!(
        url = %summary.url,
        stage = %summary.state,
        error = %error,
        "Sync pass failed"
    );
    summary.finish(SyncState::Failed, Some(error))
}
