//! End-to-end sync passes: wiremock serves the feed, HttpFetcher retrieves it,
//! and an in-memory SQLite collection stores the articles.
//!
//! Each test starts its own mock server and database for isolation.

use pretty_assertions::assert_eq;
use secrecy::SecretString;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use feedsync::config::FetchConfig;
use feedsync::feed::{FetchError, HttpFetcher, ParseError};
use feedsync::storage::{ArticleRepository, StoreConfig};
use feedsync::sync::{ItemOutcome, SyncError, SyncPipeline, SyncState};

const FEED_PATH: &str = "/rss";

async fn repo() -> ArticleRepository {
    ArticleRepository::connect(&StoreConfig {
        database_url: SecretString::from("sqlite::memory:".to_string()),
        collection: "articles".to_string(),
    })
    .await
    .unwrap()
}

fn pipeline(repo: ArticleRepository) -> SyncPipeline<HttpFetcher, ArticleRepository> {
    let fetcher = HttpFetcher::new(&FetchConfig::default()).unwrap();
    SyncPipeline::new(fetcher, repo)
}

async fn serve(server: &MockServer, body: &str) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path(FEED_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "application/rss+xml")
                .set_body_string(body.to_string()),
        )
        .mount(server)
        .await;
}

fn item(guid: &str, title: &str, description: &str) -> String {
    format!(
        "<item>\
           <guid>{guid}</guid>\
           <title>{title}</title>\
           <description>{description}</description>\
           <link>https://example.com/{guid}</link>\
           <pubDate>Mon, 06 Jan 2025 10:00:00 +0000</pubDate>\
         </item>"
    )
}

fn rss(items: &[String]) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <rss version=\"2.0\"><channel><title>Portada</title>{}</channel></rss>",
        items.concat()
    )
}

// ============================================================================
// Idempotence and update detection
// ============================================================================

#[tokio::test]
async fn test_second_pass_reports_everything_unchanged() {
    let server = MockServer::start().await;
    serve(
        &server,
        &rss(&[item("a", "A", "first"), item("b", "B", "second")]),
    )
    .await;
    let pipeline = pipeline(repo().await);
    let url = format!("{}{}", server.uri(), FEED_PATH);

    let first = pipeline.run(&url).await;
    assert_eq!(first.state, SyncState::Done);
    assert_eq!((first.inserted, first.updated, first.unchanged), (2, 0, 0));

    let second = pipeline.run(&url).await;
    assert_eq!(second.state, SyncState::Done);
    assert_eq!((second.inserted, second.updated, second.unchanged), (0, 0, 2));
    assert_eq!(pipeline.store().count().await.unwrap(), 2);
}

#[tokio::test]
async fn test_changed_title_is_reported_as_update() {
    let server = MockServer::start().await;
    let url = format!("{}{}", server.uri(), FEED_PATH);
    let pipeline = pipeline(repo().await);

    serve(&server, &rss(&[item("a", "Old headline", "body")])).await;
    pipeline.run(&url).await;

    serve(&server, &rss(&[item("a", "New headline", "body")])).await;
    let summary = pipeline.run(&url).await;

    assert_eq!(summary.updated, 1);
    assert_eq!(summary.items[0].outcome, ItemOutcome::Updated);
    let stored = pipeline.store().get("a").await.unwrap().unwrap();
    assert_eq!(stored.title, "New headline");
    assert_eq!(pipeline.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_single_item_is_normalized_into_record() {
    let server = MockServer::start().await;
    serve(
        &server,
        "<rss><channel><item><guid>only</guid><title>Solo</title></item></channel></rss>",
    )
    .await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;
    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.inserted, 1);

    let stored = pipeline.store().get("only").await.unwrap().unwrap();
    assert_eq!(stored.title, "Solo");
    assert_eq!(stored.description, "");
    assert_eq!(stored.link, "");
    assert_eq!(stored.published_at, "");
    assert_eq!(stored.published_ts, None);
}

// ============================================================================
// Degenerate documents
// ============================================================================

#[tokio::test]
async fn test_empty_channel_completes_with_zero_counts() {
    let server = MockServer::start().await;
    serve(&server, &rss(&[])).await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.state, SyncState::Done);
    assert!(summary.error.is_none());
    assert_eq!(
        (
            summary.fetched,
            summary.inserted,
            summary.updated,
            summary.unchanged,
            summary.failed
        ),
        (0, 0, 0, 0, 0)
    );
}

#[tokio::test]
async fn test_items_without_identifier_are_dropped() {
    let server = MockServer::start().await;
    serve(
        &server,
        &rss(&[
            "<item><title>No guid here</title></item>".to_string(),
            item("kept", "Kept", "body"),
        ]),
    )
    .await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.fetched, 1);
    assert_eq!(summary.dropped, 1);
    assert_eq!(pipeline.store().count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_document_without_channel_fails_and_persists_nothing() {
    let server = MockServer::start().await;
    serve(&server, "<html><body>Not a feed</body></html>").await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.state, SyncState::Failed);
    assert!(matches!(
        summary.error,
        Some(SyncError::Parse(ParseError::MissingChannel))
    ));
    assert_eq!(pipeline.store().count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_truncated_document_fails_and_persists_nothing() {
    let server = MockServer::start().await;
    serve(
        &server,
        "<rss><channel><item><guid>a</guid><title>Cut off",
    )
    .await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.state, SyncState::Failed);
    assert!(matches!(summary.error, Some(SyncError::Parse(_))));
    assert_eq!(pipeline.store().count().await.unwrap(), 0);
}

// ============================================================================
// Fetch failures
// ============================================================================

#[tokio::test]
async fn test_http_error_status_fails_pass() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;
    let pipeline = pipeline(repo().await);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.state, SyncState::Failed);
    assert!(matches!(
        summary.error,
        Some(SyncError::Fetch(FetchError::HttpStatus(404)))
    ));
    assert_eq!(summary.fetched, 0);
    assert_eq!(pipeline.store().count().await.unwrap(), 0);
}

// ============================================================================
// Concurrency
// ============================================================================

#[tokio::test]
async fn test_duplicate_identifiers_converge_to_last_occurrence() {
    let server = MockServer::start().await;
    serve(
        &server,
        &rss(&[
            item("dup", "First", "one"),
            item("x", "X", "x"),
            item("dup", "Last", "two"),
        ]),
    )
    .await;
    let pipeline = pipeline(repo().await).with_concurrency(8);

    let summary = pipeline
        .run(&format!("{}{}", server.uri(), FEED_PATH))
        .await;

    assert_eq!(summary.fetched, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(pipeline.store().count().await.unwrap(), 2);
    let stored = pipeline.store().get("dup").await.unwrap().unwrap();
    assert_eq!(stored.title, "Last");
}

#[tokio::test]
async fn test_concurrent_passes_over_same_feed_converge() {
    let server = MockServer::start().await;
    let items: Vec<String> = (0..20)
        .map(|i| item(&format!("id-{i}"), &format!("Title {i}"), "body"))
        .collect();
    serve(&server, &rss(&items)).await;
    let store = repo().await;
    let url = format!("{}{}", server.uri(), FEED_PATH);

    let first = pipeline(store.clone());
    let second = pipeline(store.clone());
    let (a, b) = tokio::join!(first.run(&url), second.run(&url));

    assert_eq!(a.state, SyncState::Done);
    assert_eq!(b.state, SyncState::Done);
    // Each identifier is inserted exactly once across both passes
    assert_eq!(a.inserted + b.inserted, 20);
    assert_eq!(a.failed + b.failed, 0);
    assert_eq!(store.count().await.unwrap(), 20);
}
