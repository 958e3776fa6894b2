//! Feed retrieval and parsing.
//!
//! - **Fetching**: one HTTP retrieval per call, bounded by a timeout and a
//!   body size cap, never retried
//! - **Parsing**: RSS markup into an ordered list of [`FeedItem`]s, with
//!   case-insensitive element matching and field defaults
//!
//! # Architecture
//!
//! - [`fetcher`] - [`FeedSource`] trait and the reqwest-backed [`HttpFetcher`]
//! - [`parser`] - quick-xml event reader producing a [`ParsedFeed`]
//! - [`item`] - the normalized [`FeedItem`] record
//!
//! # Example
//!
//! ```ignore
//! use feedsync::feed::{parse_feed, FeedSource, HttpFetcher};
//!
//! let fetcher = HttpFetcher::new(&config.fetch)?;
//! let bytes = fetcher.fetch("https://example.com/rss.xml").await?;
//! let parsed = parse_feed(&bytes)?;
//! ```

mod fetcher;
mod item;
mod parser;

pub use fetcher::{FeedSource, FetchError, HttpFetcher};
pub use item::FeedItem;
pub use parser::{normalize_name, parse_feed, ParseError, ParsedFeed};
