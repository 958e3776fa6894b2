//! Helpers for the command-line surface.

mod feed_url;

pub use feed_url::{validate_feed_url, FeedUrlError};
