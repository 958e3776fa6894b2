//! feedsync: pull an RSS feed into a SQLite article collection.
//!
//! - [`feed`] - HTTP retrieval and RSS parsing
//! - [`storage`] - idempotent article upserts keyed by identifier
//! - [`sync`] - the pipeline tying both together
//! - [`config`] - TOML file plus environment overrides

pub mod config;
pub mod feed;
pub mod storage;
pub mod sync;
pub mod util;
