use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

/// A single normalized item produced by the feed parser.
///
/// Every field except `identifier` may be empty; the parser defaults missing
/// elements to the empty string rather than rejecting the item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedItem {
    /// Stable unique key sourced from `<guid>` (never empty)
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub link: String,
    /// Publication time exactly as written in the feed
    pub published_at: String,
}

impl FeedItem {
    /// Parses `published_at` as RFC 2822 (RSS 2.0) or RFC 3339 (`dc:date`).
    ///
    /// Returns `None` when the field is empty or in any other format; the raw
    /// string is still stored as-is.
    pub fn published_timestamp(&self) -> Option<DateTime<Utc>> {
        let raw = self.published_at.trim();
        if raw.is_empty() {
            return None;
        }

        DateTime::parse_from_rfc2822(raw)
            .or_else(|_| DateTime::parse_from_rfc3339(raw))
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
    }

    /// SHA-256 over the content fields, used by the store for change detection.
    ///
    /// Fields are length-prefixed so that moving text between two adjacent
    /// fields changes the hash.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for field in [
            &self.title,
            &self.description,
            &self.link,
            &self.published_at,
        ] {
            hasher.update((field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(published_at: &str) -> FeedItem {
        FeedItem {
            identifier: "id-1".to_string(),
            title: "Title".to_string(),
            description: String::new(),
            link: String::new(),
            published_at: published_at.to_string(),
        }
    }

    #[test]
    fn test_published_timestamp_rfc2822() {
        let ts = item("Tue, 10 Jun 2025 04:00:00 GMT")
            .published_timestamp()
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-06-10T04:00:00+00:00");
    }

    #[test]
    fn test_published_timestamp_rfc3339() {
        let ts = item("2025-06-10T06:00:00+02:00")
            .published_timestamp()
            .unwrap();
        assert_eq!(ts.to_rfc3339(), "2025-06-10T04:00:00+00:00");
    }

    #[test]
    fn test_unparseable_timestamp_is_none() {
        assert!(item("yesterday-ish").published_timestamp().is_none());
        assert!(item("").published_timestamp().is_none());
    }

    #[test]
    fn test_content_hash_ignores_identifier() {
        let a = item("x");
        let mut b = a.clone();
        b.identifier = "other".to_string();
        assert_eq!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_content_hash_detects_shifted_text() {
        let mut a = item("");
        a.title = "ab".to_string();
        a.description = "c".to_string();
        let mut b = a.clone();
        b.title = "a".to_string();
        b.description = "bc".to_string();
        assert_ne!(a.content_hash(), b.content_hash());
    }
}
