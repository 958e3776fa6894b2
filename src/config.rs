//! Configuration for a sync run: optional TOML file plus environment overrides.
//!
//! The config file is optional: a missing file yields `Config::default()`.
//! The store connection string has no default; [`Config::store_config`] turns
//! its absence into [`ConfigError::MissingDatabaseUrl`] before any pass starts.
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer};
use std::path::Path;
use thiserror::Error;

use crate::storage::{is_valid_collection_name, StoreConfig};
use crate::sync::DEFAULT_CONCURRENCY;

/// Primary environment variable for the store connection string.
pub const DATABASE_URL_ENV: &str = "FEEDSYNC_DATABASE_URL";
/// Fallback environment variable, honoured when the primary one is unset.
pub const DATABASE_URL_FALLBACK_ENV: &str = "DATABASE_URL";
pub const COLLECTION_ENV: &str = "FEEDSYNC_COLLECTION";
pub const FETCH_TIMEOUT_ENV: &str = "FEEDSYNC_FETCH_TIMEOUT_SECS";

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// SEC-014: Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("No store connection string: set FEEDSYNC_DATABASE_URL or database_url in the config file")]
    MissingDatabaseUrl,

    #[error("Invalid collection name '{0}': use letters, digits and underscores (max 64)")]
    InvalidCollection(String),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
///
/// SEC-015: Custom Debug impl masks `database_url`, which may embed
/// credentials.
#[derive(Deserialize)]
#[serde(default)]
pub struct Config {
    /// Store connection string, e.g. `sqlite:articles.db?mode=rwc`.
    #[serde(deserialize_with = "deserialize_secret")]
    pub database_url: Option<SecretString>,

    /// Name of the table articles are upserted into.
    pub collection: String,

    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,

    pub fetch: FetchConfig,

    pub sync: SyncConfig,

    /// Top-level keys in the file that are not recognized.
    #[serde(skip)]
    unknown_keys: Vec<String>,
}

/// HTTP retrieval settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Whole-request timeout (headers and body).
    pub timeout_secs: u64,
    /// Maximum accepted response body size.
    pub max_body_bytes: usize,
    pub user_agent: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Maximum number of item upserts in flight during one pass.
    pub concurrency: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            collection: "articles".to_string(),
            log_level: "info".to_string(),
            fetch: FetchConfig::default(),
            sync: SyncConfig::default(),
            unknown_keys: Vec::new(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_body_bytes: 10 * 1024 * 1024,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
        }
    }
}

/// SEC-015: Mask database_url in Debug output to prevent secret leakage.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("collection", &self.collection)
            .field("log_level", &self.log_level)
            .field("fetch", &self.fetch)
            .field("sync", &self.sync)
            .finish()
    }
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let value: Option<String> = Option::deserialize(deserializer)?;
    Ok(value.filter(|v| !v.trim().is_empty()).map(SecretString::from))
}

impl Config {
    /// SEC-014: Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown top-level keys → accepted, listed by [`Config::unknown_keys`]
    ///
    /// Loading usually happens before logging is initialized, so unknown keys
    /// are recorded instead of logged here; see [`Config::warn_unknown_keys`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        // SEC-014: Check file size before reading
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Race condition: file deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        let mut config: Config = toml::from_str(&content)?;
        config.unknown_keys = find_unknown_keys(&content);
        Ok(config)
    }

    /// Top-level keys from the loaded file that were ignored.
    pub fn unknown_keys(&self) -> &[String] {
        &self.unknown_keys
    }

    /// Log one warning per ignored top-level key. Call once tracing is set up.
    pub fn warn_unknown_keys(&self) {
        for key in &self.unknown_keys {
            tracing::warn!(key = %key, "Unknown key in config file, ignoring");
        }
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable lookup.
    ///
    /// Empty values are treated as unset. `FEEDSYNC_DATABASE_URL` wins over
    /// `DATABASE_URL`, and both win over the config file.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = var(DATABASE_URL_ENV).or_else(|| var(DATABASE_URL_FALLBACK_ENV)) {
            self.database_url = Some(SecretString::from(url));
        }

        if let Some(collection) = var(COLLECTION_ENV) {
            self.collection = collection;
        }

        if let Some(raw) = var(FETCH_TIMEOUT_ENV) {
            self.fetch.timeout_secs =
                raw.trim()
                    .parse()
                    .map_err(|e: std::num::ParseIntError| ConfigError::InvalidValue {
                        key: FETCH_TIMEOUT_ENV.to_string(),
                        message: e.to_string(),
                    })?;
        }

        Ok(())
    }

    /// Check settings that have no safe default.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_collection_name(&self.collection) {
            return Err(ConfigError::InvalidCollection(self.collection.clone()));
        }
        if self.fetch.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch.timeout_secs".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        if self.sync.concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sync.concurrency".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Build the store settings, failing when no connection string is set.
    pub fn store_config(&self) -> Result<StoreConfig, ConfigError> {
        self.validate()?;
        let url = self
            .database_url
            .as_ref()
            .ok_or(ConfigError::MissingDatabaseUrl)?;
        Ok(StoreConfig {
            database_url: SecretString::from(url.expose_secret().to_owned()),
            collection: self.collection.clone(),
        })
    }
}

const KNOWN_KEYS: [&str; 5] = ["database_url", "collection", "log_level", "fetch", "sync"];

fn find_unknown_keys(content: &str) -> Vec<String> {
    match content.parse::<toml::Table>() {
        Ok(raw) => raw
            .keys()
            .filter(|key| !KNOWN_KEYS.contains(&key.as_str()))
            .cloned()
            .collect(),
        Err(_) => Vec::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================
