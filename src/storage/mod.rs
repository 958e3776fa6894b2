mod articles;
mod schema;
mod types;

pub use articles::{ArticleRepository, ArticleStore};
pub use schema::{is_valid_collection_name, Database};
pub use types::{ArticleRecord, StorageError, StoreConfig, UpsertOutcome};
