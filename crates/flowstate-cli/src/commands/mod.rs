pub mod config;
pub mod daemon;
pub mod export;
pub mod ingest;
pub mod query;
pub mod sync;

use flowstate_core::{Config, ReadingStore};
use std::sync::Arc;

/// Open the reading store named by the on-disk config.
pub fn open_store() -> Result<Arc<ReadingStore>, Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let store = ReadingStore::open(config.database_path()?)?;
    Ok(Arc::new(store))
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
