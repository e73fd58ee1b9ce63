//! JSON export of local readings.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{CoreError, StorageError};
use crate::readings::{Reading, SignalType};
use crate::storage::ReadingStore;

/// Exported document: every reading of every signal type in `[start_ms, end_ms)`.
#[derive(Debug, Clone, Serialize)]
pub struct Export {
    pub exported_at: DateTime<Utc>,
    pub start_ms: i64,
    pub end_ms: i64,
    pub signals: BTreeMap<SignalType, Vec<Reading>>,
}

impl Export {
    pub fn total(&self) -> usize {
        self.signals.values().map(Vec::len).sum()
    }
}

pub fn collect(store: &ReadingStore, start_ms: i64, end_ms: i64) -> Result<Export, StorageError> {
    let mut signals = BTreeMap::new();
    for signal in SignalType::ALL {
        signals.insert(signal, store.query_by_time_range(signal, start_ms, end_ms)?);
    }
    Ok(Export {
        exported_at: Utc::now(),
        start_ms,
        end_ms,
        signals,
    })
}

/// Pretty-printed JSON of [`collect`].
pub fn export_json(store: &ReadingStore, start_ms: i64, end_ms: i64) -> Result<String, CoreError> {
    let export = collect(store, start_ms, end_ms)?;
    Ok(serde_json::to_string_pretty(&export)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::Ingestor;
    use crate::readings::EnergyLevel;
    use std::sync::Arc;

    #[test]
    fn export_groups_by_signal_within_range() {
        let store = Arc::new(ReadingStore::open_memory().unwrap());
        let ingestor = Ingestor::new(store.clone());
        ingestor.record_heart_rate(1000, 70).unwrap();
        ingestor.record_heart_rate(9000, 80).unwrap();
        ingestor
            .record_prediction(2000, EnergyLevel::High, 0.9)
            .unwrap();

        let json = export_json(&store, 0, 5000).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        let hr = value["signals"]["heart_rate"].as_array().unwrap();
        assert_eq!(hr.len(), 1);
        assert_eq!(hr[0]["timestamp_ms"], 1000);
        assert_eq!(hr[0]["payload"]["bpm"], 70);
        assert_eq!(value["signals"]["prediction"][0]["payload"]["level"], "HIGH");
        assert_eq!(value["signals"]["sleep"].as_array().unwrap().len(), 0);
        assert!(value["exported_at"].is_string());
    }

    #[test]
    fn total_counts_every_signal() {
        let store = ReadingStore::open_memory().unwrap();
        assert_eq!(collect(&store, 0, i64::MAX).unwrap().total(), 0);
    }
}
