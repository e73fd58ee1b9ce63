//! Property tests for the reading store and ingestion rules.

use flowstate_core::ingest::{normalize, MAX_BPM};
use flowstate_core::{NewReading, ReadingStore, SignalPayload, SignalType};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashSet};

fn heart_rate(timestamp_ms: i64, bpm: u32) -> NewReading {
    NewReading::new(timestamp_ms, SignalPayload::HeartRate { bpm })
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        max_shrink_iters: 100,
        .. ProptestConfig::default()
    })]

    /// One row per timestamp, holding the last value written for it.
    #[test]
    fn prop_upsert_keeps_last_write_per_timestamp(
        writes in proptest::collection::vec((0i64..20, 1u32..=MAX_BPM), 1..60)
    ) {
        let store = ReadingStore::open_memory().unwrap();
        let mut expected = BTreeMap::new();
        for (ts, bpm) in &writes {
            store.upsert(SignalType::HeartRate, &heart_rate(*ts, *bpm)).unwrap();
            expected.insert(*ts, *bpm);
        }

        let rows = store.query_by_time_range(SignalType::HeartRate, 0, 20).unwrap();
        prop_assert_eq!(rows.len(), expected.len());
        for row in rows {
            let want = expected[&row.timestamp_ms];
            prop_assert_eq!(row.payload, SignalPayload::HeartRate { bpm: want });
        }
    }

    /// Synced rows stay synced until their timestamp is written again.
    #[test]
    fn prop_synced_only_reverts_on_reingest(
        initial in proptest::collection::btree_set(0i64..50, 1..30),
        rewrites in proptest::collection::btree_set(0i64..50, 0..10),
    ) {
        let store = ReadingStore::open_memory().unwrap();
        for ts in &initial {
            store.upsert(SignalType::HeartRate, &heart_rate(*ts, 60)).unwrap();
        }
        let ids: Vec<i64> = store
            .query_pending(SignalType::HeartRate)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        prop_assert_eq!(store.mark_synced(SignalType::HeartRate, &ids).unwrap(), ids.len());
        prop_assert_eq!(store.mark_synced(SignalType::HeartRate, &ids).unwrap(), 0);

        for ts in &rewrites {
            store.upsert(SignalType::HeartRate, &heart_rate(*ts, 61)).unwrap();
        }

        let pending: HashSet<i64> = store
            .query_pending(SignalType::HeartRate)
            .unwrap()
            .iter()
            .map(|r| r.timestamp_ms)
            .collect();
        let rewritten: HashSet<i64> = rewrites.iter().copied().collect();
        prop_assert_eq!(pending, rewritten);
    }

    /// Heart rate is accepted exactly inside 1..=MAX_BPM.
    #[test]
    fn prop_heart_rate_range(bpm in 0u32..1000, ts in 0i64..4_102_444_800_000) {
        let accepted = normalize(heart_rate(ts, bpm)).is_ok();
        prop_assert_eq!(accepted, (1..=MAX_BPM).contains(&bpm));
    }
}
