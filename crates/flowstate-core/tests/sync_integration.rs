//! Integration tests for ingestion followed by reconciliation.

use async_trait::async_trait;
use flowstate_core::sync::PassOutcome;
use flowstate_core::{
    AuthSession, Ingestor, NewReading, ReadingStore, Reconciler, ReconcilerOptions, RemoteSink,
    SignalPayload, SignalType, StaticAuth, SyncAck, SyncBatch, SyncError, TypingSample,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Records every batch; accepts all but the signal types listed in `failing`.
#[derive(Default)]
struct FakeRemote {
    failing: Mutex<Vec<SignalType>>,
    calls: AtomicUsize,
    received: Mutex<Vec<SyncBatch>>,
}

impl FakeRemote {
    fn fail(&self, signal: SignalType) {
        self.failing.lock().unwrap().push(signal);
    }

    fn recover(&self) {
        self.failing.lock().unwrap().clear();
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteSink for FakeRemote {
    async fn submit(&self, _session: &AuthSession, batch: &SyncBatch) -> Result<SyncAck, SyncError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.received.lock().unwrap().push(batch.clone());
        if self.failing.lock().unwrap().contains(&batch.signal) {
            return Err(SyncError::Remote {
                status: 503,
                body: "unavailable".into(),
            });
        }
        Ok(SyncAck::All)
    }
}

struct Harness {
    store: Arc<ReadingStore>,
    ingestor: Ingestor,
    remote: Arc<FakeRemote>,
    reconciler: Reconciler,
}

fn harness() -> Harness {
    let store = Arc::new(ReadingStore::open_memory().unwrap());
    let remote = Arc::new(FakeRemote::default());
    let reconciler = Reconciler::new(
        store.clone(),
        remote.clone(),
        Arc::new(StaticAuth::signed_in("user-1", "token")),
        ReconcilerOptions::default(),
    );
    Harness {
        ingestor: Ingestor::new(store.clone()),
        store,
        remote,
        reconciler,
    }
}

#[tokio::test]
async fn test_heart_rate_round_trip() {
    let h = harness();
    h.ingestor.record_heart_rate(1000, 70).unwrap();
    h.ingestor.record_heart_rate(2000, 75).unwrap();
    assert_eq!(h.store.query_pending(SignalType::HeartRate).unwrap().len(), 2);

    let report = h.reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(report.outcome, PassOutcome::Synced);
    assert_eq!(report.synced, 2);

    assert!(h.store.query_pending(SignalType::HeartRate).unwrap().is_empty());
    let rows = h
        .store
        .query_by_time_range(SignalType::HeartRate, 0, 3000)
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r.synced));
    assert_eq!(rows[0].payload, SignalPayload::HeartRate { bpm: 70 });
    assert_eq!(rows[1].payload, SignalPayload::HeartRate { bpm: 75 });
}

#[tokio::test]
async fn test_typing_upsert_then_sync() {
    let h = harness();
    let sample = |wpm| TypingSample {
        wpm,
        accuracy: 96.0,
        total_chars: 250,
        errors: 3,
        duration_secs: 60,
        sample_text: None,
    };
    h.ingestor.record_typing(5000, sample(60)).unwrap();
    h.ingestor.record_typing(5000, sample(65)).unwrap();

    let rows = h.store.query_by_time_range(SignalType::Typing, 0, 10_000).unwrap();
    assert_eq!(rows.len(), 1);

    h.reconciler.reconcile(SignalType::Typing).await;
    let received = h.remote.received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].readings.len(), 1);
    assert!(matches!(
        received[0].readings[0].payload,
        SignalPayload::Typing { wpm: 65, .. }
    ));
}

#[tokio::test]
async fn test_second_pass_does_not_contact_remote() {
    let h = harness();
    h.ingestor.record_heart_rate(1000, 70).unwrap();

    h.reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(h.remote.calls(), 1);

    let report = h.reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(report.outcome, PassOutcome::NothingPending);
    assert_eq!(h.remote.calls(), 1);
}

#[tokio::test]
async fn test_failed_pass_keeps_rows_pending_until_recovery() {
    let h = harness();
    h.ingestor.record_heart_rate(1000, 70).unwrap();
    h.ingestor.record_heart_rate(2000, 75).unwrap();
    h.remote.fail(SignalType::HeartRate);

    let pending_ids = |store: &ReadingStore| -> Vec<i64> {
        let mut ids: Vec<i64> = store
            .query_pending(SignalType::HeartRate)
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        ids.sort_unstable();
        ids
    };
    let before = pending_ids(&h.store);
    assert_eq!(before.len(), 2);

    for attempt in 1..=3 {
        let report = h.reconciler.reconcile(SignalType::HeartRate).await;
        assert!(report.is_failure());
        assert_eq!(report.consecutive_failures, attempt);
        assert_eq!(pending_ids(&h.store), before);
    }

    h.remote.recover();
    let report = h.reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(report.synced, 2);
    assert_eq!(h.store.count_pending(SignalType::HeartRate).unwrap(), 0);

    // Every attempt, failed or not, offered exactly the same rows.
    let received = h.remote.received.lock().unwrap();
    assert_eq!(received.len(), 4);
    for batch in received.iter() {
        let mut ids: Vec<i64> = batch.readings.iter().map(|r| r.id).collect();
        ids.sort_unstable();
        assert_eq!(ids, before);
    }
}

#[tokio::test]
async fn test_one_failing_signal_does_not_block_others() {
    let h = harness();
    h.ingestor.record_heart_rate(1000, 70).unwrap();
    h.ingestor.record_sleep(0, Some(8 * 60 * 60_000), None).unwrap();
    h.ingestor.record_reaction(3000, 250, 5).unwrap();
    h.remote.fail(SignalType::Sleep);

    let summary = h.reconciler.reconcile_all().await;
    assert_eq!(summary.reports.len(), SignalType::ALL.len());
    assert_eq!(summary.failed_signals(), vec![SignalType::Sleep]);
    assert_eq!(summary.total_synced(), 2);

    assert_eq!(h.store.count_pending(SignalType::HeartRate).unwrap(), 0);
    assert_eq!(h.store.count_pending(SignalType::Reaction).unwrap(), 0);
    assert_eq!(h.store.count_pending(SignalType::Sleep).unwrap(), 1);
    assert_eq!(
        summary.report(SignalType::Typing).unwrap().outcome,
        PassOutcome::NothingPending
    );
}

#[tokio::test]
async fn test_signed_out_pass_is_skipped() {
    let store = Arc::new(ReadingStore::open_memory().unwrap());
    let remote = Arc::new(FakeRemote::default());
    let reconciler = Reconciler::new(
        store.clone(),
        remote.clone(),
        Arc::new(StaticAuth::signed_out()),
        ReconcilerOptions::default(),
    );
    Ingestor::new(store.clone()).record_heart_rate(1000, 70).unwrap();

    let report = reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(report.outcome, PassOutcome::SkippedUnauthenticated);
    assert_eq!(report.pending, 1);
    assert_eq!(remote.calls(), 0);
    assert_eq!(store.count_pending(SignalType::HeartRate).unwrap(), 1);
}

/// Re-ingests the submitted timestamp before acknowledging, as a collector
/// running concurrently with the pass would.
struct ReingestingRemote {
    store: Arc<ReadingStore>,
}

#[async_trait]
impl RemoteSink for ReingestingRemote {
    async fn submit(&self, _session: &AuthSession, batch: &SyncBatch) -> Result<SyncAck, SyncError> {
        for reading in &batch.readings {
            self.store
                .upsert(
                    batch.signal,
                    &NewReading::new(reading.timestamp_ms, SignalPayload::HeartRate { bpm: 99 }),
                )
                .unwrap();
        }
        Ok(SyncAck::All)
    }
}

#[tokio::test]
async fn test_reingested_row_stays_pending_after_ack() {
    let store = Arc::new(ReadingStore::open_memory().unwrap());
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(ReingestingRemote {
            store: store.clone(),
        }),
        Arc::new(StaticAuth::signed_in("user-1", "token")),
        ReconcilerOptions::default(),
    );
    Ingestor::new(store.clone()).record_heart_rate(1000, 70).unwrap();

    let report = reconciler.reconcile(SignalType::HeartRate).await;
    assert_eq!(report.submitted, 1);
    assert_eq!(report.synced, 0);

    let pending = store.query_pending(SignalType::HeartRate).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, SignalPayload::HeartRate { bpm: 99 });
    assert_eq!(pending[0].revision, 2);
}

#[tokio::test]
async fn test_synced_rows_stay_synced_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("flowstate.db");

    {
        let store = Arc::new(ReadingStore::open(&path).unwrap());
        let reconciler = Reconciler::new(
            store.clone(),
            Arc::new(FakeRemote::default()),
            Arc::new(StaticAuth::signed_in("user-1", "token")),
            ReconcilerOptions::default(),
        );
        Ingestor::new(store.clone()).record_heart_rate(1000, 70).unwrap();
        Ingestor::new(store.clone()).record_heart_rate(2000, 72).unwrap();
        reconciler.reconcile(SignalType::HeartRate).await;
        Ingestor::new(store).record_heart_rate(3000, 74).unwrap();
    }

    let store = ReadingStore::open(&path).unwrap();
    let pending = store.query_pending(SignalType::HeartRate).unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].timestamp_ms, 3000);
    assert_eq!(store.count(SignalType::HeartRate).unwrap(), 3);
}
