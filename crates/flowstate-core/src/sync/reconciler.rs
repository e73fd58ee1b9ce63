//! Pending-row reconciliation.
//!
//! A pass for one signal type reads every pending row, submits them in bounded
//! chunks and marks acknowledged rows synced. Rows are marked only after the
//! remote accepted them, and only if they were not re-ingested in the
//! meantime (the stored revision must still match what was submitted).
//! A failed chunk leaves its rows pending for the next pass.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{StorageError, SyncError};
use crate::readings::{Reading, SignalType};
use crate::storage::{ReadingStore, SyncConfig, MAX_BATCH_SIZE};
use crate::sync::auth::AuthProvider;
use crate::sync::remote::RemoteSink;
use crate::sync::types::{
    AuthSession, PassOutcome, SignalStatus, SyncAck, SyncBatch, SyncReport, SyncStatus, SyncSummary,
};

/// kv key holding the consecutive failed pass count for a signal.
pub fn failures_key(signal: SignalType) -> String {
    format!("sync.{signal}.consecutive_failures")
}

/// kv key holding the RFC 3339 time of the last successful pass for a signal.
pub fn last_sync_key(signal: SignalType) -> String {
    format!("sync.{signal}.last_sync_at")
}

/// Tuning for reconciliation passes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcilerOptions {
    /// Rows per remote submission, clamped to `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Consecutive failed passes before a signal is flagged as exhausted.
    pub max_failed_passes: u32,
    /// Signal types covered by [`Reconciler::reconcile_all`]. Repeats are
    /// dropped on construction.
    pub signals: Vec<SignalType>,
}

impl Default for ReconcilerOptions {
    fn default() -> Self {
        Self::from(&SyncConfig::default())
    }
}

impl From<&SyncConfig> for ReconcilerOptions {
    fn from(config: &SyncConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            max_failed_passes: config.max_failed_passes,
            signals: config.signals.clone(),
        }
    }
}

/// Drop repeated signal types, keeping first-seen order, so one table never
/// gets two concurrent passes.
fn dedup_signals(signals: &[SignalType]) -> Vec<SignalType> {
    let mut seen = HashSet::new();
    signals.iter().copied().filter(|s| seen.insert(*s)).collect()
}

struct Inner {
    store: Arc<ReadingStore>,
    sink: Arc<dyn RemoteSink>,
    auth: Arc<dyn AuthProvider>,
    options: ReconcilerOptions,
    running: AtomicUsize,
}

/// Moves pending readings to the remote sink.
///
/// Cheap to clone; clones share the same store, sink and bookkeeping.
#[derive(Clone)]
pub struct Reconciler {
    inner: Arc<Inner>,
}

impl Reconciler {
    pub fn new(
        store: Arc<ReadingStore>,
        sink: Arc<dyn RemoteSink>,
        auth: Arc<dyn AuthProvider>,
        mut options: ReconcilerOptions,
    ) -> Self {
        options.batch_size = options.batch_size.clamp(1, MAX_BATCH_SIZE);
        options.signals = dedup_signals(&options.signals);
        Self {
            inner: Arc::new(Inner {
                store,
                sink,
                auth,
                options,
                running: AtomicUsize::new(0),
            }),
        }
    }

    pub fn options(&self) -> &ReconcilerOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.inner.store
    }

    /// Run one pass for `signal`.
    ///
    /// Never fails as a whole: remote and store errors are reported in the
    /// returned [`SyncReport`] and count towards the failure counter.
    pub async fn reconcile(&self, signal: SignalType) -> SyncReport {
        let _running = RunningGuard::enter(&self.inner.running);

        let Some(session) = self.inner.auth.session() else {
            info!(signal = %signal, "no auth session, skipping sync pass");
            let mut report = SyncReport::new(signal, PassOutcome::SkippedUnauthenticated);
            report.pending = self.inner.store.count_pending(signal).unwrap_or(0) as usize;
            return report;
        };

        let pending = match self.inner.store.query_pending(signal) {
            Ok(rows) => rows,
            Err(e) => return self.finish_failed(signal, SyncReport::new(signal, PassOutcome::Synced), e.into()),
        };

        let mut report = SyncReport::new(signal, PassOutcome::Synced);
        report.pending = pending.len();

        if pending.is_empty() {
            debug!(signal = %signal, "nothing pending");
            report.outcome = PassOutcome::NothingPending;
            return self.finish_ok(report);
        }

        for chunk in pending.chunks(self.inner.options.batch_size) {
            match self.submit_chunk(&session, signal, chunk).await {
                Ok((submitted, marked)) => {
                    report.submitted += submitted;
                    report.synced += marked;
                }
                Err(e) => return self.finish_failed(signal, report, e),
            }
        }

        info!(
            signal = %signal,
            pending = report.pending,
            synced = report.synced,
            "sync pass complete"
        );
        self.finish_ok(report)
    }

    async fn submit_chunk(
        &self,
        session: &AuthSession,
        signal: SignalType,
        chunk: &[Reading],
    ) -> Result<(usize, usize), SyncError> {
        let batch = SyncBatch {
            signal,
            readings: chunk.to_vec(),
        };

        let acked: Vec<(i64, i64)> = match self.inner.sink.submit(session, &batch).await? {
            SyncAck::All => chunk.iter().map(|r| (r.id, r.revision)).collect(),
            SyncAck::Partial(ids) => {
                let ids: HashSet<i64> = ids.into_iter().collect();
                chunk
                    .iter()
                    .filter(|r| ids.contains(&r.id))
                    .map(|r| (r.id, r.revision))
                    .collect()
            }
        };

        let marked = self.inner.store.mark_synced_revisions(signal, &acked)?;
        if marked < acked.len() {
            debug!(
                signal = %signal,
                acked = acked.len(),
                marked,
                "some acknowledged rows changed during the pass and stay pending"
            );
        }
        Ok((chunk.len(), marked))
    }

    fn finish_ok(&self, mut report: SyncReport) -> SyncReport {
        let signal = report.signal;
        let now = Utc::now().to_rfc3339();
        if let Err(e) = self
            .inner
            .store
            .kv_set(&failures_key(signal), "0")
            .and_then(|()| self.inner.store.kv_set(&last_sync_key(signal), &now))
        {
            warn!(signal = %signal, error = %e, "failed to record sync bookkeeping");
        }
        report.consecutive_failures = 0;
        report
    }

    fn finish_failed(&self, signal: SignalType, mut report: SyncReport, error: SyncError) -> SyncReport {
        let failures = self.consecutive_failures(signal).saturating_add(1);
        if let Err(e) = self.inner.store.kv_set(&failures_key(signal), &failures.to_string()) {
            warn!(signal = %signal, error = %e, "failed to record sync failure count");
        }

        let max = self.inner.options.max_failed_passes;
        report.consecutive_failures = failures;
        report.retries_exhausted = max > 0 && failures >= max;
        report.outcome = PassOutcome::Failed {
            reason: error.to_string(),
        };

        if report.retries_exhausted {
            warn!(
                signal = %signal,
                failures,
                error = %error,
                "sync keeps failing, rows remain pending"
            );
        } else {
            info!(signal = %signal, failures, error = %error, "sync pass failed, will retry");
        }
        report
    }

    fn consecutive_failures(&self, signal: SignalType) -> u32 {
        read_failures(&self.inner.store, signal)
    }

    /// Run a pass for every configured signal type concurrently.
    ///
    /// Passes are independent: one signal failing does not affect the
    /// others. Dropping the returned future aborts the passes still running.
    pub async fn reconcile_all(&self) -> SyncSummary {
        let started_at = Utc::now();
        let mut tasks = JoinSet::new();
        for &signal in &self.inner.options.signals {
            let this = self.clone();
            tasks.spawn(async move { this.reconcile(signal).await });
        }

        let mut reports = Vec::with_capacity(self.inner.options.signals.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(report) => reports.push(report),
                Err(e) => warn!(error = %e, "sync task aborted"),
            }
        }

        // A panicked pass still shows up in the summary.
        for &signal in &self.inner.options.signals {
            if !reports.iter().any(|r| r.signal == signal) {
                let report = SyncReport::new(signal, PassOutcome::Synced);
                reports.push(self.finish_failed(signal, report, SyncError::Task("pass aborted".into())));
            }
        }
        reports.sort_by_key(|r| r.signal);

        SyncSummary {
            started_at,
            finished_at: Utc::now(),
            reports,
        }
    }

    /// Snapshot of pending counts and pass bookkeeping.
    pub fn status(&self) -> Result<SyncStatus, StorageError> {
        let mut status = sync_status(&self.inner.store)?;
        status.in_progress = self.inner.running.load(Ordering::SeqCst) > 0;
        Ok(status)
    }
}

fn read_failures(store: &ReadingStore, signal: SignalType) -> u32 {
    store
        .kv_get(&failures_key(signal))
        .ok()
        .flatten()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn read_last_sync(store: &ReadingStore, signal: SignalType) -> Result<Option<DateTime<Utc>>, StorageError> {
    Ok(store
        .kv_get(&last_sync_key(signal))?
        .and_then(|v| DateTime::parse_from_rfc3339(&v).ok())
        .map(|dt| dt.with_timezone(&Utc)))
}

/// Sync bookkeeping as recorded in `store`, without a live reconciler.
pub fn sync_status(store: &ReadingStore) -> Result<SyncStatus, StorageError> {
    let mut status = SyncStatus::default();
    for signal in SignalType::ALL {
        let signal_status = SignalStatus {
            total: store.count(signal)?,
            pending: store.count_pending(signal)?,
            consecutive_failures: read_failures(store, signal),
            last_sync_at: read_last_sync(store, signal)?,
        };
        status.pending_count += signal_status.pending;
        status.last_sync_at = status.last_sync_at.max(signal_status.last_sync_at);
        status.signals.insert(signal, signal_status);
    }
    Ok(status)
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl<'a> RunningGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
