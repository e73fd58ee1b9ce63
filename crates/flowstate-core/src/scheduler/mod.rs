//! Named periodic background jobs.
//!
//! This module provides the registry the sync service uses to run its
//! reconciliation pass on a fixed period:
//! - Jobs are registered under a unique name; registering an existing name is
//!   a no-op that keeps the running job
//! - The first firing happens immediately, later firings follow the period
//! - Firings of one job never overlap; ticks missed while a firing runs are
//!   skipped
//! - Cancellation stops the loop and aborts an in-flight firing

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::SchedulingError;

/// Work executed on every firing.
#[async_trait]
pub trait PeriodicJob: Send + Sync + 'static {
    async fn run(&self);
}

/// Result of a schedule request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleOutcome {
    Registered,
    /// A job with this name is already running and was left untouched.
    AlreadyRegistered,
}

/// Snapshot of a registered job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobStatus {
    pub name: String,
    pub period: Duration,
    /// Firings started so far.
    pub firings: u64,
    /// A firing is in progress right now.
    pub running: bool,
    pub last_fired_at: Option<DateTime<Utc>>,
}

/// Registers and cancels named periodic jobs.
pub trait PeriodicJobRegistry: Send + Sync {
    fn schedule(
        &self,
        name: &str,
        period: Duration,
        job: Arc<dyn PeriodicJob>,
    ) -> Result<ScheduleOutcome, SchedulingError>;

    /// Returns `false` if no job had this name.
    fn cancel(&self, name: &str) -> bool;

    fn status(&self, name: &str) -> Option<JobStatus>;
}

#[derive(Default)]
struct JobState {
    firings: AtomicU64,
    running: AtomicBool,
    last_fired_at: Mutex<Option<DateTime<Utc>>>,
}

struct JobEntry {
    period: Duration,
    token: CancellationToken,
    task: JoinHandle<()>,
    state: Arc<JobState>,
}

/// [`PeriodicJobRegistry`] backed by tokio tasks.
pub struct TokioJobRegistry {
    runtime: Option<Handle>,
    jobs: Mutex<HashMap<String, JobEntry>>,
    root: CancellationToken,
}

impl Default for TokioJobRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TokioJobRegistry {
    /// Jobs are spawned on the runtime current at `schedule` time.
    pub fn new() -> Self {
        Self {
            runtime: None,
            jobs: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Jobs are spawned on `runtime`, wherever `schedule` is called from.
    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            runtime: Some(runtime),
            jobs: Mutex::new(HashMap::new()),
            root: CancellationToken::new(),
        }
    }

    fn lock_jobs(&self) -> std::sync::MutexGuard<'_, HashMap<String, JobEntry>> {
        match self.jobs.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn job_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.lock_jobs().keys().cloned().collect();
        names.sort();
        names
    }

    /// Firings started for `name`; 0 when unregistered.
    pub fn firings(&self, name: &str) -> u64 {
        self.lock_jobs()
            .get(name)
            .map_or(0, |entry| entry.state.firings.load(Ordering::SeqCst))
    }

    /// Cancel every job and wait for their loops to exit.
    pub async fn shutdown(&self) {
        self.root.cancel();
        let entries: Vec<(String, JobEntry)> = self.lock_jobs().drain().collect();
        for (name, entry) in entries {
            if let Err(e) = entry.task.await {
                if e.is_panic() {
                    warn!(job = %name, "job loop panicked");
                }
            }
        }
        info!("job registry shut down");
    }
}

impl Drop for TokioJobRegistry {
    fn drop(&mut self) {
        self.root.cancel();
    }
}

impl PeriodicJobRegistry for TokioJobRegistry {
    fn schedule(
        &self,
        name: &str,
        period: Duration,
        job: Arc<dyn PeriodicJob>,
    ) -> Result<ScheduleOutcome, SchedulingError> {
        if period.is_zero() {
            return Err(SchedulingError::InvalidPeriod { job: name.to_string() });
        }
        let runtime = match &self.runtime {
            Some(handle) => handle.clone(),
            None => Handle::try_current().map_err(|_| SchedulingError::RuntimeUnavailable {
                job: name.to_string(),
            })?,
        };

        let mut jobs = self.lock_jobs();
        if let Some(existing) = jobs.get(name) {
            if !existing.task.is_finished() {
                debug!(job = name, "job already registered, keeping existing");
                return Ok(ScheduleOutcome::AlreadyRegistered);
            }
        }

        let token = self.root.child_token();
        let state = Arc::new(JobState::default());
        let task = runtime.spawn(run_loop(
            name.to_string(),
            period,
            job,
            token.clone(),
            state.clone(),
        ));

        jobs.insert(
            name.to_string(),
            JobEntry {
                period,
                token,
                task,
                state,
            },
        );
        info!(job = name, period_secs = period.as_secs(), "job scheduled");
        Ok(ScheduleOutcome::Registered)
    }

    fn cancel(&self, name: &str) -> bool {
        match self.lock_jobs().remove(name) {
            Some(entry) => {
                entry.token.cancel();
                info!(job = name, "job cancelled");
                true
            }
            None => false,
        }
    }

    fn status(&self, name: &str) -> Option<JobStatus> {
        let jobs = self.lock_jobs();
        let entry = jobs.get(name)?;
        let last_fired_at = match entry.state.last_fired_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        Some(JobStatus {
            name: name.to_string(),
            period: entry.period,
            firings: entry.state.firings.load(Ordering::SeqCst),
            running: entry.state.running.load(Ordering::SeqCst),
            last_fired_at,
        })
    }
}

async fn run_loop(
    name: String,
    period: Duration,
    job: Arc<dyn PeriodicJob>,
    token: CancellationToken,
    state: Arc<JobState>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        state.firings.fetch_add(1, Ordering::SeqCst);
        state.running.store(true, Ordering::SeqCst);
        if let Ok(mut last) = state.last_fired_at.lock() {
            *last = Some(Utc::now());
        }

        // Each firing is its own task so a panicking job does not end the loop.
        let firing = tokio::spawn({
            let job = job.clone();
            async move { job.run().await }
        });
        let abort = firing.abort_handle();

        tokio::select! {
            biased;
            _ = token.cancelled() => {
                abort.abort();
                state.running.store(false, Ordering::SeqCst);
                break;
            }
            joined = firing => {
                if let Err(e) = joined {
                    if e.is_panic() {
                        warn!(job = %name, "job firing panicked");
                    }
                }
            }
        }
        state.running.store(false, Ordering::SeqCst);
    }

    debug!(job = %name, "job loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const HOUR: Duration = Duration::from_secs(3600);

    #[derive(Default)]
    struct CountingJob {
        runs: AtomicUsize,
        active: AtomicUsize,
        max_active: AtomicUsize,
        work: Duration,
    }

    impl CountingJob {
        fn taking(work: Duration) -> Arc<Self> {
            Arc::new(Self {
                work,
                ..Self::default()
            })
        }

        fn runs(&self) -> usize {
            self.runs.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PeriodicJob for CountingJob {
        async fn run(&self) {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);
            if !self.work.is_zero() {
                tokio::time::sleep(self.work).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn schedule_without_runtime_fails() {
        let registry = TokioJobRegistry::new();
        let err = registry
            .schedule("sync", HOUR, CountingJob::taking(Duration::ZERO))
            .unwrap_err();
        assert_eq!(err, SchedulingError::RuntimeUnavailable { job: "sync".into() });
    }

    #[tokio::test(start_paused = true)]
    async fn zero_period_is_rejected() {
        let registry = TokioJobRegistry::new();
        let err = registry
            .schedule("sync", Duration::ZERO, CountingJob::taking(Duration::ZERO))
            .unwrap_err();
        assert!(matches!(err, SchedulingError::InvalidPeriod { .. }));
        assert!(registry.status("sync").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn fires_immediately_then_every_period() {
        let registry = TokioJobRegistry::new();
        let job = CountingJob::taking(Duration::ZERO);
        registry.schedule("sync", HOUR, job.clone()).unwrap();

        tokio::time::sleep(HOUR * 2 + Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 3);

        let status = registry.status("sync").unwrap();
        assert_eq!(status.firings, 3);
        assert_eq!(status.period, HOUR);
        assert!(status.last_fired_at.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn second_schedule_keeps_existing_job() {
        let registry = TokioJobRegistry::new();
        let first = CountingJob::taking(Duration::ZERO);
        let second = CountingJob::taking(Duration::ZERO);

        assert_eq!(
            registry.schedule("sync", HOUR, first.clone()).unwrap(),
            ScheduleOutcome::Registered
        );
        assert_eq!(
            registry.schedule("sync", HOUR, second.clone()).unwrap(),
            ScheduleOutcome::AlreadyRegistered
        );

        tokio::time::sleep(HOUR * 2 + Duration::from_secs(60)).await;
        assert_eq!(first.runs(), 3);
        assert_eq!(second.runs(), 0);
        assert_eq!(registry.job_names(), vec!["sync".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn firings_never_overlap() {
        let registry = TokioJobRegistry::new();
        let job = CountingJob::taking(HOUR + HOUR / 2);
        registry.schedule("slow", HOUR, job.clone()).unwrap();

        tokio::time::sleep(HOUR * 6).await;
        assert!(job.runs() >= 2);
        assert_eq!(job.max_active.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_stops_future_firings() {
        let registry = TokioJobRegistry::new();
        let job = CountingJob::taking(Duration::ZERO);
        registry.schedule("sync", HOUR, job.clone()).unwrap();

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(job.runs(), 1);

        assert!(registry.cancel("sync"));
        assert!(!registry.cancel("sync"));
        assert!(registry.status("sync").is_none());

        tokio::time::sleep(HOUR * 3).await;
        assert_eq!(job.runs(), 1);

        // The name is free again.
        assert_eq!(
            registry.schedule("sync", HOUR, job.clone()).unwrap(),
            ScheduleOutcome::Registered
        );
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_all_jobs() {
        let registry = TokioJobRegistry::new();
        let a = CountingJob::taking(Duration::ZERO);
        let b = CountingJob::taking(HOUR * 10);
        registry.schedule("a", HOUR, a.clone()).unwrap();
        registry.schedule("b", HOUR, b.clone()).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        registry.shutdown().await;
        assert!(registry.job_names().is_empty());
        assert_eq!(b.active.load(Ordering::SeqCst), 1, "aborted firing never finished");

        tokio::time::sleep(HOUR * 3).await;
        assert_eq!(a.runs(), 1);
        assert_eq!(b.runs(), 1);
    }
}
