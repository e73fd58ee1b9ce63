//! Process-level wiring of store, ingestion, reconciliation and scheduling.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::error::{CoreError, SchedulingError, StorageError};
use crate::ingest::Ingestor;
use crate::scheduler::{PeriodicJob, PeriodicJobRegistry, ScheduleOutcome, TokioJobRegistry};
use crate::storage::{Config, ReadingStore};
use crate::sync::{
    AuthProvider, PostgrestSink, Reconciler, ReconcilerOptions, RemoteSink, StaticAuth,
    SyncStatus, SyncSummary,
};

/// Unique name of the background sync job.
pub const SYNC_JOB_NAME: &str = "flowstate-remote-sync";

/// Runs a reconciliation pass over every tracked signal on each firing.
pub struct SyncJob {
    reconciler: Reconciler,
}

impl SyncJob {
    pub fn new(reconciler: Reconciler) -> Self {
        Self { reconciler }
    }
}

#[async_trait]
impl PeriodicJob for SyncJob {
    async fn run(&self) {
        let summary = self.reconciler.reconcile_all().await;
        let failed = summary.failed_signals();
        info!(
            synced = summary.total_synced(),
            failed = failed.len(),
            "periodic sync finished"
        );
    }
}

/// Everything a running flowstate process needs.
pub struct FlowstateService {
    store: Arc<ReadingStore>,
    ingestor: Ingestor,
    reconciler: Reconciler,
    registry: Arc<TokioJobRegistry>,
    sync_period: Duration,
}

impl FlowstateService {
    pub fn new(
        store: Arc<ReadingStore>,
        sink: Arc<dyn RemoteSink>,
        auth: Arc<dyn AuthProvider>,
        options: ReconcilerOptions,
        sync_period: Duration,
    ) -> Self {
        let reconciler = Reconciler::new(store.clone(), sink, auth, options);
        Self {
            ingestor: Ingestor::new(store.clone()),
            store,
            reconciler,
            registry: Arc::new(TokioJobRegistry::new()),
            sync_period,
        }
    }

    /// Open the configured database and remote endpoint.
    ///
    /// # Errors
    /// Fails if the remote is not configured, the database cannot be opened,
    /// or the config is invalid.
    pub fn from_config(config: &Config) -> Result<Self, CoreError> {
        config.validate()?;
        let sink = PostgrestSink::from_config(&config.remote)?;
        let store = ReadingStore::open(config.database_path()?)?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(sink),
            Arc::new(StaticAuth::from_config(&config.remote)),
            ReconcilerOptions::from(&config.sync),
            config.sync.period(),
        ))
    }

    pub fn store(&self) -> &Arc<ReadingStore> {
        &self.store
    }

    pub fn ingestor(&self) -> &Ingestor {
        &self.ingestor
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn registry(&self) -> &Arc<TokioJobRegistry> {
        &self.registry
    }

    /// Start-up hook: register the periodic sync job.
    ///
    /// Calling this again while the job is alive is a no-op. A scheduling
    /// failure is logged and returned; local ingestion keeps working.
    pub fn start(&self) -> Result<ScheduleOutcome, SchedulingError> {
        let job = Arc::new(SyncJob::new(self.reconciler.clone()));
        match self.registry.schedule(SYNC_JOB_NAME, self.sync_period, job) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(job = SYNC_JOB_NAME, error = %e, "failed to schedule sync job");
                Err(e)
            }
        }
    }

    /// Run one pass now, outside the schedule.
    pub async fn sync_now(&self) -> SyncSummary {
        self.reconciler.reconcile_all().await
    }

    pub fn status(&self) -> Result<SyncStatus, StorageError> {
        self.reconciler.status()
    }

    /// Cancel the sync job and wait for it to stop. Rows of an interrupted
    /// pass stay pending.
    pub async fn shutdown(&self) {
        self.registry.shutdown().await;
    }
}
