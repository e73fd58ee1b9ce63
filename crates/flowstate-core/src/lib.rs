//! # Flowstate Core Library
//!
//! Local-first storage and background sync for physiological and behavioral
//! signals (heart rate, sleep, typing speed, reaction time, energy
//! predictions). Collectors write readings locally and never wait on the
//! network; a periodic job later pushes unsynced rows to the remote store.
//!
//! ## Architecture
//!
//! - **Storage**: SQLite tables, one per signal type, keyed by timestamp, plus
//!   TOML configuration
//! - **Ingestion**: range checks in front of idempotent upserts
//! - **Sync**: reconciliation passes that submit pending rows in bounded
//!   batches and mark them synced only once acknowledged
//! - **Scheduler**: named periodic jobs with keep-existing registration
//!
//! ## Key Components
//!
//! - [`ReadingStore`]: Reading persistence
//! - [`Ingestor`]: Validating ingestion API for collectors
//! - [`Reconciler`]: Pending-row reconciliation against a [`RemoteSink`]
//! - [`TokioJobRegistry`]: Periodic job registry
//! - [`FlowstateService`]: Wiring of all of the above

pub mod error;
pub mod export;
pub mod ingest;
pub mod readings;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod sync;

pub use error::{ConfigError, CoreError, SchedulingError, StorageError, SyncError, ValidationError};
pub use ingest::{Ingestor, TypingSample};
pub use readings::{EnergyLevel, NewReading, Reading, SignalPayload, SignalType};
pub use scheduler::{JobStatus, PeriodicJob, PeriodicJobRegistry, ScheduleOutcome, TokioJobRegistry};
pub use service::{FlowstateService, SyncJob, SYNC_JOB_NAME};
pub use storage::{Config, ReadingStore};
pub use sync::{
    AuthProvider, AuthSession, PostgrestSink, Reconciler, ReconcilerOptions, RemoteSink,
    StaticAuth, SyncAck, SyncBatch, SyncReport, SyncStatus, SyncSummary,
};
