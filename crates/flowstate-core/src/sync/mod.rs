//! Remote synchronization layer.
//!
//! Local rows are the source of truth. The [`Reconciler`] pushes pending rows
//! to a [`RemoteSink`] and flips them to synced once acknowledged; the
//! [`PostgrestSink`] is the production sink.

pub mod auth;
pub mod reconciler;
pub mod remote;
pub mod types;

pub use auth::{AuthProvider, StaticAuth};
pub use reconciler::{sync_status, Reconciler, ReconcilerOptions};
pub use remote::{PostgrestSink, RemoteSink};
pub use types::{
    AuthSession, PassOutcome, SignalStatus, SyncAck, SyncBatch, SyncReport, SyncStatus, SyncSummary,
};
