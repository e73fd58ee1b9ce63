//! Core types for remote synchronization.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::readings::{Reading, SignalType};

/// Credentials handed over by the auth collaborator for one pass.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user_id: String,
    pub access_token: String,
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// One bounded submission to the remote endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncBatch {
    pub signal: SignalType,
    pub readings: Vec<Reading>,
}

/// Remote acknowledgment of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncAck {
    /// Every row in the batch was accepted.
    All,
    /// Only these row ids were accepted; the rest stay pending.
    Partial(Vec<i64>),
}

/// How a reconciliation pass ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PassOutcome {
    /// Nothing was pending, the remote was not contacted.
    NothingPending,
    /// Every submitted chunk was acknowledged (fully or partially).
    Synced,
    /// No auth session; rows left pending without contacting the remote.
    SkippedUnauthenticated,
    /// A submission or store update failed; unacknowledged rows stay pending.
    Failed { reason: String },
}

/// Result of one reconciliation pass for one signal type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncReport {
    pub signal: SignalType,
    pub outcome: PassOutcome,
    /// Pending rows found at the start of the pass.
    pub pending: usize,
    /// Rows sent to the remote.
    pub submitted: usize,
    /// Rows transitioned to synced.
    pub synced: usize,
    pub consecutive_failures: u32,
    /// Set once `consecutive_failures` reaches the configured limit. Rows are
    /// still retried on every pass.
    pub retries_exhausted: bool,
}

impl SyncReport {
    pub(crate) fn new(signal: SignalType, outcome: PassOutcome) -> Self {
        Self {
            signal,
            outcome,
            pending: 0,
            submitted: 0,
            synced: 0,
            consecutive_failures: 0,
            retries_exhausted: false,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, PassOutcome::Failed { .. })
    }
}

/// Reports of one pass over every tracked signal type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub reports: Vec<SyncReport>,
}

impl SyncSummary {
    pub fn total_synced(&self) -> usize {
        self.reports.iter().map(|r| r.synced).sum()
    }

    pub fn failed_signals(&self) -> Vec<SignalType> {
        self.reports
            .iter()
            .filter(|r| r.is_failure())
            .map(|r| r.signal)
            .collect()
    }

    pub fn report(&self, signal: SignalType) -> Option<&SyncReport> {
        self.reports.iter().find(|r| r.signal == signal)
    }
}

/// Per-signal sync bookkeeping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SignalStatus {
    pub total: u64,
    pub pending: u64,
    pub consecutive_failures: u32,
    pub last_sync_at: Option<DateTime<Utc>>,
}

/// Current sync status.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncStatus {
    /// Most recent successful pass over any signal.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// Number of rows waiting for remote acknowledgment.
    pub pending_count: u64,
    /// Whether a pass is currently in progress.
    pub in_progress: bool,
    pub signals: std::collections::BTreeMap<SignalType, SignalStatus>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_session_debug_hides_token() {
        let session = AuthSession {
            user_id: "user-1".into(),
            access_token: "secret-token".into(),
        };
        let printed = format!("{session:?}");
        assert!(printed.contains("user-1"));
        assert!(!printed.contains("secret-token"));
    }

    #[test]
    fn summary_collects_failures() {
        let mut ok = SyncReport::new(SignalType::HeartRate, PassOutcome::Synced);
        ok.synced = 3;
        let failed = SyncReport::new(
            SignalType::Sleep,
            PassOutcome::Failed {
                reason: "timeout".into(),
            },
        );
        let summary = SyncSummary {
            started_at: Utc::now(),
            finished_at: Utc::now(),
            reports: vec![ok, failed],
        };
        assert_eq!(summary.total_synced(), 3);
        assert_eq!(summary.failed_signals(), vec![SignalType::Sleep]);
        assert!(summary.report(SignalType::Typing).is_none());
    }

    #[test]
    fn outcome_serializes_with_kind_tag() {
        let json = serde_json::to_value(PassOutcome::Failed {
            reason: "status 500".into(),
        })
        .unwrap();
        assert_eq!(json["kind"], "failed");
        assert_eq!(json["reason"], "status 500");
    }
}
