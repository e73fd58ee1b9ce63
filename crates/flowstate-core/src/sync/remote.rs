//! Remote submission of reading batches.
//!
//! [`RemoteSink`] is the seam the reconciler talks to. [`PostgrestSink`] is
//! the production implementation: one `POST` per batch against a PostgREST
//! table, with merge-duplicates resolution so a resubmitted row updates the
//! remote copy instead of failing.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::error::SyncError;
use crate::readings::{Reading, SignalPayload, SignalType};
use crate::storage::RemoteConfig;
use crate::sync::types::{AuthSession, SyncAck, SyncBatch};

/// Version tag attached to uploaded energy predictions.
pub const PREDICTION_MODEL_VERSION: &str = "v1.0";

const MANUAL_SOURCE: &str = "manual_entry";
const REACTION_TEST_TYPE: &str = "visual";

/// Destination for pending readings.
#[async_trait]
pub trait RemoteSink: Send + Sync {
    /// Submit one batch. On `Err` nothing in the batch counts as accepted.
    async fn submit(&self, session: &AuthSession, batch: &SyncBatch) -> Result<SyncAck, SyncError>;
}

/// Remote table and its natural-key columns for a signal type.
pub fn remote_table(signal: SignalType) -> (&'static str, &'static str) {
    match signal {
        SignalType::HeartRate => ("heart_rate_readings", "user_id,timestamp"),
        SignalType::Sleep => ("sleep_sessions", "user_id,sleep_start"),
        SignalType::Typing => ("typing_speed_tests", "user_id,timestamp"),
        SignalType::Reaction => ("reaction_time_tests", "user_id,timestamp"),
        SignalType::Prediction => ("energy_predictions", "user_id,prediction_time"),
    }
}

/// ISO-8601 UTC with millisecond precision, e.g. `2024-01-01T08:00:00.000Z`.
pub fn format_timestamp(ms: i64) -> Result<String, SyncError> {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .ok_or_else(|| SyncError::Encoding(format!("timestamp {ms} is out of range")))
}

/// Map a stored reading to the remote row shape.
///
/// PostgREST bulk inserts require every object in the array to carry the same
/// keys, so optional columns are sent as `null` rather than omitted.
pub fn to_remote_row(user_id: &str, reading: &Reading) -> Result<Value, SyncError> {
    let timestamp = format_timestamp(reading.timestamp_ms)?;

    let row = match &reading.payload {
        SignalPayload::HeartRate { bpm } => json!({
            "user_id": user_id,
            "timestamp": timestamp,
            "heart_rate_bpm": bpm,
            "source": MANUAL_SOURCE,
        }),
        SignalPayload::Sleep {
            end_ms,
            duration_min,
        } => {
            let sleep_end = (*end_ms).map(format_timestamp).transpose()?;
            json!({
                "user_id": user_id,
                "sleep_start": timestamp,
                "sleep_end": sleep_end,
                "duration_minutes": duration_min,
                "source": MANUAL_SOURCE,
            })
        }
        SignalPayload::Typing {
            wpm,
            accuracy,
            total_chars,
            errors,
            duration_secs,
            sample_text,
        } => json!({
            "user_id": user_id,
            "timestamp": timestamp,
            "words_per_minute": wpm,
            "accuracy_percentage": accuracy,
            "total_characters": (*total_chars > 0).then_some(*total_chars),
            "errors": (*errors > 0).then_some(*errors),
            "sample_text": sample_text.as_deref().filter(|s| !s.is_empty()),
            "duration_seconds": (*duration_secs > 0).then_some(*duration_secs),
        }),
        SignalPayload::Reaction {
            median_ms,
            test_count,
        } => json!({
            "user_id": user_id,
            "timestamp": timestamp,
            "reaction_time_ms": median_ms,
            "test_type": REACTION_TEST_TYPE,
            "attempts": test_count,
            "average_reaction_time_ms": f64::from(*median_ms),
        }),
        SignalPayload::Prediction { level, confidence } => json!({
            "user_id": user_id,
            "prediction_time": timestamp,
            "predicted_level": level.as_str(),
            "confidence_score": confidence,
            "ml_model_version": PREDICTION_MODEL_VERSION,
        }),
    };

    Ok(row)
}

/// PostgREST (Supabase-style) sink.
#[derive(Debug, Clone)]
pub struct PostgrestSink {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
}

impl PostgrestSink {
    pub fn new(base_url: &str, api_key: impl Into<String>, timeout: Duration) -> Result<Self, SyncError> {
        let mut base_url = Url::parse(base_url.trim())?;
        // `Url::join` drops the last path segment unless it ends in a slash.
        let path = format!("{}/", base_url.path().trim_end_matches('/'));
        base_url.set_path(&path);

        let client = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url,
            api_key: api_key.into(),
        })
    }

    pub fn from_config(remote: &RemoteConfig) -> Result<Self, SyncError> {
        if !remote.is_configured() {
            return Err(SyncError::NotConfigured);
        }
        Self::new(&remote.base_url, remote.api_key.clone(), remote.request_timeout())
    }

    /// `{base}/rest/v1/{table}?on_conflict={keys}`
    pub fn endpoint(&self, signal: SignalType) -> Result<Url, SyncError> {
        let (table, conflict_keys) = remote_table(signal);
        let mut url = self.base_url.join(&format!("rest/v1/{table}"))?;
        url.query_pairs_mut().append_pair("on_conflict", conflict_keys);
        Ok(url)
    }
}

#[async_trait]
impl RemoteSink for PostgrestSink {
    async fn submit(&self, session: &AuthSession, batch: &SyncBatch) -> Result<SyncAck, SyncError> {
        if batch.readings.is_empty() {
            return Ok(SyncAck::All);
        }

        let rows = batch
            .readings
            .iter()
            .map(|reading| to_remote_row(&session.user_id, reading))
            .collect::<Result<Vec<_>, _>>()?;
        let url = self.endpoint(batch.signal)?;

        debug!(signal = %batch.signal, rows = rows.len(), %url, "submitting batch");

        let response = self
            .client
            .post(url)
            .header("apikey", &self.api_key)
            .bearer_auth(&session.access_token)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&rows)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(SyncAck::All);
        }

        let body = response.text().await.unwrap_or_default();
        warn!(signal = %batch.signal, status = status.as_u16(), "remote rejected batch");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::AuthenticationRequired,
            StatusCode::TOO_MANY_REQUESTS => SyncError::RateLimited,
            _ => SyncError::Remote {
                status: status.as_u16(),
                body,
            },
        })
    }
}
