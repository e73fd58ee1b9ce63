//! Ingestion API used by collectors.
//!
//! Collectors (heart-rate reader, sleep reader, typing test, reaction test,
//! prediction producer) hand raw measurements to an [`Ingestor`], which
//! range-checks them and upserts them into the [`ReadingStore`]. Nothing is
//! written for a reading that fails validation, and no network I/O happens
//! here.

use std::sync::Arc;

use chrono::DateTime;
use tracing::debug;

use crate::error::{CoreError, ValidationError};
use crate::readings::{EnergyLevel, NewReading, SignalPayload, SignalType};
use crate::storage::ReadingStore;

pub const MAX_BPM: u32 = 300;
pub const MAX_WPM: u32 = 400;
pub const MAX_SLEEP_MINUTES: u32 = 24 * 60;
pub const MAX_REACTION_MS: u32 = 10_000;

/// Typing test result as produced by the typing collector.
#[derive(Debug, Clone, PartialEq)]
pub struct TypingSample {
    pub wpm: u32,
    pub accuracy: f64,
    pub total_chars: u32,
    pub errors: u32,
    pub duration_secs: u32,
    pub sample_text: Option<String>,
}

/// Validating front door to the reading store.
#[derive(Clone)]
pub struct Ingestor {
    store: Arc<ReadingStore>,
}

impl Ingestor {
    pub fn new(store: Arc<ReadingStore>) -> Self {
        Self { store }
    }

    /// Validate and upsert a single reading. Returns the row id.
    pub fn record(&self, reading: NewReading) -> Result<i64, CoreError> {
        let reading = normalize(reading)?;
        let signal = reading.signal_type();
        let id = self.store.upsert(signal, &reading)?;
        debug!(signal = %signal, timestamp_ms = reading.timestamp_ms, id, "reading recorded");
        Ok(id)
    }

    /// Validate every reading, then upsert them in one transaction.
    /// One invalid item rejects the whole batch.
    pub fn record_batch(
        &self,
        signal: SignalType,
        readings: Vec<NewReading>,
    ) -> Result<Vec<i64>, CoreError> {
        let readings = readings
            .into_iter()
            .map(normalize)
            .collect::<Result<Vec<_>, _>>()?;
        let ids = self.store.upsert_batch(signal, &readings)?;
        debug!(signal = %signal, count = ids.len(), "batch recorded");
        Ok(ids)
    }

    pub fn record_heart_rate(&self, timestamp_ms: i64, bpm: u32) -> Result<i64, CoreError> {
        self.record(NewReading::new(timestamp_ms, SignalPayload::HeartRate { bpm }))
    }

    /// `end_ms` is `None` for a session still in progress.
    pub fn record_sleep(
        &self,
        start_ms: i64,
        end_ms: Option<i64>,
        duration_min: Option<u32>,
    ) -> Result<i64, CoreError> {
        self.record(NewReading::new(
            start_ms,
            SignalPayload::Sleep {
                end_ms,
                duration_min,
            },
        ))
    }

    pub fn record_typing(&self, timestamp_ms: i64, sample: TypingSample) -> Result<i64, CoreError> {
        self.record(NewReading::new(
            timestamp_ms,
            SignalPayload::Typing {
                wpm: sample.wpm,
                accuracy: sample.accuracy,
                total_chars: sample.total_chars,
                errors: sample.errors,
                duration_secs: sample.duration_secs,
                sample_text: sample.sample_text,
            },
        ))
    }

    pub fn record_reaction(
        &self,
        timestamp_ms: i64,
        median_ms: u32,
        test_count: u32,
    ) -> Result<i64, CoreError> {
        self.record(NewReading::new(
            timestamp_ms,
            SignalPayload::Reaction {
                median_ms,
                test_count,
            },
        ))
    }

    pub fn record_prediction(
        &self,
        timestamp_ms: i64,
        level: EnergyLevel,
        confidence: f64,
    ) -> Result<i64, CoreError> {
        self.record(NewReading::new(
            timestamp_ms,
            SignalPayload::Prediction { level, confidence },
        ))
    }
}

/// Timestamps must be non-negative and convertible to a calendar date, or
/// the remote row for them could never be built.
fn check_timestamp(ms: i64) -> Result<(), ValidationError> {
    if ms < 0 {
        return Err(ValidationError::NegativeTimestamp(ms));
    }
    if DateTime::from_timestamp_millis(ms).is_none() {
        return Err(ValidationError::TimestampOutOfRange(ms));
    }
    Ok(())
}

/// Range-check a reading and fill in derivable fields.
pub fn normalize(mut reading: NewReading) -> Result<NewReading, ValidationError> {
    check_timestamp(reading.timestamp_ms)?;
    let start = reading.timestamp_ms;

    match &mut reading.payload {
        SignalPayload::HeartRate { bpm } => {
            if *bpm == 0 || *bpm > MAX_BPM {
                return Err(ValidationError::invalid(
                    "bpm",
                    format!("{bpm} is outside 1..={MAX_BPM}"),
                ));
            }
        }
        SignalPayload::Sleep {
            end_ms,
            duration_min,
        } => {
            if let Some(end) = *end_ms {
                check_timestamp(end)?;
                if end < start {
                    return Err(ValidationError::InvalidTimeRange { start, end });
                }
                if duration_min.is_none() {
                    let minutes = (end - start) / 60_000;
                    *duration_min = Some(u32::try_from(minutes).unwrap_or(u32::MAX));
                }
            }
            if let Some(minutes) = *duration_min {
                if minutes > MAX_SLEEP_MINUTES {
                    return Err(ValidationError::invalid(
                        "duration_min",
                        format!("{minutes} exceeds {MAX_SLEEP_MINUTES}"),
                    ));
                }
            }
        }
        SignalPayload::Typing {
            wpm,
            accuracy,
            total_chars,
            errors,
            ..
        } => {
            if *wpm > MAX_WPM {
                return Err(ValidationError::invalid(
                    "wpm",
                    format!("{wpm} is outside 0..={MAX_WPM}"),
                ));
            }
            let accuracy = *accuracy;
            if !accuracy.is_finite() || !(0.0..=100.0).contains(&accuracy) {
                return Err(ValidationError::invalid(
                    "accuracy",
                    format!("{accuracy} is outside 0..=100"),
                ));
            }
            if *errors > *total_chars {
                return Err(ValidationError::invalid(
                    "errors",
                    format!("{errors} errors exceed {total_chars} characters"),
                ));
            }
        }
        SignalPayload::Reaction {
            median_ms,
            test_count,
        } => {
            if *median_ms == 0 || *median_ms > MAX_REACTION_MS {
                return Err(ValidationError::invalid(
                    "median_ms",
                    format!("{median_ms} is outside 1..={MAX_REACTION_MS}"),
                ));
            }
            if *test_count == 0 {
                return Err(ValidationError::invalid("test_count", "at least one test is required"));
            }
        }
        SignalPayload::Prediction { confidence, .. } => {
            let confidence = *confidence;
            if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
                return Err(ValidationError::invalid(
                    "confidence",
                    format!("{confidence} is outside 0.0..=1.0"),
                ));
            }
        }
    }

    Ok(reading)
}
