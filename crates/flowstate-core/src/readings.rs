//! Reading model shared by the store, ingestion and sync layers.
//!
//! A [`Reading`] is one timestamped measurement of a [`SignalType`]. The
//! timestamp is the natural key: there is at most one reading per signal type
//! and timestamp.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Category of tracked signal. Each one maps to its own local table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    HeartRate,
    Sleep,
    Typing,
    Reaction,
    Prediction,
}

impl SignalType {
    pub const ALL: [SignalType; 5] = [
        SignalType::HeartRate,
        SignalType::Sleep,
        SignalType::Typing,
        SignalType::Reaction,
        SignalType::Prediction,
    ];

    /// Stable snake_case name used in config, kv keys and the CLI.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::HeartRate => "heart_rate",
            SignalType::Sleep => "sleep",
            SignalType::Typing => "typing",
            SignalType::Reaction => "reaction",
            SignalType::Prediction => "prediction",
        }
    }

    /// Local SQLite table holding this signal.
    pub fn table(&self) -> &'static str {
        match self {
            SignalType::HeartRate => "hr_local",
            SignalType::Sleep => "sleep_local",
            SignalType::Typing => "typing_local",
            SignalType::Reaction => "reaction_local",
            SignalType::Prediction => "prediction_local",
        }
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignalType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "heart_rate" | "hr" => Ok(SignalType::HeartRate),
            "sleep" => Ok(SignalType::Sleep),
            "typing" => Ok(SignalType::Typing),
            "reaction" => Ok(SignalType::Reaction),
            "prediction" => Ok(SignalType::Prediction),
            other => Err(format!(
                "unknown signal type '{other}' (expected heart_rate, sleep, typing, reaction, prediction)"
            )),
        }
    }
}

/// Energy band attached to a prediction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnergyLevel {
    High,
    Medium,
    Low,
}

impl EnergyLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnergyLevel::High => "HIGH",
            EnergyLevel::Medium => "MEDIUM",
            EnergyLevel::Low => "LOW",
        }
    }
}

impl fmt::Display for EnergyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnergyLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HIGH" => Ok(EnergyLevel::High),
            "MEDIUM" => Ok(EnergyLevel::Medium),
            "LOW" => Ok(EnergyLevel::Low),
            other => Err(format!("unknown energy level '{other}' (expected HIGH, MEDIUM, LOW)")),
        }
    }
}

/// Signal-specific fields of a reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "signal", rename_all = "snake_case")]
pub enum SignalPayload {
    HeartRate {
        bpm: u32,
    },
    Sleep {
        /// Session end in epoch milliseconds, `None` while ongoing.
        end_ms: Option<i64>,
        duration_min: Option<u32>,
    },
    Typing {
        wpm: u32,
        /// Percentage, 0-100.
        accuracy: f64,
        total_chars: u32,
        errors: u32,
        duration_secs: u32,
        sample_text: Option<String>,
    },
    Reaction {
        median_ms: u32,
        test_count: u32,
    },
    Prediction {
        level: EnergyLevel,
        /// 0.0-1.0
        confidence: f64,
    },
}

impl SignalPayload {
    pub fn signal_type(&self) -> SignalType {
        match self {
            SignalPayload::HeartRate { .. } => SignalType::HeartRate,
            SignalPayload::Sleep { .. } => SignalType::Sleep,
            SignalPayload::Typing { .. } => SignalType::Typing,
            SignalPayload::Reaction { .. } => SignalType::Reaction,
            SignalPayload::Prediction { .. } => SignalType::Prediction,
        }
    }
}

/// A reading as handed over by a collector, before it has an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReading {
    pub timestamp_ms: i64,
    pub payload: SignalPayload,
}

impl NewReading {
    pub fn new(timestamp_ms: i64, payload: SignalPayload) -> Self {
        Self {
            timestamp_ms,
            payload,
        }
    }

    pub fn signal_type(&self) -> SignalType {
        self.payload.signal_type()
    }
}

/// A stored reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub id: i64,
    pub timestamp_ms: i64,
    pub payload: SignalPayload,
    pub synced: bool,
    /// Bumped on every upsert of this timestamp.
    pub revision: i64,
}

impl Reading {
    pub fn signal_type(&self) -> SignalType {
        self.payload.signal_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_type_parses_aliases() {
        assert_eq!("heart-rate".parse::<SignalType>().unwrap(), SignalType::HeartRate);
        assert_eq!("HR".parse::<SignalType>().unwrap(), SignalType::HeartRate);
        assert_eq!("Typing".parse::<SignalType>().unwrap(), SignalType::Typing);
        assert!("steps".parse::<SignalType>().is_err());
    }

    #[test]
    fn signal_type_tables_are_distinct() {
        let mut tables: Vec<_> = SignalType::ALL.iter().map(|s| s.table()).collect();
        tables.sort();
        tables.dedup();
        assert_eq!(tables.len(), SignalType::ALL.len());
    }

    #[test]
    fn energy_level_is_case_insensitive() {
        assert_eq!("high".parse::<EnergyLevel>().unwrap(), EnergyLevel::High);
        assert_eq!(" Medium ".parse::<EnergyLevel>().unwrap(), EnergyLevel::Medium);
        assert!("PEAK".parse::<EnergyLevel>().is_err());
    }

    #[test]
    fn payload_serializes_with_signal_tag() {
        let payload = SignalPayload::Reaction {
            median_ms: 240,
            test_count: 5,
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["signal"], "reaction");
        assert_eq!(json["median_ms"], 240);
        assert_eq!(payload.signal_type(), SignalType::Reaction);
    }
}
