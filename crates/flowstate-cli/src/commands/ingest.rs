use clap::Subcommand;
use flowstate_core::{EnergyLevel, Ingestor, TypingSample};

use super::{now_ms, open_store};

#[derive(Subcommand)]
pub enum IngestAction {
    /// Heart rate sample
    HeartRate {
        /// Epoch milliseconds (default: now)
        #[arg(long)]
        ts: Option<i64>,
        #[arg(long)]
        bpm: u32,
    },
    /// Sleep session, keyed by its start
    Sleep {
        /// Session start in epoch milliseconds (default: now)
        #[arg(long)]
        ts: Option<i64>,
        /// Session end in epoch milliseconds; omit for an ongoing session
        #[arg(long)]
        end: Option<i64>,
        /// Duration in minutes; derived from --end when omitted
        #[arg(long)]
        duration: Option<u32>,
    },
    /// Typing speed test result
    Typing {
        #[arg(long)]
        ts: Option<i64>,
        #[arg(long)]
        wpm: u32,
        /// Percentage, 0-100
        #[arg(long)]
        accuracy: f64,
        #[arg(long, default_value_t = 0)]
        total_chars: u32,
        #[arg(long, default_value_t = 0)]
        errors: u32,
        #[arg(long, default_value_t = 0)]
        duration_secs: u32,
        #[arg(long)]
        sample_text: Option<String>,
    },
    /// Reaction time test result
    Reaction {
        #[arg(long)]
        ts: Option<i64>,
        /// Median reaction time in milliseconds
        #[arg(long)]
        median_ms: u32,
        /// Number of attempts
        #[arg(long)]
        tests: u32,
    },
    /// Energy prediction
    Prediction {
        #[arg(long)]
        ts: Option<i64>,
        /// HIGH, MEDIUM or LOW
        #[arg(long)]
        level: EnergyLevel,
        /// 0.0-1.0
        #[arg(long)]
        confidence: f64,
    },
}

pub fn run(action: IngestAction) -> Result<(), Box<dyn std::error::Error>> {
    let ingestor = Ingestor::new(open_store()?);

    let id = match action {
        IngestAction::HeartRate { ts, bpm } => {
            ingestor.record_heart_rate(ts.unwrap_or_else(now_ms), bpm)?
        }
        IngestAction::Sleep { ts, end, duration } => {
            ingestor.record_sleep(ts.unwrap_or_else(now_ms), end, duration)?
        }
        IngestAction::Typing {
            ts,
            wpm,
            accuracy,
            total_chars,
            errors,
            duration_secs,
            sample_text,
        } => ingestor.record_typing(
            ts.unwrap_or_else(now_ms),
            TypingSample {
                wpm,
                accuracy,
                total_chars,
                errors,
                duration_secs,
                sample_text,
            },
        )?,
        IngestAction::Reaction { ts, median_ms, tests } => {
            ingestor.record_reaction(ts.unwrap_or_else(now_ms), median_ms, tests)?
        }
        IngestAction::Prediction {
            ts,
            level,
            confidence,
        } => ingestor.record_prediction(ts.unwrap_or_else(now_ms), level, confidence)?,
    };

    println!("recorded: {id}");
    Ok(())
}
