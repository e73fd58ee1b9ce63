use clap::Args;
use flowstate_core::SignalType;

use super::open_store;

#[derive(Args)]
pub struct QueryArgs {
    /// heart_rate, sleep, typing, reaction or prediction
    pub signal: SignalType,
    /// Inclusive start, epoch milliseconds
    #[arg(long, default_value_t = 0)]
    pub start: i64,
    /// Exclusive end, epoch milliseconds
    #[arg(long, default_value_t = i64::MAX)]
    pub end: i64,
}

#[derive(Args)]
pub struct PendingArgs {
    pub signal: SignalType,
    /// Return at most this many rows
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn run_query(args: QueryArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let rows = store.query_by_time_range(args.signal, args.start, args.end)?;
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}

pub fn run_pending(args: PendingArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let rows = match args.limit {
        Some(limit) => store.query_pending_limit(args.signal, limit)?,
        None => store.query_pending(args.signal)?,
    };
    println!("{}", serde_json::to_string_pretty(&rows)?);
    Ok(())
}
