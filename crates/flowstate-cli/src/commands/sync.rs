//! Sync subcommand: one-off reconciliation passes and status.

use clap::Subcommand;
use flowstate_core::sync::sync_status;
use flowstate_core::{Config, FlowstateService, SignalType};

use super::open_store;

#[derive(Subcommand)]
pub enum SyncAction {
    /// Run one reconciliation pass now
    Run {
        /// Only this signal type (default: every configured signal)
        #[arg(short, long)]
        signal: Option<SignalType>,
    },
    /// Show pending counts and the last successful sync
    Status,
}

pub fn run(action: SyncAction) -> Result<(), Box<dyn std::error::Error>> {
    match action {
        SyncAction::Run { signal } => run_pass(signal),
        SyncAction::Status => show_status(),
    }
}

fn run_pass(signal: Option<SignalType>) -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let service = FlowstateService::from_config(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    let json = match signal {
        Some(signal) => {
            let report = runtime.block_on(service.reconciler().reconcile(signal));
            serde_json::to_string_pretty(&report)?
        }
        None => {
            let summary = runtime.block_on(service.sync_now());
            serde_json::to_string_pretty(&summary)?
        }
    };
    println!("{json}");
    Ok(())
}

fn show_status() -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let status = sync_status(&store)?;
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}
