use clap::Args;
use std::path::PathBuf;

use super::open_store;

#[derive(Args)]
pub struct ExportArgs {
    /// Output file (default: stdout)
    #[arg(short, long)]
    pub out: Option<PathBuf>,
    /// Inclusive start, epoch milliseconds
    #[arg(long, default_value_t = 0)]
    pub start: i64,
    /// Exclusive end, epoch milliseconds
    #[arg(long, default_value_t = i64::MAX)]
    pub end: i64,
}

pub fn run(args: ExportArgs) -> Result<(), Box<dyn std::error::Error>> {
    let store = open_store()?;
    let json = flowstate_core::export::export_json(&store, args.start, args.end)?;

    match args.out {
        Some(path) => {
            std::fs::write(&path, json)?;
            eprintln!("exported to {}", path.display());
        }
        None => println!("{json}"),
    }
    Ok(())
}
