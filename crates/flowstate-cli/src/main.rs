use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "flowstate", version, about = "Flowstate local signal store and sync")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Record a reading
    Ingest {
        #[command(subcommand)]
        action: commands::ingest::IngestAction,
    },
    /// Readings of one signal type in [start, end)
    Query(commands::query::QueryArgs),
    /// Readings not yet acknowledged by the remote
    Pending(commands::query::PendingArgs),
    /// Remote synchronization
    Sync {
        #[command(subcommand)]
        action: commands::sync::SyncAction,
    },
    /// Run the periodic sync job until interrupted
    Daemon,
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
    /// Export local readings as JSON
    Export(commands::export::ExportArgs),
}

fn main() {
    // Logs go to stderr so JSON on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("flowstate=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Ingest { action } => commands::ingest::run(action),
        Commands::Query(args) => commands::query::run_query(args),
        Commands::Pending(args) => commands::query::run_pending(args),
        Commands::Sync { action } => commands::sync::run(action),
        Commands::Daemon => commands::daemon::run(),
        Commands::Config { action } => commands::config::run(action),
        Commands::Export(args) => commands::export::run(args),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}
