use flowstate_core::{Config, FlowstateService};
use tracing::info;

/// Keep the periodic sync job running until Ctrl-C.
pub fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;
    let service = FlowstateService::from_config(&config)?;
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async {
        service.start()?;
        info!(period_minutes = config.sync.period_minutes, "flowstate daemon running");

        tokio::signal::ctrl_c().await?;
        info!("shutting down");
        service.shutdown().await;
        Ok::<_, Box<dyn std::error::Error>>(())
    })
}
