use std::time::Duration;

use anyhow::{Context, Result};
use modeswitch_core::config::Settings;
use modeswitch_core::runtime::ModesRuntime;
use tracing::info;

use super::open_session;

/// Time given to the first ticks before restored switches are reasserted.
const STARTUP_SETTLE: Duration = Duration::from_secs(2);

pub async fn run(settings: Settings) -> Result<()> {
    // The session keeps holding the state lock while the daemon runs
    let session = open_session(&settings)?;
    let engine = session.engine.into_shared();

    let mut runtime = ModesRuntime::start(engine);

    tokio::select! {
        _ = tokio::time::sleep(STARTUP_SETTLE) => {
            let reasserted = runtime.host_started();
            info!(reasserted, "Startup complete");
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            runtime.shutdown();
            return Ok(());
        }
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down");
    runtime.shutdown();
    Ok(())
}
