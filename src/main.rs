use anyhow::Result;
use charge_point_controller::{config, controller, telemetry};
use config::Config;
use telemetry::init_tracing;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cfg = match std::env::args().nth(1) {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    info!(charge_point = %cfg.charge_point.id, "starting charge point controller");

    let (state, notifications) = controller::AppState::new(cfg)?;
    state.load_connectors()?;

    let cancel = CancellationToken::new();
    let tasks = controller::spawn_controller_tasks(&state, notifications, cancel.clone());

    telemetry::shutdown_signal().await;

    // Sessions are left running so they resume on the next start.
    cancel.cancel();
    state.scheduler.shutdown();
    for task in tasks {
        if let Err(e) = task.await {
            warn!(error = %e, "controller task failed");
        }
    }

    warn!("shutdown complete");
    Ok(())
}
