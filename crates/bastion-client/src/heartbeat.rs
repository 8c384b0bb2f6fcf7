//! Periodic liveness reports to the registry server.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::ApiClient;

/// Spawn a task that posts `/api/heartbeat` for `machine_name` every
/// `interval` until `shutdown` fires. Failures are logged and retried on
/// the next tick.
pub fn spawn_heartbeat_task(
    client: ApiClient,
    machine_name: String,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        timer.tick().await; // Skip first immediate tick

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    match client.heartbeat(&machine_name).await {
                        Ok(()) => debug!(name = %machine_name, "Heartbeat sent"),
                        Err(e) => warn!(error = %e, "Heartbeat failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("Heartbeat task shutting down");
                    return;
                }
            }
        }
    })
}
