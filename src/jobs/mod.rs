//! Background jobs.
//!
//! The experiment refresher is one long-lived task: sleep for the configured
//! interval, pull from the provider, publish. A failed cycle keeps the
//! previous snapshot. The task stops when the shutdown signal flips; an
//! in-flight cycle that loses the race simply never publishes again.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};

use crate::experiment::ExperimentService;

pub async fn run_experiment_refresh(
    service: Arc<ExperimentService>,
    mut shutdown: watch::Receiver<bool>,
) {
    let interval = service.refresh_interval();
    info!(
        interval_secs = interval.as_secs(),
        "experiment refresh loop started"
    );

    loop {
        tokio::select! {
            _ = sleep(interval) => {
                let cycle_start = Instant::now();
                match service.refresh().await {
                    Ok(()) => {
                        info!(
                            duration_ms = cycle_start.elapsed().as_millis() as u64,
                            "experiment refresh cycle completed"
                        );
                    }
                    Err(e) => {
                        warn!(
                            error = %e,
                            duration_ms = cycle_start.elapsed().as_millis() as u64,
                            "experiment refresh failed, keeping previous snapshot"
                        );
                    }
                }
            }
            _ = shutdown.changed() => {
                info!("experiment refresh loop stopping");
                break;
            }
        }
    }
}
