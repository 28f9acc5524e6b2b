//! Liveness monitor - periodic eviction of dead connections and idle
//! sessions.
//!
//! Runs as its own task on a fixed interval and drives the router's sweep
//! entry point, so every eviction happens on the same serialization point
//! as ordinary message handling. A connection evicted here produces the
//! same departure broadcast an explicit close would; observers never see a
//! participant go permanently silent without a notice. Session eviction
//! notifies no one - by the time a session idles out there is nobody left
//! listening.

use crate::router::RouterHandle;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Spawn the liveness monitor task.
///
/// The task exits when `cancel_token` fires or the router goes away.
pub fn spawn_liveness_monitor(
    router: RouterHandle,
    sweep_interval: Duration,
    cancel_token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(
            target: "poker.liveness",
            interval_secs = sweep_interval.as_secs(),
            "Liveness monitor started"
        );

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!(target: "poker.liveness", "Liveness monitor shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    match router.sweep().await {
                        Ok(report) => {
                            debug!(
                                target: "poker.liveness",
                                connections_evicted = report.connections_evicted,
                                sessions_evicted = report.sessions_evicted,
                                "Sweep complete"
                            );
                        }
                        Err(error) => {
                            warn!(
                                target: "poker.liveness",
                                error = %error,
                                "Router unavailable, stopping monitor"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(target: "poker.liveness", "Liveness monitor stopped");
    })
}
