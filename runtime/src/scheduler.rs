//! Cancel-aware interval tasks.
//!
//! The platform's periodic work (outbox relay every 500 ms, offer timeout
//! sweep every 5 s, reconciliation sweeps every 5/10 min) runs as long-lived
//! tokio tasks that stop cleanly when the shutdown channel fires, so any
//! in-flight database work commits or rolls back before the process exits.

use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Spawn a named periodic task.
///
/// `tick` runs to completion on every interval; a tick is never cancelled
/// mid-flight — the shutdown signal is only observed between ticks. Missed
/// ticks are delayed rather than bursted.
pub fn spawn_interval_task<F, Fut>(
    name: &'static str,
    every: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut tick: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(task = name, interval_ms = every.as_millis(), "interval task started");

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!(task = name, "interval task received shutdown signal");
                    break;
                }
                _ = interval.tick() => {
                    debug!(task = name, "interval task tick");
                    tick().await;
                }
            }
        }

        info!(task = name, "interval task stopped");
    })
}
