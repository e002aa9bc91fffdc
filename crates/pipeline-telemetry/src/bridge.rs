//! Bus to Prometheus bridge.

use shared_bus::Subscription;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::metrics::observe_event;

/// Background task that feeds every received event into the collectors.
pub struct MetricsBridge {
    handle: JoinHandle<u64>,
}

impl MetricsBridge {
    /// Spawn the bridge on the current runtime.
    ///
    /// The task stops when `shutdown` flips to `true` (or its sender is
    /// dropped) or when the bus closes. Events already buffered at shutdown
    /// are still observed.
    pub fn spawn(mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) -> Self {
        let handle = tokio::spawn(async move {
            let mut observed = 0u64;
            loop {
                tokio::select! {
                    event = subscription.recv() => match event {
                        Some(event) => {
                            observe_event(&event);
                            observed += 1;
                        }
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            for event in subscription.drain() {
                observe_event(&event);
                observed += 1;
            }
            tracing::debug!(observed, "Metrics bridge stopped");
            observed
        });

        Self { handle }
    }

    /// Wait for the task to finish and return how many events it observed.
    pub async fn join(self) -> u64 {
        match self.handle.await {
            Ok(observed) => observed,
            Err(e) => {
                tracing::warn!(error = %e, "Metrics bridge task failed");
                0
            }
        }
    }
}
