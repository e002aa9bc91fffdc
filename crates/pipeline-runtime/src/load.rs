//! Synthetic transaction load.
//!
//! Enabled with `PIPELINE_DEMO_TPS`. Submits signed transfers in 100 ms
//! slices so that the monitoring loop and the throughput targets have
//! something to measure without an upstream gateway.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use throughput_pipeline::{
    DigestSignatureVerifier, PipelineApi, PipelineError, ProcessingService, Transaction,
    MIN_GAS_LIMIT,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SLICE: Duration = Duration::from_millis(100);
const SLICES_PER_SECOND: u64 = 10;

/// Running load generator.
pub struct LoadGenerator {
    handle: JoinHandle<u64>,
}

impl LoadGenerator {
    /// Start submitting roughly `tps` transactions per second.
    pub fn spawn(service: ProcessingService, tps: u64, mut shutdown: watch::Receiver<bool>) -> Self {
        let per_slice = (tps / SLICES_PER_SECOND).max(1);
        info!(tps, per_slice, "Synthetic load enabled");

        let handle = tokio::spawn(async move {
            let mut rng = StdRng::from_entropy();
            let mut ticker = tokio::time::interval(SLICE);
            let mut submitted = 0u64;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = shutdown.changed() => break,
                }

                for _ in 0..per_slice {
                    match service.process_transaction(random_transaction(&mut rng)) {
                        Ok(_) => submitted += 1,
                        Err(PipelineError::ServiceNotRunning) => {
                            debug!(submitted, "Service stopped, load generator exiting");
                            return submitted;
                        }
                        Err(e) => warn!(error = %e, "Synthetic transaction rejected"),
                    }
                }
            }

            debug!(submitted, "Load generator stopped");
            submitted
        });

        Self { handle }
    }

    /// Wait for the generator to exit and return how many transactions it queued.
    pub async fn join(self) -> u64 {
        self.handle.await.unwrap_or_default()
    }
}

/// Signed transfer with random amount, gas and priority.
pub fn random_transaction(rng: &mut impl Rng) -> Transaction {
    let sender = format!("account-{}", rng.gen_range(0..1_000u32));
    let recipient = format!("account-{}", rng.gen_range(0..1_000u32));
    let amount = rng.gen_range(1..=10_000u64);
    let gas = rng.gen_range(MIN_GAS_LIMIT..=MIN_GAS_LIMIT * 5);
    // Mostly routine traffic with an occasional urgent transfer
    let priority = if rng.gen_bool(0.05) {
        rng.gen_range(8..=10u8)
    } else {
        rng.gen_range(0..=5u8)
    };

    DigestSignatureVerifier::sign(Transaction::new(sender, recipient, amount, gas).with_priority(priority))
}
