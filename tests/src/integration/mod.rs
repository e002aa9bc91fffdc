//! # Integration Tests
//!
//! Shared fixtures live here; each submodule holds one area.

mod concurrency;
mod lifecycle;
mod routing;
mod scenarios;

#[cfg(test)]
pub(crate) mod fixtures {
    use shared_bus::{PipelineEvent, Subscription};
    use std::time::Duration;
    use throughput_pipeline::{DigestSignatureVerifier, Transaction, MIN_GAS_LIMIT};

    /// Signed transfer with a unique amount.
    pub fn tx(i: u64) -> Transaction {
        DigestSignatureVerifier::sign(Transaction::new("alice", "bob", i + 1, MIN_GAS_LIMIT))
    }

    pub fn priority_tx(i: u64, priority: u8) -> Transaction {
        DigestSignatureVerifier::sign(
            Transaction::new("alice", "bob", i + 1, MIN_GAS_LIMIT).with_priority(priority),
        )
    }

    /// Receive until `pred` matches or five seconds pass.
    pub async fn wait_for<F>(subscription: &mut Subscription, mut pred: F) -> Option<PipelineEvent>
    where
        F: FnMut(&PipelineEvent) -> bool,
    {
        tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = subscription.recv().await {
                if pred(&event) {
                    return Some(event);
                }
            }
            None
        })
        .await
        .ok()
        .flatten()
    }
}
