//! In-memory node probe.
//!
//! Implements `NodeProbe` with scriptable per-node health. Nodes without a
//! script answer healthy with the default latency.

use crate::domain::{PipelineError, PipelineResult, WorkerNode};
use crate::ports::outbound::NodeProbe;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Clone, Copy, Debug)]
struct ProbeScript {
    healthy: bool,
    latency: Duration,
}

/// Scriptable probe for tests and the demo runtime.
pub struct InMemoryProbe {
    scripts: RwLock<HashMap<String, ProbeScript>>,
    default_latency: Duration,
    probes: AtomicU64,
}

impl InMemoryProbe {
    #[must_use]
    pub fn new(default_latency: Duration) -> Self {
        Self {
            scripts: RwLock::new(HashMap::new()),
            default_latency,
            probes: AtomicU64::new(0),
        }
    }

    /// Make probes of `node_id` succeed or fail.
    pub fn set_healthy(&self, node_id: &str, healthy: bool) {
        let mut scripts = self.scripts.write();
        let latency = scripts
            .get(node_id)
            .map_or(self.default_latency, |s| s.latency);
        scripts.insert(node_id.to_string(), ProbeScript { healthy, latency });
    }

    /// Set the latency reported for `node_id`.
    pub fn set_latency(&self, node_id: &str, latency: Duration) {
        let mut scripts = self.scripts.write();
        let healthy = scripts.get(node_id).map_or(true, |s| s.healthy);
        scripts.insert(node_id.to_string(), ProbeScript { healthy, latency });
    }

    /// Probes answered so far.
    #[must_use]
    pub fn probe_count(&self) -> u64 {
        self.probes.load(Ordering::Relaxed)
    }
}

impl Default for InMemoryProbe {
    fn default() -> Self {
        Self::new(Duration::from_millis(1))
    }
}

#[async_trait]
impl NodeProbe for InMemoryProbe {
    async fn probe(&self, node: &WorkerNode) -> PipelineResult<Duration> {
        self.probes.fetch_add(1, Ordering::Relaxed);
        let script = self.scripts.read().get(&node.id).copied();
        match script {
            Some(ProbeScript { healthy: false, .. }) => Err(PipelineError::ProbeFailed {
                node_id: node.id.clone(),
                reason: "no response".to_string(),
            }),
            Some(ProbeScript { latency, .. }) => Ok(latency),
            None => Ok(self.default_latency),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unscripted_node_is_healthy() {
        let probe = InMemoryProbe::default();
        let node = WorkerNode::new("n1", "127.0.0.1:1", "eu", 4);
        assert_eq!(probe.probe(&node).await.unwrap(), Duration::from_millis(1));
        assert_eq!(probe.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_failure_and_recovery() {
        let probe = InMemoryProbe::default();
        let node = WorkerNode::new("n1", "127.0.0.1:1", "eu", 4);

        probe.set_healthy("n1", false);
        assert!(matches!(
            probe.probe(&node).await,
            Err(PipelineError::ProbeFailed { .. })
        ));

        probe.set_latency("n1", Duration::from_millis(7));
        probe.set_healthy("n1", true);
        assert_eq!(probe.probe(&node).await.unwrap(), Duration::from_millis(7));
    }
}
