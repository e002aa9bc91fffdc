//! # Load Balancer
//!
//! Registry of worker nodes and request routing.
//!
//! | Strategy | Choice among eligible nodes |
//! |----------|-----------------------------|
//! | `RoundRobin` | next node in id order |
//! | `LeastConnections` | lowest current load, ties by id |
//! | `Weighted` | smooth weighted round-robin by `max_capacity` |
//! | `RegionAware` | same-region nodes when any, least connections among them |
//!
//! A node is eligible when it is `Active` and below capacity. Draining and
//! unhealthy nodes never receive a new request.
//!
//! ```text
//!            add_node                    remove_node (load > 0)
//!  ────────→ [ACTIVE] ──────────────────────────────→ [DRAINING] ──load = 0──→ removed
//!              │   ↑
//!  threshold   │   │ probe ok
//!  failures    ↓   │
//!            [UNHEALTHY]
//! ```

use crate::config::{LoadBalancerConfig, LoadBalancingStrategy};
use crate::domain::{NodeStatus, PipelineError, PipelineResult, WorkerNode};
use crate::ports::outbound::NodeProbe;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use shared_bus::{EventPublisher, PipelineEvent};
use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// What a routed request needs from its node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouteRequest {
    /// Preferred region for region-aware routing.
    pub region: Option<String>,
    /// Needs a quantum-ready node when quantum awareness is on.
    pub quantum: bool,
}

impl RouteRequest {
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn in_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    #[must_use]
    pub fn quantum(mut self) -> Self {
        self.quantum = true;
        self
    }
}

/// A request routed to a node, to be passed back to [`LoadBalancer::complete`].
#[derive(Debug)]
#[must_use = "a routed request must be completed to release its slot"]
pub struct RouteTicket {
    node: WorkerNode,
    started: Instant,
}

impl RouteTicket {
    /// Snapshot of the node at routing time.
    #[must_use]
    pub fn node(&self) -> &WorkerNode {
        &self.node
    }

    #[must_use]
    pub fn node_id(&self) -> &str {
        &self.node.id
    }
}

/// Routing statistics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingStats {
    pub routed: u64,
    pub completed: u64,
    pub failed: u64,
    /// Moving average over completed and failed requests.
    pub avg_latency_ms: f64,
    pub total_capacity: u64,
    pub active_nodes: usize,
    pub quantum_nodes: usize,
    pub total_nodes: usize,
}

struct NodeEntry {
    node: WorkerNode,
    consecutive_failures: u32,
    current_weight: i64,
}

#[derive(Default)]
struct Registry {
    nodes: BTreeMap<String, NodeEntry>,
    rr_cursor: usize,
    total_capacity: u64,
    quantum_nodes: usize,
    routed: u64,
    completed: u64,
    failed: u64,
    avg_latency_ms: f64,
    latency_samples: u64,
}

impl Registry {
    fn forget(&mut self, id: &str) -> Option<WorkerNode> {
        let entry = self.nodes.remove(id)?;
        self.total_capacity = self
            .total_capacity
            .saturating_sub(u64::from(entry.node.max_capacity));
        if entry.node.quantum_ready {
            self.quantum_nodes = self.quantum_nodes.saturating_sub(1);
        }
        Some(entry.node)
    }
}

/// Multi-strategy load balancer over a dynamic node registry.
pub struct LoadBalancer {
    config: LoadBalancerConfig,
    registry: RwLock<Registry>,
    probe: Arc<dyn NodeProbe>,
    events: Arc<dyn EventPublisher>,
}

impl LoadBalancer {
    pub fn new(
        config: LoadBalancerConfig,
        probe: Arc<dyn NodeProbe>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            registry: RwLock::new(Registry::default()),
            probe,
            events,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoadBalancerConfig {
        &self.config
    }

    // =========================================================================
    // REGISTRY
    // =========================================================================

    /// Register a node. It starts `Active` with no load.
    pub async fn add_node(&self, mut node: WorkerNode) -> PipelineResult<()> {
        node.status = NodeStatus::Active;
        node.current_load = 0;
        let event = PipelineEvent::WorkerNodeAdded {
            node_id: node.id.clone(),
            region: node.region.clone(),
            quantum_ready: node.quantum_ready,
            max_capacity: node.max_capacity,
        };

        {
            let mut registry = self.registry.write();
            if registry.nodes.contains_key(&node.id) {
                return Err(PipelineError::DuplicateNode(node.id));
            }
            registry.total_capacity += u64::from(node.max_capacity);
            if node.quantum_ready {
                registry.quantum_nodes += 1;
            }
            info!(
                node_id = %node.id,
                region = %node.region,
                capacity = node.max_capacity,
                quantum_ready = node.quantum_ready,
                "Worker node added"
            );
            registry.nodes.insert(
                node.id.clone(),
                NodeEntry {
                    node,
                    consecutive_failures: 0,
                    current_weight: 0,
                },
            );
        }

        self.events.publish(event).await;
        Ok(())
    }

    /// Remove a node with drain semantics.
    ///
    /// An idle node is removed immediately. A loaded node is marked
    /// `Draining` and removed once its last request completes.
    pub async fn remove_node(&self, node_id: &str) -> PipelineResult<()> {
        let event = {
            let mut registry = self.registry.write();
            let entry = registry
                .nodes
                .get_mut(node_id)
                .ok_or_else(|| PipelineError::UnknownNode(node_id.to_string()))?;

            if entry.node.current_load == 0 {
                registry.forget(node_id);
                info!(node_id, "Worker node removed");
                PipelineEvent::WorkerNodeRemoved {
                    node_id: node_id.to_string(),
                }
            } else {
                entry.node.status = NodeStatus::Draining;
                info!(
                    node_id,
                    in_flight = entry.node.current_load,
                    "Worker node draining"
                );
                PipelineEvent::NodeHealthChanged {
                    node_id: node_id.to_string(),
                    status: NodeStatus::Draining.as_str().to_string(),
                }
            }
        };

        self.events.publish(event).await;
        Ok(())
    }

    /// Drop every registration, regardless of load. Returns how many nodes
    /// were released.
    pub async fn release_all(&self) -> usize {
        let released: Vec<WorkerNode> = {
            let mut registry = self.registry.write();
            let ids: Vec<String> = registry.nodes.keys().cloned().collect();
            ids.iter().filter_map(|id| registry.forget(id)).collect()
        };

        for node in &released {
            if node.current_load > 0 {
                warn!(node_id = %node.id, in_flight = node.current_load, "Released node with in-flight requests");
            }
            self.events
                .publish(PipelineEvent::WorkerNodeRemoved {
                    node_id: node.id.clone(),
                })
                .await;
        }
        info!(released = released.len(), "All worker nodes released");
        released.len()
    }

    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<WorkerNode> {
        self.registry
            .read()
            .nodes
            .get(node_id)
            .map(|e| e.node.clone())
    }

    /// All registered nodes in id order.
    #[must_use]
    pub fn nodes(&self) -> Vec<WorkerNode> {
        self.registry
            .read()
            .nodes
            .values()
            .map(|e| e.node.clone())
            .collect()
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.registry.read().nodes.len()
    }

    #[must_use]
    pub fn active_node_count(&self) -> usize {
        self.registry
            .read()
            .nodes
            .values()
            .filter(|e| e.node.status == NodeStatus::Active)
            .count()
    }

    /// Active quantum-ready nodes.
    #[must_use]
    pub fn quantum_node_count(&self) -> usize {
        self.registry
            .read()
            .nodes
            .values()
            .filter(|e| e.node.status == NodeStatus::Active && e.node.quantum_ready)
            .count()
    }

    #[must_use]
    pub fn stats(&self) -> RoutingStats {
        let registry = self.registry.read();
        RoutingStats {
            routed: registry.routed,
            completed: registry.completed,
            failed: registry.failed,
            avg_latency_ms: registry.avg_latency_ms,
            total_capacity: registry.total_capacity,
            active_nodes: registry
                .nodes
                .values()
                .filter(|e| e.node.status == NodeStatus::Active)
                .count(),
            quantum_nodes: registry.quantum_nodes,
            total_nodes: registry.nodes.len(),
        }
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    /// Pick a node for `request` and charge it one unit of load.
    pub fn route(&self, request: &RouteRequest) -> PipelineResult<RouteTicket> {
        self.route_excluding(request, &HashSet::new())
    }

    fn route_excluding(
        &self,
        request: &RouteRequest,
        excluded: &HashSet<String>,
    ) -> PipelineResult<RouteTicket> {
        let mut registry = self.registry.write();
        let restrict_quantum = request.quantum && self.config.enable_quantum_awareness;

        let eligible: Vec<String> = registry
            .nodes
            .values()
            .filter(|e| e.node.is_eligible())
            .filter(|e| !restrict_quantum || e.node.quantum_ready)
            .filter(|e| !excluded.contains(&e.node.id))
            .map(|e| e.node.id.clone())
            .collect();

        if eligible.is_empty() {
            return Err(PipelineError::NodeUnavailable(format!(
                "{} registered, none eligible{}",
                registry.nodes.len(),
                if restrict_quantum { " (quantum-ready required)" } else { "" }
            )));
        }

        let chosen = match self.config.strategy {
            LoadBalancingStrategy::RoundRobin => {
                let index = registry.rr_cursor % eligible.len();
                registry.rr_cursor = registry.rr_cursor.wrapping_add(1);
                eligible[index].clone()
            }
            LoadBalancingStrategy::LeastConnections => least_loaded(&registry, &eligible),
            LoadBalancingStrategy::Weighted => smooth_weighted(&mut registry, &eligible),
            LoadBalancingStrategy::RegionAware => {
                let local: Vec<String> = match &request.region {
                    Some(region) => eligible
                        .iter()
                        .filter(|id| {
                            registry
                                .nodes
                                .get(id.as_str())
                                .is_some_and(|e| &e.node.region == region)
                        })
                        .cloned()
                        .collect(),
                    None => Vec::new(),
                };
                if local.is_empty() {
                    least_loaded(&registry, &eligible)
                } else {
                    least_loaded(&registry, &local)
                }
            }
        };

        registry.routed += 1;
        let entry = registry
            .nodes
            .get_mut(&chosen)
            .ok_or_else(|| PipelineError::UnknownNode(chosen.clone()))?;
        entry.node.current_load += 1;

        debug!(
            node_id = %chosen,
            load = entry.node.current_load,
            strategy = self.config.strategy.as_str(),
            "Request routed"
        );

        Ok(RouteTicket {
            node: entry.node.clone(),
            started: Instant::now(),
        })
    }

    /// Release a routed request and record its outcome.
    pub async fn complete(&self, ticket: RouteTicket, outcome: Result<(), String>) {
        let latency_ms = ticket.started.elapsed().as_secs_f64() * 1_000.0;
        let node_id = ticket.node.id;
        let alpha = self.config.latency_alpha;

        let drained = {
            let mut registry = self.registry.write();
            match &outcome {
                Ok(()) => registry.completed += 1,
                Err(_) => registry.failed += 1,
            }
            registry.avg_latency_ms = if registry.latency_samples == 0 {
                latency_ms
            } else {
                alpha * latency_ms + (1.0 - alpha) * registry.avg_latency_ms
            };
            registry.latency_samples += 1;

            let finished_draining = match registry.nodes.get_mut(&node_id) {
                Some(entry) => {
                    entry.node.current_load = entry.node.current_load.saturating_sub(1);
                    entry.node.response_time_ms = ema(entry.node.response_time_ms, latency_ms, alpha);
                    entry.node.status == NodeStatus::Draining && entry.node.current_load == 0
                }
                // Released while in flight.
                None => false,
            };
            if finished_draining {
                registry.forget(&node_id);
                info!(node_id = %node_id, "Drained worker node removed");
            }
            finished_draining
        };

        let event = match outcome {
            Ok(()) => PipelineEvent::RequestCompleted {
                node_id: node_id.clone(),
                latency_ms,
            },
            Err(error) => PipelineEvent::RequestFailed {
                node_id: node_id.clone(),
                latency_ms,
                error,
            },
        };
        self.events.publish(event).await;
        if drained {
            self.events
                .publish(PipelineEvent::WorkerNodeRemoved { node_id })
                .await;
        }
    }

    /// Run `op` on a routed node, retrying on the next-best untried node.
    ///
    /// Makes at most `1 + max_retries` attempts. Returns `NodeUnavailable`
    /// when no node is eligible for the first attempt and `RetriesExhausted`
    /// once attempts or untried nodes run out after a failure.
    pub async fn dispatch<T, F, Fut>(&self, request: &RouteRequest, mut op: F) -> PipelineResult<T>
    where
        F: FnMut(WorkerNode) -> Fut,
        Fut: Future<Output = PipelineResult<T>>,
    {
        let max_attempts = self.config.max_retries.saturating_add(1);
        let mut tried: HashSet<String> = HashSet::new();
        let mut last_error: Option<PipelineError> = None;
        let mut attempts = 0u32;

        while attempts < max_attempts {
            let ticket = match self.route_excluding(request, &tried) {
                Ok(ticket) => ticket,
                Err(e) => match last_error {
                    None => return Err(e),
                    Some(_) => break,
                },
            };
            attempts += 1;
            tried.insert(ticket.node_id().to_string());

            let node = ticket.node().clone();
            match op(node).await {
                Ok(value) => {
                    self.complete(ticket, Ok(())).await;
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        node_id = %ticket.node_id(),
                        attempt = attempts,
                        error = %e,
                        "Routed request failed"
                    );
                    self.complete(ticket, Err(e.to_string())).await;
                    last_error = Some(e);
                }
            }
        }

        Err(PipelineError::RetriesExhausted {
            attempts,
            last_error: last_error.map_or_else(|| "no attempt made".to_string(), |e| e.to_string()),
        })
    }

    // =========================================================================
    // HEALTH
    // =========================================================================

    /// Probe every non-draining node once.
    ///
    /// `unhealthy_threshold` consecutive failures demote a node; one success
    /// restores it.
    pub async fn run_health_checks(&self) {
        let targets: Vec<WorkerNode> = self
            .registry
            .read()
            .nodes
            .values()
            .filter(|e| e.node.status != NodeStatus::Draining)
            .map(|e| e.node.clone())
            .collect();

        for node in targets {
            let result = self.probe.probe(&node).await;
            if let Some(event) = self.record_probe(&node.id, result) {
                self.events.publish(event).await;
            }
        }
    }

    fn record_probe(
        &self,
        node_id: &str,
        result: PipelineResult<Duration>,
    ) -> Option<PipelineEvent> {
        let mut registry = self.registry.write();
        let threshold = self.config.unhealthy_threshold;
        let alpha = self.config.latency_alpha;
        let entry = registry.nodes.get_mut(node_id)?;

        let changed = match result {
            Ok(latency) => {
                entry.consecutive_failures = 0;
                entry.node.response_time_ms =
                    ema(entry.node.response_time_ms, latency.as_secs_f64() * 1_000.0, alpha);
                if entry.node.status == NodeStatus::Unhealthy {
                    entry.node.status = NodeStatus::Active;
                    info!(node_id, "Worker node recovered");
                    true
                } else {
                    false
                }
            }
            Err(e) => {
                entry.consecutive_failures += 1;
                debug!(node_id, failures = entry.consecutive_failures, error = %e, "Health probe failed");
                if entry.node.status == NodeStatus::Active && entry.consecutive_failures >= threshold {
                    entry.node.status = NodeStatus::Unhealthy;
                    warn!(
                        node_id,
                        failures = entry.consecutive_failures,
                        "Worker node marked unhealthy"
                    );
                    true
                } else {
                    false
                }
            }
        };

        changed.then(|| PipelineEvent::NodeHealthChanged {
            node_id: node_id.to_string(),
            status: entry.node.status.as_str().to_string(),
        })
    }
}

fn ema(previous: f64, sample: f64, alpha: f64) -> f64 {
    if previous == 0.0 {
        sample
    } else {
        alpha * sample + (1.0 - alpha) * previous
    }
}

fn least_loaded(registry: &Registry, candidates: &[String]) -> String {
    candidates
        .iter()
        .filter_map(|id| registry.nodes.get(id).map(|e| (e.node.current_load, id)))
        .min()
        .map(|(_, id)| id.clone())
        .unwrap_or_else(|| candidates[0].clone())
}

/// Smooth weighted round-robin: every candidate gains its weight, the
/// heaviest is chosen and pays back the total.
fn smooth_weighted(registry: &mut Registry, candidates: &[String]) -> String {
    let mut total = 0i64;
    let mut best: Option<(i64, String)> = None;
    for id in candidates {
        let Some(entry) = registry.nodes.get_mut(id) else {
            continue;
        };
        let weight = i64::from(entry.node.max_capacity.max(1));
        entry.current_weight += weight;
        total += weight;
        let better = best
            .as_ref()
            .map_or(true, |(w, _)| entry.current_weight > *w);
        if better {
            best = Some((entry.current_weight, id.clone()));
        }
    }

    let chosen = best.map_or_else(|| candidates[0].clone(), |(_, id)| id);
    if let Some(entry) = registry.nodes.get_mut(&chosen) {
        entry.current_weight -= total;
    }
    chosen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::InMemoryProbe;
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus};

    struct Harness {
        balancer: LoadBalancer,
        probe: Arc<InMemoryProbe>,
        bus: Arc<InMemoryEventBus>,
    }

    fn harness(strategy: LoadBalancingStrategy) -> Harness {
        let probe = Arc::new(InMemoryProbe::default());
        let bus = Arc::new(InMemoryEventBus::new());
        let config = LoadBalancerConfig {
            strategy,
            unhealthy_threshold: 2,
            max_retries: 2,
            ..LoadBalancerConfig::default()
        };
        Harness {
            balancer: LoadBalancer::new(config, probe.clone(), bus.clone()),
            probe,
            bus,
        }
    }

    fn node(id: &str, region: &str, capacity: u32) -> WorkerNode {
        WorkerNode::new(id, format!("{id}.local:9000"), region, capacity)
    }

    #[tokio::test]
    async fn test_round_robin_cycles_in_id_order() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        for id in ["c", "a", "b"] {
            h.balancer.add_node(node(id, "eu", 10)).await.unwrap();
        }

        let mut picked = Vec::new();
        for _ in 0..6 {
            let ticket = h.balancer.route(&RouteRequest::any()).unwrap();
            picked.push(ticket.node_id().to_string());
            h.balancer.complete(ticket, Ok(())).await;
        }
        assert_eq!(picked, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_least_connections_prefers_idle_node() {
        let h = harness(LoadBalancingStrategy::LeastConnections);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.balancer.add_node(node("b", "eu", 10)).await.unwrap();

        let first = h.balancer.route(&RouteRequest::any()).unwrap();
        let second = h.balancer.route(&RouteRequest::any()).unwrap();
        assert_eq!(first.node_id(), "a");
        assert_eq!(second.node_id(), "b");

        h.balancer.complete(first, Ok(())).await;
        let third = h.balancer.route(&RouteRequest::any()).unwrap();
        assert_eq!(third.node_id(), "a");
    }

    #[tokio::test]
    async fn test_weighted_follows_capacity() {
        let h = harness(LoadBalancingStrategy::Weighted);
        h.balancer.add_node(node("big", "eu", 30)).await.unwrap();
        h.balancer.add_node(node("small", "eu", 10)).await.unwrap();

        let mut big = 0;
        for _ in 0..8 {
            let ticket = h.balancer.route(&RouteRequest::any()).unwrap();
            if ticket.node_id() == "big" {
                big += 1;
            }
            h.balancer.complete(ticket, Ok(())).await;
        }
        assert_eq!(big, 6);
    }

    #[tokio::test]
    async fn test_region_aware_prefers_local_then_falls_back() {
        let h = harness(LoadBalancingStrategy::RegionAware);
        h.balancer.add_node(node("eu-1", "eu", 10)).await.unwrap();
        h.balancer.add_node(node("us-1", "us", 10)).await.unwrap();

        let request = RouteRequest::any().in_region(Some("us".to_string()));
        let ticket = h.balancer.route(&request).unwrap();
        assert_eq!(ticket.node_id(), "us-1");
        h.balancer.complete(ticket, Ok(())).await;

        let request = RouteRequest::any().in_region(Some("ap".to_string()));
        assert!(h.balancer.route(&request).is_ok());
    }

    #[tokio::test]
    async fn test_quantum_requests_need_quantum_nodes() {
        let probe = Arc::new(InMemoryProbe::default());
        let bus = Arc::new(InMemoryEventBus::new());
        let config = LoadBalancerConfig {
            enable_quantum_awareness: true,
            ..LoadBalancerConfig::default()
        };
        let balancer = LoadBalancer::new(config, probe, bus);
        balancer.add_node(node("classic", "eu", 10)).await.unwrap();

        let quantum = RouteRequest::any().quantum();
        assert!(matches!(
            balancer.route(&quantum),
            Err(PipelineError::NodeUnavailable(_))
        ));

        balancer
            .add_node(node("pq", "eu", 10).with_quantum_ready(true))
            .await
            .unwrap();
        assert_eq!(balancer.route(&quantum).unwrap().node_id(), "pq");
        assert_eq!(balancer.quantum_node_count(), 1);
    }

    #[tokio::test]
    async fn test_capacity_limits_eligibility() {
        let h = harness(LoadBalancingStrategy::LeastConnections);
        h.balancer.add_node(node("a", "eu", 1)).await.unwrap();

        let _held = h.balancer.route(&RouteRequest::any()).unwrap();
        assert!(matches!(
            h.balancer.route(&RouteRequest::any()),
            Err(PipelineError::NodeUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_drain_removal_waits_for_in_flight() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        let mut sub = h.bus.subscribe(EventFilter::topics(vec![EventTopic::LoadBalancing]));
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.balancer.add_node(node("b", "eu", 10)).await.unwrap();

        let ticket = h.balancer.route(&RouteRequest::any()).unwrap();
        assert_eq!(ticket.node_id(), "a");

        h.balancer.remove_node("a").await.unwrap();
        assert_eq!(h.balancer.node("a").unwrap().status, NodeStatus::Draining);

        // Draining nodes get nothing new.
        for _ in 0..3 {
            let t = h.balancer.route(&RouteRequest::any()).unwrap();
            assert_eq!(t.node_id(), "b");
            h.balancer.complete(t, Ok(())).await;
        }

        h.balancer.complete(ticket, Ok(())).await;
        assert!(h.balancer.node("a").is_none());
        assert_eq!(h.balancer.stats().total_capacity, 10);

        let removed = sub
            .drain()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::WorkerNodeRemoved { node_id } if node_id == "a"))
            .count();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn test_idle_node_removed_immediately() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.balancer.remove_node("a").await.unwrap();
        assert_eq!(h.balancer.node_count(), 0);
        assert!(matches!(
            h.balancer.remove_node("a").await,
            Err(PipelineError::UnknownNode(_))
        ));
    }

    #[tokio::test]
    async fn test_duplicate_node_rejected() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        assert!(matches!(
            h.balancer.add_node(node("a", "us", 5)).await,
            Err(PipelineError::DuplicateNode(_))
        ));
    }

    #[tokio::test]
    async fn test_health_checks_demote_and_restore() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.probe.set_healthy("a", false);

        h.balancer.run_health_checks().await;
        assert_eq!(h.balancer.node("a").unwrap().status, NodeStatus::Active);

        h.balancer.run_health_checks().await;
        assert_eq!(h.balancer.node("a").unwrap().status, NodeStatus::Unhealthy);
        assert!(h.balancer.route(&RouteRequest::any()).is_err());

        h.probe.set_healthy("a", true);
        h.balancer.run_health_checks().await;
        assert_eq!(h.balancer.node("a").unwrap().status, NodeStatus::Active);
        assert!(h.balancer.route(&RouteRequest::any()).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch_retries_on_next_node() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.balancer.add_node(node("b", "eu", 10)).await.unwrap();

        let served_by = h
            .balancer
            .dispatch(&RouteRequest::any(), |node| async move {
                if node.id == "a" {
                    Err(PipelineError::Ledger("timeout".into()))
                } else {
                    Ok(node.id)
                }
            })
            .await
            .unwrap();
        assert_eq!(served_by, "b");

        let stats = h.balancer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert!(h.balancer.nodes().iter().all(|n| n.current_load == 0));
    }

    #[tokio::test]
    async fn test_dispatch_exhausts_retries() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        for id in ["a", "b", "c", "d"] {
            h.balancer.add_node(node(id, "eu", 10)).await.unwrap();
        }

        let result: PipelineResult<()> = h
            .balancer
            .dispatch(&RouteRequest::any(), |_| async {
                Err(PipelineError::Ledger("down".into()))
            })
            .await;

        // max_retries = 2 → three attempts.
        match result {
            Err(PipelineError::RetriesExhausted { attempts, last_error }) => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("down"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_dispatch_without_nodes_is_unavailable() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        let result: PipelineResult<()> = h
            .balancer
            .dispatch(&RouteRequest::any(), |_| async { Ok(()) })
            .await;
        assert!(matches!(result, Err(PipelineError::NodeUnavailable(_))));
    }

    #[tokio::test]
    async fn test_release_all_clears_registry() {
        let h = harness(LoadBalancingStrategy::RoundRobin);
        h.balancer.add_node(node("a", "eu", 10)).await.unwrap();
        h.balancer
            .add_node(node("b", "us", 10).with_quantum_ready(true))
            .await
            .unwrap();

        assert_eq!(h.balancer.release_all().await, 2);
        let stats = h.balancer.stats();
        assert_eq!(stats.total_nodes, 0);
        assert_eq!(stats.total_capacity, 0);
        assert_eq!(stats.quantum_nodes, 0);
    }
}
