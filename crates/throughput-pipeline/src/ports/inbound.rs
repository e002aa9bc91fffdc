//! # Inbound Port - PipelineApi
//!
//! Primary driving port of the throughput pipeline. Upstream layers (HTTP
//! gateway, CLI, dashboards) call these operations and consume the events
//! published on the bus.
//!
//! | Method | Requires running service |
//! |--------|--------------------------|
//! | `start` / `stop` | - |
//! | `process_transaction` / `process_batch` | yes |
//! | `process_quantum_validation` / `process_dag_traversal` | yes |
//! | `add_worker_node` / `remove_worker_node` | yes |
//! | `implement_strategy` | yes |
//! | `get_metrics` / `get_benchmarks` / `get_performance_summary` | no |

use crate::balancer::RoutingStats;
use crate::batcher::BatcherStats;
use crate::domain::{
    BenchmarkRun, DagTraversalRequest, DagTraversalResult, PipelineResult,
    QuantumValidationRequest, QuantumValidationResult, ScalingStrategy, ThroughputTarget,
    Transaction, WorkerNode,
};
use crate::worker_pool::WorkerPoolStats;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_bus::BusStats;
use uuid::Uuid;

/// Outcome of submitting several transactions at once.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSubmission {
    /// Ids of the queued transactions, in submission order.
    pub accepted: Vec<Uuid>,
    /// Index into the submitted list and rejection reason.
    pub rejected: Vec<(usize, String)>,
}

/// Aggregate service metrics.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineMetrics {
    /// Committed transactions per second over the monitoring window.
    pub current_tps: f64,
    pub peak_tps: f64,
    /// Rolling routed-request latency, or batch duration when nothing is routed.
    pub avg_latency_ms: f64,
    pub avg_batch_duration_ms: f64,
    pub pending_transactions: usize,
    pub processed_transactions: u64,
    pub failed_transactions: u64,
    /// Submissions refused by input validation.
    pub rejected_transactions: u64,
    pub batches_committed: u64,
    pub batches_failed: u64,
    pub active_batches: usize,
    pub active_nodes: usize,
    pub total_nodes: usize,
    pub uptime_ms: u64,
}

/// Everything a dashboard needs in one call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub metrics: PipelineMetrics,
    pub worker_pool: WorkerPoolStats,
    pub batcher: BatcherStats,
    pub routing: RoutingStats,
    pub nodes: Vec<WorkerNode>,
    pub targets: Vec<ThroughputTarget>,
    pub active_target: Option<String>,
    pub recommended_strategies: Vec<ScalingStrategy>,
    pub benchmarks: Vec<BenchmarkRun>,
    /// Event bus publish counters.
    pub events: BusStats,
}

/// Primary API of the throughput pipeline.
///
/// # Example
///
/// ```rust,ignore
/// use throughput_pipeline::{PipelineApi, ProcessingService};
///
/// async fn example(service: &ProcessingService, tx: Transaction) {
///     service.start().await?;
///     let id = service.process_transaction(tx)?;
///     let metrics = service.get_metrics();
///     service.stop().await?;
/// }
/// ```
#[async_trait]
pub trait PipelineApi: Send + Sync {
    /// Start background tasks and activate the first throughput target.
    ///
    /// # Errors
    /// - `ServiceStopped`: the service was already stopped
    async fn start(&self) -> PipelineResult<()>;

    /// Drain every queue and release every node before returning.
    ///
    /// # Errors
    /// - `ServiceNotRunning`: never started
    async fn stop(&self) -> PipelineResult<()>;

    /// Validate and queue one transaction.
    ///
    /// # Errors
    /// - `InvalidTransaction`: structural check failed, nothing queued
    /// - `ServiceNotRunning`
    fn process_transaction(&self, tx: Transaction) -> PipelineResult<Uuid>;

    /// Validate and queue several transactions. Invalid ones are reported
    /// per index and do not block the rest.
    fn process_batch(&self, txs: Vec<Transaction>) -> PipelineResult<BatchSubmission>;

    /// Check a post-quantum signature on a routed node.
    ///
    /// # Errors
    /// - `NodeUnavailable`: no eligible node
    /// - `RetriesExhausted`: every attempt failed
    async fn process_quantum_validation(
        &self,
        request: QuantumValidationRequest,
    ) -> PipelineResult<QuantumValidationResult>;

    /// Walk the committed-batch DAG on a routed node.
    async fn process_dag_traversal(
        &self,
        request: DagTraversalRequest,
    ) -> PipelineResult<DagTraversalResult>;

    async fn add_worker_node(&self, node: WorkerNode) -> PipelineResult<()>;

    /// Remove a node, draining it first when it has in-flight requests.
    async fn remove_worker_node(&self, node_id: &str) -> PipelineResult<()>;

    /// Roll out a scaling strategy from the catalog.
    async fn implement_strategy(&self, strategy_id: &str) -> PipelineResult<ScalingStrategy>;

    fn get_metrics(&self) -> PipelineMetrics;

    fn get_benchmarks(&self) -> Vec<BenchmarkRun>;

    fn get_performance_summary(&self) -> PerformanceSummary;
}
