//! Prometheus metrics for the throughput pipeline.
//!
//! All metrics follow the naming convention: `tp_<component>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., batches_total)
//! - **Gauge**: Value that can go up or down (e.g., pending_transactions)
//! - **Histogram**: Distribution of values (e.g., batch_duration_seconds)
//!
//! Metrics are never touched by the pipeline itself. [`observe_event`] maps
//! each bus event onto the collectors below, so a dashboard sees exactly
//! what subscribers see.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, linear_buckets, Counter, CounterVec, Encoder, Gauge, GaugeVec,
    Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use shared_bus::PipelineEvent;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BATCHER METRICS
    // =========================================================================

    /// Batches by outcome (created, committed, failed)
    pub static ref BATCHES: CounterVec = CounterVec::new(
        Opts::new("tp_batcher_batches_total", "Batches by lifecycle outcome"),
        &["outcome"]
    ).expect("metric creation failed");

    /// Batches created by formation trigger
    pub static ref BATCH_TRIGGERS: CounterVec = CounterVec::new(
        Opts::new("tp_batcher_formation_triggers_total", "Batch formations by trigger"),
        &["trigger"]  // trigger: size/priority/timer/flush
    ).expect("metric creation failed");

    /// Transactions committed through batches
    pub static ref TRANSACTIONS_COMMITTED: Counter = Counter::new(
        "tp_batcher_transactions_committed_total",
        "Transactions committed to the ledger"
    ).expect("metric creation failed");

    /// Transactions recorded on failed batches
    pub static ref TRANSACTIONS_FAILED: Counter = Counter::new(
        "tp_batcher_transactions_failed_total",
        "Transactions recorded on failed batches"
    ).expect("metric creation failed");

    /// Transactions per formed batch
    pub static ref BATCH_SIZE: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tp_batcher_batch_transactions",
            "Number of transactions drawn into each batch"
        ).buckets(linear_buckets(10.0, 10.0, 10).unwrap_or_default())
    ).expect("metric creation failed");

    /// Creation to commit duration
    pub static ref BATCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tp_batcher_batch_duration_seconds",
            "Time from batch creation to commit"
        ).buckets(exponential_buckets(0.001, 2.0, 15).unwrap_or_default())
    ).expect("metric creation failed");

    /// Aggregations by algorithm
    pub static ref AGGREGATIONS: CounterVec = CounterVec::new(
        Opts::new("tp_aggregator_aggregations_total", "Committed aggregates by algorithm"),
        &["algorithm"]
    ).expect("metric creation failed");

    // =========================================================================
    // LOAD BALANCER METRICS
    // =========================================================================

    /// Registered worker nodes
    pub static ref WORKER_NODES: Gauge = Gauge::new(
        "tp_balancer_worker_nodes",
        "Number of registered worker nodes"
    ).expect("metric creation failed");

    /// Health transitions by new status
    pub static ref NODE_HEALTH_CHANGES: CounterVec = CounterVec::new(
        Opts::new("tp_balancer_node_health_changes_total", "Node status transitions"),
        &["status"]  // status: active/draining/unhealthy
    ).expect("metric creation failed");

    /// Routed requests by outcome
    pub static ref ROUTED_REQUESTS: CounterVec = CounterVec::new(
        Opts::new("tp_balancer_requests_total", "Routed requests by outcome"),
        &["outcome"]  // outcome: completed/failed
    ).expect("metric creation failed");

    /// Routed request latency
    pub static ref REQUEST_LATENCY: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tp_balancer_request_latency_seconds",
            "Latency of routed requests"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).unwrap_or_default())
    ).expect("metric creation failed");

    // =========================================================================
    // SERVICE METRICS
    // =========================================================================

    /// Committed transactions per second
    pub static ref CURRENT_TPS: Gauge = Gauge::new(
        "tp_service_current_tps",
        "Committed transactions per second over the monitoring window"
    ).expect("metric creation failed");

    /// Rolling average latency
    pub static ref AVG_LATENCY_MS: Gauge = Gauge::new(
        "tp_service_avg_latency_ms",
        "Rolling average latency in milliseconds"
    ).expect("metric creation failed");

    /// Pending queue depth
    pub static ref PENDING_TRANSACTIONS: Gauge = Gauge::new(
        "tp_service_pending_transactions",
        "Transactions waiting in the pending queue"
    ).expect("metric creation failed");

    /// Total processed transactions as last reported
    pub static ref PROCESSED_TRANSACTIONS: Gauge = Gauge::new(
        "tp_service_processed_transactions",
        "Committed transactions since start"
    ).expect("metric creation failed");

    /// Nodes eligible for routing
    pub static ref ACTIVE_NODES: Gauge = Gauge::new(
        "tp_service_active_nodes",
        "Worker nodes in active status"
    ).expect("metric creation failed");

    // =========================================================================
    // TARGET CONTROLLER METRICS
    // =========================================================================

    /// Target transitions
    pub static ref TARGET_TRANSITIONS: CounterVec = CounterVec::new(
        Opts::new("tp_targets_transitions_total", "Throughput target transitions"),
        &["target", "outcome"]  // outcome: started/achieved/failed
    ).expect("metric creation failed");

    /// Observed rate of the last benchmark per target
    pub static ref BENCHMARK_OBSERVED_TPS: GaugeVec = GaugeVec::new(
        Opts::new("tp_targets_benchmark_observed_tps", "Observed TPS of the benchmark run"),
        &["target"]
    ).expect("metric creation failed");

    /// Stability of the last benchmark per target
    pub static ref BENCHMARK_STABILITY: GaugeVec = GaugeVec::new(
        Opts::new("tp_targets_benchmark_stability_pct", "Latency stability of the benchmark run"),
        &["target"]
    ).expect("metric creation failed");

    /// Completed scaling strategies
    pub static ref STRATEGIES_COMPLETED: CounterVec = CounterVec::new(
        Opts::new("tp_targets_strategies_completed_total", "Scaling strategies implemented"),
        &["strategy"]
    ).expect("metric creation failed");

    // =========================================================================
    // EVENT BUS METRICS
    // =========================================================================

    /// Events observed by the bridge
    pub static ref EVENTS_OBSERVED: CounterVec = CounterVec::new(
        Opts::new("tp_eventbus_events_observed_total", "Events consumed by the metrics bridge"),
        &["event_type"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once; collectors already registered are skipped.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Batcher
        Box::new(BATCHES.clone()),
        Box::new(BATCH_TRIGGERS.clone()),
        Box::new(TRANSACTIONS_COMMITTED.clone()),
        Box::new(TRANSACTIONS_FAILED.clone()),
        Box::new(BATCH_SIZE.clone()),
        Box::new(BATCH_DURATION.clone()),
        Box::new(AGGREGATIONS.clone()),
        // Load balancer
        Box::new(WORKER_NODES.clone()),
        Box::new(NODE_HEALTH_CHANGES.clone()),
        Box::new(ROUTED_REQUESTS.clone()),
        Box::new(REQUEST_LATENCY.clone()),
        // Service
        Box::new(CURRENT_TPS.clone()),
        Box::new(AVG_LATENCY_MS.clone()),
        Box::new(PENDING_TRANSACTIONS.clone()),
        Box::new(PROCESSED_TRANSACTIONS.clone()),
        Box::new(ACTIVE_NODES.clone()),
        // Targets
        Box::new(TARGET_TRANSITIONS.clone()),
        Box::new(BENCHMARK_OBSERVED_TPS.clone()),
        Box::new(BENCHMARK_STABILITY.clone()),
        Box::new(STRATEGIES_COMPLETED.clone()),
        // Event bus
        Box::new(EVENTS_OBSERVED.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Update the collectors from one pipeline event.
pub fn observe_event(event: &PipelineEvent) {
    EVENTS_OBSERVED.with_label_values(&[event.name()]).inc();

    match event {
        PipelineEvent::BatchCreated {
            tx_count, trigger, ..
        } => {
            BATCHES.with_label_values(&["created"]).inc();
            BATCH_TRIGGERS.with_label_values(&[trigger.as_str()]).inc();
            BATCH_SIZE.observe(*tx_count as f64);
        }
        PipelineEvent::BatchComplete {
            tx_count,
            duration_ms,
            algorithm,
            ..
        } => {
            BATCHES.with_label_values(&["committed"]).inc();
            TRANSACTIONS_COMMITTED.inc_by(*tx_count as f64);
            BATCH_DURATION.observe(*duration_ms as f64 / 1000.0);
            AGGREGATIONS.with_label_values(&[algorithm.as_str()]).inc();
        }
        PipelineEvent::BatchError { tx_count, .. } => {
            BATCHES.with_label_values(&["failed"]).inc();
            TRANSACTIONS_FAILED.inc_by(*tx_count as f64);
        }
        PipelineEvent::WorkerNodeAdded { .. } => WORKER_NODES.inc(),
        PipelineEvent::WorkerNodeRemoved { .. } => WORKER_NODES.dec(),
        PipelineEvent::NodeHealthChanged { status, .. } => {
            NODE_HEALTH_CHANGES.with_label_values(&[status.as_str()]).inc();
        }
        PipelineEvent::RequestCompleted { latency_ms, .. } => {
            ROUTED_REQUESTS.with_label_values(&["completed"]).inc();
            REQUEST_LATENCY.observe(latency_ms / 1000.0);
        }
        PipelineEvent::RequestFailed { latency_ms, .. } => {
            ROUTED_REQUESTS.with_label_values(&["failed"]).inc();
            REQUEST_LATENCY.observe(latency_ms / 1000.0);
        }
        PipelineEvent::MetricsUpdated {
            current_tps,
            avg_latency_ms,
            pending_transactions,
            processed_transactions,
            active_nodes,
        } => {
            CURRENT_TPS.set(*current_tps);
            AVG_LATENCY_MS.set(*avg_latency_ms);
            PENDING_TRANSACTIONS.set(*pending_transactions as f64);
            PROCESSED_TRANSACTIONS.set(*processed_transactions as f64);
            ACTIVE_NODES.set(*active_nodes as f64);
        }
        PipelineEvent::BenchmarkCollected {
            target_id,
            observed_tps,
            stability_pct,
            ..
        } => {
            BENCHMARK_OBSERVED_TPS
                .with_label_values(&[target_id.as_str()])
                .set(*observed_tps);
            BENCHMARK_STABILITY
                .with_label_values(&[target_id.as_str()])
                .set(*stability_pct);
        }
        PipelineEvent::TargetStarted { target_id, .. } => {
            TARGET_TRANSITIONS
                .with_label_values(&[target_id.as_str(), "started"])
                .inc();
        }
        PipelineEvent::TargetAchieved { target_id, .. } => {
            TARGET_TRANSITIONS
                .with_label_values(&[target_id.as_str(), "achieved"])
                .inc();
        }
        PipelineEvent::TargetFailed { target_id, .. } => {
            TARGET_TRANSITIONS
                .with_label_values(&[target_id.as_str(), "failed"])
                .inc();
        }
        PipelineEvent::StrategyCompleted { strategy_id } => {
            STRATEGIES_COMPLETED
                .with_label_values(&[strategy_id.as_str()])
                .inc();
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_register_metrics_twice() {
        register_metrics().unwrap();
        register_metrics().unwrap();
    }

    #[test]
    fn test_batch_complete_counts_transactions() {
        let before = TRANSACTIONS_COMMITTED.get();
        observe_event(&PipelineEvent::BatchComplete {
            batch_id: Uuid::new_v4(),
            tx_count: 100,
            duration_ms: 12,
            algorithm: "bls-aggregation".to_string(),
        });
        assert!(TRANSACTIONS_COMMITTED.get() - before >= 100.0);
        assert!(AGGREGATIONS.with_label_values(&["bls-aggregation"]).get() >= 1.0);
    }

    #[test]
    fn test_metrics_updated_sets_gauges() {
        observe_event(&PipelineEvent::MetricsUpdated {
            current_tps: 1234.5,
            avg_latency_ms: 7.0,
            pending_transactions: 42,
            processed_transactions: 9000,
            active_nodes: 3,
        });
        // Gauges are shared across tests; only this test writes them.
        assert_eq!(CURRENT_TPS.get(), 1234.5);
        assert_eq!(PENDING_TRANSACTIONS.get(), 42.0);
        assert_eq!(ACTIVE_NODES.get(), 3.0);
    }

    #[test]
    fn test_encode_contains_registered_metrics() {
        register_metrics().unwrap();
        observe_event(&PipelineEvent::TargetStarted {
            target_id: "target-10k".to_string(),
            target_tps: 10_000,
        });
        let text = encode_metrics().unwrap();
        assert!(text.contains("tp_targets_transitions_total"));
        assert!(text.contains("target-10k"));
    }
}
