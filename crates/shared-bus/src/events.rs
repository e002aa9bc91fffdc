//! # Pipeline Events
//!
//! Defines every event that flows through the shared bus. Payloads carry
//! plain identifiers and numbers so that sinks never need the pipeline's
//! domain types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// All events that can be published to the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    // =========================================================================
    // BATCHING
    // =========================================================================
    /// A batch was formed from the pending queue.
    BatchCreated {
        /// Batch identity.
        batch_id: Uuid,
        /// Number of transactions drawn into the batch.
        tx_count: usize,
        /// Sum of the transactions' gas limits.
        total_gas: u64,
        /// What caused the formation (size, priority, timer, flush).
        trigger: String,
    },

    /// A batch was validated, aggregated and committed.
    BatchComplete {
        /// Batch identity.
        batch_id: Uuid,
        /// Number of committed transactions.
        tx_count: usize,
        /// Wall time from creation to commit.
        duration_ms: u64,
        /// Aggregation algorithm used for the batch signature.
        algorithm: String,
    },

    /// A batch failed and was archived with its error.
    BatchError {
        /// Batch identity.
        batch_id: Uuid,
        /// Number of transactions recorded on the failed batch.
        tx_count: usize,
        /// Failure description.
        error: String,
    },

    // =========================================================================
    // LOAD BALANCING
    // =========================================================================
    /// A worker node joined the registry.
    WorkerNodeAdded {
        node_id: String,
        region: String,
        quantum_ready: bool,
        max_capacity: u32,
    },

    /// A worker node left the registry (after draining).
    WorkerNodeRemoved { node_id: String },

    /// Health checks moved a node between active and unhealthy.
    NodeHealthChanged {
        node_id: String,
        /// New status, lower-case (`active`, `draining`, `unhealthy`).
        status: String,
    },

    /// A routed request finished successfully on a node.
    RequestCompleted { node_id: String, latency_ms: f64 },

    /// A routed request failed on a node.
    RequestFailed {
        node_id: String,
        latency_ms: f64,
        error: String,
    },

    // =========================================================================
    // METRICS
    // =========================================================================
    /// Periodic snapshot of the service's aggregate metrics.
    MetricsUpdated {
        current_tps: f64,
        avg_latency_ms: f64,
        pending_transactions: usize,
        processed_transactions: u64,
        active_nodes: usize,
    },

    /// A benchmark run was recorded for an achieved target.
    BenchmarkCollected {
        target_id: String,
        target_tps: u64,
        observed_tps: f64,
        within_tolerance: bool,
        stability_pct: f64,
    },

    // =========================================================================
    // TARGETS
    // =========================================================================
    /// A throughput target entered `in_progress`.
    TargetStarted { target_id: String, target_tps: u64 },

    /// A throughput target reached 100% progress.
    TargetAchieved { target_id: String, target_tps: u64 },

    /// A throughput target failed; the sequence halts here.
    TargetFailed { target_id: String, reason: String },

    /// A scaling strategy finished its implementation.
    StrategyCompleted { strategy_id: String },
}

impl PipelineEvent {
    /// Get the topic for this event (for filtering).
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::BatchCreated { .. } | Self::BatchComplete { .. } | Self::BatchError { .. } => {
                EventTopic::Batching
            }
            Self::WorkerNodeAdded { .. }
            | Self::WorkerNodeRemoved { .. }
            | Self::NodeHealthChanged { .. }
            | Self::RequestCompleted { .. }
            | Self::RequestFailed { .. } => EventTopic::LoadBalancing,
            Self::MetricsUpdated { .. } | Self::BenchmarkCollected { .. } => EventTopic::Metrics,
            Self::TargetStarted { .. }
            | Self::TargetAchieved { .. }
            | Self::TargetFailed { .. }
            | Self::StrategyCompleted { .. } => EventTopic::Targets,
        }
    }

    /// Get the component that emitted this event.
    #[must_use]
    pub fn source(&self) -> Component {
        match self {
            Self::BatchCreated { .. } | Self::BatchComplete { .. } | Self::BatchError { .. } => {
                Component::Batcher
            }
            Self::WorkerNodeAdded { .. }
            | Self::WorkerNodeRemoved { .. }
            | Self::NodeHealthChanged { .. }
            | Self::RequestCompleted { .. }
            | Self::RequestFailed { .. } => Component::LoadBalancer,
            Self::MetricsUpdated { .. } => Component::Service,
            Self::BenchmarkCollected { .. }
            | Self::TargetStarted { .. }
            | Self::TargetAchieved { .. }
            | Self::TargetFailed { .. }
            | Self::StrategyCompleted { .. } => Component::TargetController,
        }
    }

    /// Short snake_case name, used as a metric label.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::BatchCreated { .. } => "batch_created",
            Self::BatchComplete { .. } => "batch_complete",
            Self::BatchError { .. } => "batch_error",
            Self::WorkerNodeAdded { .. } => "worker_node_added",
            Self::WorkerNodeRemoved { .. } => "worker_node_removed",
            Self::NodeHealthChanged { .. } => "node_health_changed",
            Self::RequestCompleted { .. } => "request_completed",
            Self::RequestFailed { .. } => "request_failed",
            Self::MetricsUpdated { .. } => "metrics_updated",
            Self::BenchmarkCollected { .. } => "benchmark_collected",
            Self::TargetStarted { .. } => "target_started",
            Self::TargetAchieved { .. } => "target_achieved",
            Self::TargetFailed { .. } => "target_failed",
            Self::StrategyCompleted { .. } => "strategy_completed",
        }
    }
}

/// Event topics for subscription filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Batch lifecycle events.
    Batching,
    /// Node registry and routing events.
    LoadBalancing,
    /// Aggregate metrics and benchmarks.
    Metrics,
    /// Staged throughput targets and scaling strategies.
    Targets,
    /// All events (no filtering).
    All,
}

/// Pipeline component that emitted an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Component {
    Batcher,
    LoadBalancer,
    TargetController,
    Service,
}

/// Filter for subscribing to specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Topics to include. Empty means all topics.
    pub topics: Vec<EventTopic>,
    /// Source components to include. Empty means all sources.
    pub components: Vec<Component>,
}

impl EventFilter {
    /// Create a filter that accepts all events.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Create a filter for specific topics.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            components: Vec::new(),
        }
    }

    /// Create a filter for events from specific components.
    #[must_use]
    pub fn from_components(components: Vec<Component>) -> Self {
        Self {
            topics: Vec::new(),
            components,
        }
    }

    /// Check if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &PipelineEvent) -> bool {
        let topic_match = self.topics.is_empty()
            || self.topics.contains(&EventTopic::All)
            || self.topics.contains(&event.topic());

        let source_match = self.components.is_empty() || self.components.contains(&event.source());

        topic_match && source_match
    }
}
