//! # Throughput Targets
//!
//! Value types for the staged target sequence and the scaling strategy
//! catalog. The state machine driving them lives in `controller`.
//!
//! ```text
//! [NOT_STARTED] ──start/previous achieved──→ [IN_PROGRESS] ──100%──→ [ACHIEVED]
//!                                                  │
//!                                                  └── sustained failure ──→ [FAILED]
//! ```

use serde::{Deserialize, Serialize};

/// Latency above which a tick raises an issue.
pub const LATENCY_THRESHOLD_MS: f64 = 25.0;
/// Success rate below which a tick raises an issue.
pub const SUCCESS_RATE_THRESHOLD: f64 = 97.0;
/// Error rate above which a tick raises an issue.
pub const ERROR_RATE_THRESHOLD: f64 = 1.0;
/// Efficiency below which a tick raises an issue.
pub const EFFICIENCY_THRESHOLD: f64 = 85.0;
/// Success rate below which a tick counts towards failing the target.
pub const SUCCESS_RATE_HARD_FLOOR: f64 = 90.0;

/// Target state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetStatus {
    NotStarted,
    InProgress,
    Achieved,
    Failed,
}

impl TargetStatus {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Achieved | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Achieved => "achieved",
            Self::Failed => "failed",
        }
    }
}

/// Resources a target needs before it can make progress.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    pub min_nodes: usize,
    pub min_shards: usize,
    /// Only enforced when quantum awareness is enabled.
    pub min_quantum_nodes: usize,
    pub requires_gpu: bool,
    pub requires_batching: bool,
    pub requires_signature_aggregation: bool,
}

impl ResourceRequirements {
    /// Human-readable list of what `available` lacks. Empty when met.
    #[must_use]
    pub fn shortfalls(&self, available: &ResourceSnapshot, quantum_awareness: bool) -> Vec<String> {
        let mut missing = Vec::new();
        if available.active_nodes < self.min_nodes {
            missing.push(format!(
                "{} of {} nodes",
                available.active_nodes, self.min_nodes
            ));
        }
        if available.shards < self.min_shards {
            missing.push(format!("{} of {} shards", available.shards, self.min_shards));
        }
        if quantum_awareness && available.quantum_nodes < self.min_quantum_nodes {
            missing.push(format!(
                "{} of {} quantum-ready nodes",
                available.quantum_nodes, self.min_quantum_nodes
            ));
        }
        if self.requires_gpu && !available.gpu_available {
            missing.push("gpu acceleration".to_string());
        }
        if self.requires_batching && !available.batching_enabled {
            missing.push("adaptive batching".to_string());
        }
        if self.requires_signature_aggregation && !available.aggregation_enabled {
            missing.push("signature aggregation".to_string());
        }
        missing
    }
}

/// Resources observed at a monitoring tick.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSnapshot {
    pub active_nodes: usize,
    pub quantum_nodes: usize,
    pub shards: usize,
    pub gpu_available: bool,
    pub batching_enabled: bool,
    pub aggregation_enabled: bool,
}

/// Observations fed into one controller tick.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputSample {
    pub latency_ms: f64,
    /// Percentage, 0-100.
    pub success_rate: f64,
    /// Percentage, 0-100.
    pub error_rate: f64,
    pub resources: ResourceSnapshot,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeographyConfig {
    pub regions: Vec<String>,
    pub nodes_per_region: usize,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShardConfig {
    pub shard_count: usize,
    /// Expected fraction of cross-shard transactions.
    pub cross_shard_ratio: f64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuConfig {
    pub enabled: bool,
    pub devices: usize,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchBundle {
    pub max_batch_size: usize,
    pub max_wait_ms: u64,
    pub signature_aggregation: bool,
}

/// Deployment configuration that goes with a target.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetConfiguration {
    pub geography: GeographyConfig,
    pub shard: ShardConfig,
    pub gpu: GpuConfig,
    pub batch: BatchBundle,
}

/// Rolling health of a target.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetMetrics {
    pub latency_ms: f64,
    pub success_rate: f64,
    pub error_rate: f64,
    pub efficiency: f64,
}

impl TargetMetrics {
    /// Metrics for a sample. Efficiency scales the success rate down once
    /// latency exceeds the threshold.
    #[must_use]
    pub fn from_sample(sample: &ThroughputSample) -> Self {
        let latency_factor = if sample.latency_ms > LATENCY_THRESHOLD_MS {
            LATENCY_THRESHOLD_MS / sample.latency_ms
        } else {
            1.0
        };
        Self {
            latency_ms: sample.latency_ms,
            success_rate: sample.success_rate,
            error_rate: sample.error_rate,
            efficiency: sample.success_rate * latency_factor,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IssueKind {
    HighLatency,
    LowSuccessRate,
    HighErrorRate,
    LowEfficiency,
    InsufficientResources,
}

/// A health finding with its recommendation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetIssue {
    pub kind: IssueKind,
    pub message: String,
    pub recommendation: String,
}

impl TargetIssue {
    /// Issues raised by `metrics` against the fixed thresholds.
    #[must_use]
    pub fn evaluate(metrics: &TargetMetrics) -> Vec<Self> {
        let mut issues = Vec::new();
        if metrics.latency_ms > LATENCY_THRESHOLD_MS {
            issues.push(Self {
                kind: IssueKind::HighLatency,
                message: format!(
                    "latency {:.1}ms above {LATENCY_THRESHOLD_MS}ms",
                    metrics.latency_ms
                ),
                recommendation: "add nodes in congested regions or reduce batch wait".to_string(),
            });
        }
        if metrics.success_rate < SUCCESS_RATE_THRESHOLD {
            issues.push(Self {
                kind: IssueKind::LowSuccessRate,
                message: format!(
                    "success rate {:.1}% below {SUCCESS_RATE_THRESHOLD}%",
                    metrics.success_rate
                ),
                recommendation: "inspect failed batches and unhealthy nodes".to_string(),
            });
        }
        if metrics.error_rate > ERROR_RATE_THRESHOLD {
            issues.push(Self {
                kind: IssueKind::HighErrorRate,
                message: format!(
                    "error rate {:.2}% above {ERROR_RATE_THRESHOLD}%",
                    metrics.error_rate
                ),
                recommendation: "raise retry count or replace failing nodes".to_string(),
            });
        }
        if metrics.efficiency < EFFICIENCY_THRESHOLD {
            issues.push(Self {
                kind: IssueKind::LowEfficiency,
                message: format!(
                    "efficiency {:.1}% below {EFFICIENCY_THRESHOLD}%",
                    metrics.efficiency
                ),
                recommendation: "enable signature aggregation and larger batches".to_string(),
            });
        }
        issues
    }
}

/// Progress history entry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub tick: u64,
    pub progress: f64,
    pub current_tps: f64,
    pub metrics: TargetMetrics,
}

/// One stage of the throughput sequence.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ThroughputTarget {
    pub id: String,
    pub name: String,
    pub target_tps: u64,
    pub current_tps: f64,
    pub status: TargetStatus,
    /// Percentage, 0-100.
    pub progress: f64,
    pub requirements: ResourceRequirements,
    pub configuration: TargetConfiguration,
    pub metrics: TargetMetrics,
    /// Issues raised by the latest tick.
    pub issues: Vec<TargetIssue>,
    /// Bounded, oldest evicted first.
    pub history: Vec<ProgressSnapshot>,
    /// Consecutive ticks below the success-rate hard floor.
    pub unhealthy_ticks: u32,
    pub failure_reason: Option<String>,
}

/// Recorded when a target is achieved.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRun {
    pub target_id: String,
    pub target_tps: u64,
    pub observed_tps: f64,
    pub within_tolerance: bool,
    /// 100 × (1 − coefficient of variation of latency).
    pub stability_pct: f64,
    pub avg_latency_ms: f64,
    pub ticks: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StrategyStatus {
    Pending,
    InProgress,
    Completed,
}

impl StrategyStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

/// A capacity increase the controller can recommend and apply.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScalingStrategy {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Lower runs first.
    pub priority: u8,
    pub estimated_improvement_pct: f64,
    /// Nominal rollout time in hours.
    pub implementation_hours: u32,
    pub risk: RiskLevel,
    pub dependencies: Vec<String>,
    pub status: StrategyStatus,
}

// =============================================================================
// CATALOGS
// =============================================================================

fn regions(names: &[&str]) -> Vec<String> {
    names.iter().map(|r| (*r).to_string()).collect()
}

fn target(
    id: &str,
    name: &str,
    target_tps: u64,
    requirements: ResourceRequirements,
    configuration: TargetConfiguration,
) -> ThroughputTarget {
    ThroughputTarget {
        id: id.to_string(),
        name: name.to_string(),
        target_tps,
        current_tps: 0.0,
        status: TargetStatus::NotStarted,
        progress: 0.0,
        requirements,
        configuration,
        metrics: TargetMetrics::default(),
        issues: Vec::new(),
        history: Vec::new(),
        unhealthy_ticks: 0,
        failure_reason: None,
    }
}

/// The staged target sequence, in order.
#[must_use]
pub fn default_targets() -> Vec<ThroughputTarget> {
    vec![
        target(
            "tps-1k",
            "Baseline 1k TPS",
            1_000,
            ResourceRequirements {
                min_nodes: 1,
                min_shards: 1,
                min_quantum_nodes: 0,
                requires_gpu: false,
                requires_batching: true,
                requires_signature_aggregation: false,
            },
            TargetConfiguration {
                geography: GeographyConfig {
                    regions: regions(&["us-east"]),
                    nodes_per_region: 1,
                },
                shard: ShardConfig {
                    shard_count: 1,
                    cross_shard_ratio: 0.0,
                },
                gpu: GpuConfig {
                    enabled: false,
                    devices: 0,
                },
                batch: BatchBundle {
                    max_batch_size: 100,
                    max_wait_ms: 500,
                    signature_aggregation: false,
                },
            },
        ),
        target(
            "tps-10k",
            "Batched 10k TPS",
            10_000,
            ResourceRequirements {
                min_nodes: 3,
                min_shards: 1,
                min_quantum_nodes: 1,
                requires_gpu: false,
                requires_batching: true,
                requires_signature_aggregation: true,
            },
            TargetConfiguration {
                geography: GeographyConfig {
                    regions: regions(&["us-east", "eu-west"]),
                    nodes_per_region: 2,
                },
                shard: ShardConfig {
                    shard_count: 1,
                    cross_shard_ratio: 0.0,
                },
                gpu: GpuConfig {
                    enabled: false,
                    devices: 0,
                },
                batch: BatchBundle {
                    max_batch_size: 500,
                    max_wait_ms: 200,
                    signature_aggregation: true,
                },
            },
        ),
        target(
            "tps-30k",
            "Sharded 30k TPS",
            30_000,
            ResourceRequirements {
                min_nodes: 5,
                min_shards: 4,
                min_quantum_nodes: 2,
                requires_gpu: false,
                requires_batching: true,
                requires_signature_aggregation: true,
            },
            TargetConfiguration {
                geography: GeographyConfig {
                    regions: regions(&["us-east", "eu-west", "ap-south"]),
                    nodes_per_region: 2,
                },
                shard: ShardConfig {
                    shard_count: 4,
                    cross_shard_ratio: 0.1,
                },
                gpu: GpuConfig {
                    enabled: false,
                    devices: 0,
                },
                batch: BatchBundle {
                    max_batch_size: 1_000,
                    max_wait_ms: 100,
                    signature_aggregation: true,
                },
            },
        ),
        target(
            "tps-75k",
            "Accelerated 75k TPS",
            75_000,
            ResourceRequirements {
                min_nodes: 8,
                min_shards: 8,
                min_quantum_nodes: 4,
                requires_gpu: true,
                requires_batching: true,
                requires_signature_aggregation: true,
            },
            TargetConfiguration {
                geography: GeographyConfig {
                    regions: regions(&["us-east", "us-west", "eu-west", "ap-south"]),
                    nodes_per_region: 2,
                },
                shard: ShardConfig {
                    shard_count: 8,
                    cross_shard_ratio: 0.15,
                },
                gpu: GpuConfig {
                    enabled: true,
                    devices: 4,
                },
                batch: BatchBundle {
                    max_batch_size: 2_000,
                    max_wait_ms: 50,
                    signature_aggregation: true,
                },
            },
        ),
    ]
}

#[allow(clippy::too_many_arguments)]
fn strategy(
    id: &str,
    name: &str,
    description: &str,
    priority: u8,
    estimated_improvement_pct: f64,
    implementation_hours: u32,
    risk: RiskLevel,
    dependencies: &[&str],
) -> ScalingStrategy {
    ScalingStrategy {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        priority,
        estimated_improvement_pct,
        implementation_hours,
        risk,
        dependencies: dependencies.iter().map(|d| (*d).to_string()).collect(),
        status: StrategyStatus::Pending,
    }
}

/// Strategy ids with a capability effect on the resource snapshot.
pub const STATE_SHARDING: &str = "state-sharding";
pub const GPU_ACCELERATION: &str = "gpu-acceleration";
pub const SIGNATURE_AGGREGATION: &str = "signature-aggregation";
pub const ADAPTIVE_BATCHING: &str = "adaptive-batching";

/// The scaling strategy catalog.
#[must_use]
pub fn default_strategies() -> Vec<ScalingStrategy> {
    vec![
        strategy(
            "horizontal-scaling",
            "Horizontal scaling",
            "Add worker nodes behind the load balancer",
            1,
            40.0,
            4,
            RiskLevel::Low,
            &[],
        ),
        strategy(
            ADAPTIVE_BATCHING,
            "Adaptive batching",
            "Tune batch size and wait time to the observed load",
            1,
            35.0,
            2,
            RiskLevel::Low,
            &[],
        ),
        strategy(
            SIGNATURE_AGGREGATION,
            "Signature aggregation",
            "Replace per-transaction signatures with one aggregate per batch",
            2,
            25.0,
            8,
            RiskLevel::Medium,
            &[ADAPTIVE_BATCHING],
        ),
        strategy(
            STATE_SHARDING,
            "State sharding",
            "Partition state across shards processed in parallel",
            2,
            150.0,
            40,
            RiskLevel::High,
            &["horizontal-scaling"],
        ),
        strategy(
            GPU_ACCELERATION,
            "GPU acceleration",
            "Offload signature verification and hashing to GPUs",
            3,
            60.0,
            24,
            RiskLevel::Medium,
            &[SIGNATURE_AGGREGATION],
        ),
        strategy(
            "geo-distribution",
            "Geographic distribution",
            "Spread nodes across regions to cut client latency",
            3,
            50.0,
            32,
            RiskLevel::High,
            &[STATE_SHARDING],
        ),
    ]
}
