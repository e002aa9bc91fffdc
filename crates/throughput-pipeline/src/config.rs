//! Configuration for the throughput pipeline.
//!
//! Every component takes its own sub-config; `PipelineConfig` bundles them
//! and loads overrides from `PIPELINE_*` environment variables.

use crate::domain::{SelectionStrategy, MIN_GAS_LIMIT};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("Invalid value '{value}' for {key}: {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },

    /// Parsed values are inconsistent.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// =============================================================================
// STRATEGY ENUMS
// =============================================================================

/// Node selection strategy for the load balancer.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    LeastConnections,
    /// Smooth weighted round-robin by node capacity.
    Weighted,
    /// Same-region nodes first, least connections among them.
    RegionAware,
}

impl LoadBalancingStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RoundRobin => "round-robin",
            Self::LeastConnections => "least-connections",
            Self::Weighted => "weighted",
            Self::RegionAware => "region-aware",
        }
    }
}

impl fmt::Display for LoadBalancingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalancingStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "round-robin" => Ok(Self::RoundRobin),
            "least-connections" => Ok(Self::LeastConnections),
            "weighted" => Ok(Self::Weighted),
            "region-aware" => Ok(Self::RegionAware),
            other => Err(format!("unknown load balancing strategy '{other}'")),
        }
    }
}

/// How a batch's signatures are checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValidationStrategy {
    Parallel,
    Sequential,
    /// Sequential below the adaptive threshold, parallel at or above it.
    #[default]
    Adaptive,
}

impl ValidationStrategy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Parallel => "parallel",
            Self::Sequential => "sequential",
            Self::Adaptive => "adaptive",
        }
    }

    /// Whether a batch of `len` transactions is validated in parallel.
    #[must_use]
    pub fn is_parallel(self, len: usize, adaptive_threshold: usize) -> bool {
        match self {
            Self::Parallel => true,
            Self::Sequential => false,
            Self::Adaptive => len >= adaptive_threshold,
        }
    }
}

impl FromStr for ValidationStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parallel" => Ok(Self::Parallel),
            "sequential" => Ok(Self::Sequential),
            "adaptive" => Ok(Self::Adaptive),
            other => Err(format!("unknown validation strategy '{other}'")),
        }
    }
}

// =============================================================================
// COMPONENT CONFIGS
// =============================================================================

/// Worker pool configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Fixed number of concurrent job slots.
    pub max_workers: usize,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self { max_workers: 8 }
    }
}

/// Batch formation and execution configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatcherConfig {
    /// Maximum transactions per batch.
    pub max_batch_size: usize,
    /// Minimum pending count for priority and timer formation.
    pub min_batch_size: usize,
    /// Maximum total gas per batch.
    pub max_gas_limit: u64,
    /// Wait timer period.
    pub max_wait: Duration,
    /// Head-of-queue priority that short-circuits batching.
    pub priority_threshold: u8,
    pub selection_strategy: SelectionStrategy,
    pub validation_strategy: ValidationStrategy,
    /// Batch size at which adaptive validation goes parallel.
    pub adaptive_threshold: usize,
    /// Batches executing at once. 1 keeps the single-flight behaviour.
    pub max_in_flight_batches: usize,
    /// Terminal batches kept for inspection.
    pub archive_limit: usize,
    /// Worker pool priority for batch steps.
    pub job_priority: u8,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            min_batch_size: 10,
            max_gas_limit: 30_000_000,
            max_wait: Duration::from_millis(500),
            priority_threshold: 8,
            selection_strategy: SelectionStrategy::Hybrid,
            validation_strategy: ValidationStrategy::Adaptive,
            adaptive_threshold: 10,
            max_in_flight_batches: 1,
            archive_limit: 1_000,
            job_priority: 5,
        }
    }
}

/// Load balancer configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerConfig {
    pub strategy: LoadBalancingStrategy,
    pub health_check_interval: Duration,
    /// Consecutive probe failures that demote a node.
    pub unhealthy_threshold: u32,
    /// Retries on other nodes after the first attempt fails.
    pub max_retries: u32,
    /// Restrict quantum requests to quantum-ready nodes.
    pub enable_quantum_awareness: bool,
    /// Smoothing factor of the latency moving average.
    pub latency_alpha: f64,
}

impl Default for LoadBalancerConfig {
    fn default() -> Self {
        Self {
            strategy: LoadBalancingStrategy::RoundRobin,
            health_check_interval: Duration::from_secs(5),
            unhealthy_threshold: 3,
            max_retries: 3,
            enable_quantum_awareness: false,
            latency_alpha: 0.2,
        }
    }
}

/// Throughput target controller configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetControllerConfig {
    /// Progress added per healthy tick, in percentage points.
    pub progress_step: f64,
    /// Consecutive ticks below the success hard floor before failing.
    pub max_unhealthy_ticks: u32,
    /// Progress snapshots kept per target.
    pub history_limit: usize,
    /// Allowed shortfall of observed vs target rate, in percent.
    pub benchmark_tolerance_pct: f64,
    /// Simulated rollout time of a scaling strategy.
    pub strategy_delay: Duration,
    /// Enforce quantum-node requirements.
    pub enable_quantum_awareness: bool,
}

impl Default for TargetControllerConfig {
    fn default() -> Self {
        Self {
            progress_step: 5.0,
            max_unhealthy_ticks: 3,
            history_limit: 100,
            benchmark_tolerance_pct: 5.0,
            strategy_delay: Duration::from_secs(2),
            enable_quantum_awareness: false,
        }
    }
}

/// Complete pipeline configuration.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub worker_pool: WorkerPoolConfig,
    pub batcher: BatcherConfig,
    pub load_balancer: LoadBalancerConfig,
    pub targets: TargetControllerConfig,
    pub monitoring: MonitoringConfig,
}

/// Service monitoring loop configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Period of the monitoring tick.
    pub interval: Duration,
    /// Window over which the current TPS is measured.
    pub tps_window: Duration,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            tps_window: Duration::from_secs(10),
        }
    }
}

impl PipelineConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_MAX_WORKERS`: Worker pool size (default: 8)
    /// - `PIPELINE_BATCH_SIZE`: Maximum batch size (default: 100)
    /// - `PIPELINE_MIN_BATCH_SIZE`: Minimum batch size (default: 10)
    /// - `PIPELINE_MAX_GAS_LIMIT`: Maximum gas per batch (default: 30000000)
    /// - `PIPELINE_BATCH_WAIT_MS`: Wait timer period (default: 500)
    /// - `PIPELINE_PRIORITY_THRESHOLD`: Urgent priority (default: 8)
    /// - `PIPELINE_MAX_IN_FLIGHT_BATCHES`: Concurrent batches (default: 1)
    /// - `PIPELINE_HEALTH_CHECK_INTERVAL_MS`: Probe cadence (default: 5000)
    /// - `PIPELINE_LOAD_BALANCING_STRATEGY`: round-robin, least-connections, weighted, region-aware
    /// - `PIPELINE_ENABLE_QUANTUM_AWARENESS`: true/false (default: false)
    /// - `PIPELINE_VALIDATION_STRATEGY`: parallel, sequential, adaptive
    /// - `PIPELINE_AGGREGATION_STRATEGY`: size, gas, time, hybrid
    /// - `PIPELINE_MAX_RETRIES`: Routing retries (default: 3)
    /// - `PIPELINE_MONITORING_INTERVAL_MS`: Monitoring tick (default: 1000)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse(&lookup, "PIPELINE_MAX_WORKERS")? {
            config.worker_pool.max_workers = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_BATCH_SIZE")? {
            config.batcher.max_batch_size = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_MIN_BATCH_SIZE")? {
            config.batcher.min_batch_size = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_MAX_GAS_LIMIT")? {
            config.batcher.max_gas_limit = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_BATCH_WAIT_MS")? {
            config.batcher.max_wait = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "PIPELINE_PRIORITY_THRESHOLD")? {
            config.batcher.priority_threshold = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_MAX_IN_FLIGHT_BATCHES")? {
            config.batcher.max_in_flight_batches = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_HEALTH_CHECK_INTERVAL_MS")? {
            config.load_balancer.health_check_interval = Duration::from_millis(v);
        }
        if let Some(v) = parse(&lookup, "PIPELINE_LOAD_BALANCING_STRATEGY")? {
            config.load_balancer.strategy = v;
        }
        if let Some(v) = lookup("PIPELINE_ENABLE_QUANTUM_AWARENESS") {
            let enabled = parse_bool("PIPELINE_ENABLE_QUANTUM_AWARENESS", &v)?;
            config.load_balancer.enable_quantum_awareness = enabled;
            config.targets.enable_quantum_awareness = enabled;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_VALIDATION_STRATEGY")? {
            config.batcher.validation_strategy = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_AGGREGATION_STRATEGY")? {
            config.batcher.selection_strategy = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_MAX_RETRIES")? {
            config.load_balancer.max_retries = v;
        }
        if let Some(v) = parse(&lookup, "PIPELINE_MONITORING_INTERVAL_MS")? {
            config.monitoring.interval = Duration::from_millis(v);
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let b = &self.batcher;
        if self.worker_pool.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        if b.max_batch_size == 0 {
            return Err(ConfigError::Invalid("max_batch_size must be at least 1".into()));
        }
        if b.min_batch_size == 0 || b.min_batch_size > b.max_batch_size {
            return Err(ConfigError::Invalid(format!(
                "min_batch_size {} must be within 1..={}",
                b.min_batch_size, b.max_batch_size
            )));
        }
        if b.max_gas_limit < MIN_GAS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_gas_limit {} cannot fit a single transaction",
                b.max_gas_limit
            )));
        }
        if b.max_wait.is_zero() {
            return Err(ConfigError::Invalid("batch wait must be positive".into()));
        }
        if b.max_in_flight_batches == 0 {
            return Err(ConfigError::Invalid(
                "max_in_flight_batches must be at least 1".into(),
            ));
        }
        if self.load_balancer.health_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "health check interval must be positive".into(),
            ));
        }
        if self.load_balancer.unhealthy_threshold == 0 {
            return Err(ConfigError::Invalid(
                "unhealthy_threshold must be at least 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.load_balancer.latency_alpha) {
            return Err(ConfigError::Invalid("latency_alpha must be within 0..=1".into()));
        }
        if self.targets.progress_step <= 0.0 {
            return Err(ConfigError::Invalid("progress_step must be positive".into()));
        }
        if self.monitoring.interval.is_zero() {
            return Err(ConfigError::Invalid(
                "monitoring interval must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn parse<F, T>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse()
        .map(Some)
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "expected true or false".to_string(),
        }),
    }
}
