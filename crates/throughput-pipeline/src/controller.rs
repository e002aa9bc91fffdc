//! # Throughput Target Controller
//!
//! Drives the staged target sequence one monitoring tick at a time and
//! owns the scaling strategy catalog.
//!
//! ## Tick
//!
//! 1. Find the single `InProgress` target. None means nothing to do.
//! 2. Check its resource requirements against the sample, with completed
//!    strategies applied. Unmet requirements stall progress.
//! 3. Evaluate health against the fixed thresholds. Sustained success
//!    below the hard floor fails the target.
//! 4. Advance progress, halved while any issue is open.
//! 5. At 100%: mark achieved, record a benchmark and start the next target.
//!
//! Targets are activated strictly in catalog order, so at most one is ever
//! `InProgress`. A failed target is terminal and stalls the sequence.

use crate::config::TargetControllerConfig;
use crate::domain::{
    default_strategies, default_targets, BenchmarkRun, IssueKind, PipelineError, PipelineResult,
    ProgressSnapshot, ResourceSnapshot, ScalingStrategy, StrategyStatus, TargetIssue,
    TargetMetrics, TargetStatus, ThroughputSample, ThroughputTarget, ADAPTIVE_BATCHING,
    GPU_ACCELERATION, SIGNATURE_AGGREGATION, STATE_SHARDING, SUCCESS_RATE_HARD_FLOOR,
};
use parking_lot::Mutex;
use shared_bus::PipelineEvent;
use std::collections::HashSet;
use tracing::{debug, info, warn};

struct ControllerState {
    targets: Vec<ThroughputTarget>,
    strategies: Vec<ScalingStrategy>,
    benchmarks: Vec<BenchmarkRun>,
    started: bool,
    tick: u64,
}

impl ControllerState {
    fn strategy_completed(&self, id: &str) -> bool {
        self.strategies
            .iter()
            .any(|s| s.id == id && s.status == StrategyStatus::Completed)
    }

    fn active_index(&self) -> Option<usize> {
        self.targets
            .iter()
            .position(|t| t.status == TargetStatus::InProgress)
    }
}

/// Staged throughput target state machine.
pub struct ThroughputTargetController {
    config: TargetControllerConfig,
    state: Mutex<ControllerState>,
}

impl ThroughputTargetController {
    /// Controller over the default target and strategy catalogs.
    pub fn new(config: TargetControllerConfig) -> Self {
        Self::with_catalog(config, default_targets(), default_strategies())
    }

    pub fn with_catalog(
        config: TargetControllerConfig,
        targets: Vec<ThroughputTarget>,
        strategies: Vec<ScalingStrategy>,
    ) -> Self {
        Self {
            config,
            state: Mutex::new(ControllerState {
                targets,
                strategies,
                benchmarks: Vec::new(),
                started: false,
                tick: 0,
            }),
        }
    }

    /// Activate the first target. Idempotent.
    pub fn start(&self) -> Vec<PipelineEvent> {
        let mut state = self.state.lock();
        if state.started {
            return Vec::new();
        }
        state.started = true;

        match state.targets.first_mut() {
            Some(first) => {
                first.status = TargetStatus::InProgress;
                info!(target_id = %first.id, target_tps = first.target_tps, "Throughput target started");
                vec![PipelineEvent::TargetStarted {
                    target_id: first.id.clone(),
                    target_tps: first.target_tps,
                }]
            }
            None => Vec::new(),
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.state.lock().started
    }

    /// Advance the active target by one monitoring tick.
    pub fn tick(&self, sample: &ThroughputSample) -> Vec<PipelineEvent> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.tick += 1;
        let tick = state.tick;
        let mut events = Vec::new();

        let Some(index) = state.active_index() else {
            return events;
        };

        let resources = effective_resources(state, index, &sample.resources);
        let shortfalls = state.targets[index]
            .requirements
            .shortfalls(&resources, self.config.enable_quantum_awareness);

        let target = &mut state.targets[index];
        if !shortfalls.is_empty() {
            debug!(target_id = %target.id, missing = ?shortfalls, "Target stalled on resources");
            target.issues = vec![TargetIssue {
                kind: IssueKind::InsufficientResources,
                message: format!("missing {}", shortfalls.join(", ")),
                recommendation: "add worker nodes or implement the recommended scaling strategies"
                    .to_string(),
            }];
            return events;
        }

        let metrics = TargetMetrics::from_sample(sample);
        target.issues = TargetIssue::evaluate(&metrics);
        target.metrics = metrics.clone();

        if metrics.success_rate < SUCCESS_RATE_HARD_FLOOR {
            target.unhealthy_ticks += 1;
        } else {
            target.unhealthy_ticks = 0;
        }

        if target.unhealthy_ticks > 0 && target.unhealthy_ticks >= self.config.max_unhealthy_ticks {
            let reason = format!(
                "success rate below {SUCCESS_RATE_HARD_FLOOR}% for {} consecutive ticks",
                target.unhealthy_ticks
            );
            warn!(target_id = %target.id, reason = %reason, "Throughput target failed");
            target.status = TargetStatus::Failed;
            target.failure_reason = Some(reason.clone());
            events.push(PipelineEvent::TargetFailed {
                target_id: target.id.clone(),
                reason,
            });
            return events;
        }

        let step = if target.issues.is_empty() {
            self.config.progress_step
        } else {
            self.config.progress_step / 2.0
        };
        target.progress = (target.progress + step).min(100.0);
        target.current_tps = target.target_tps as f64 * target.progress / 100.0;

        target.history.push(ProgressSnapshot {
            tick,
            progress: target.progress,
            current_tps: target.current_tps,
            metrics,
        });
        let limit = self.config.history_limit.max(1);
        if target.history.len() > limit {
            let excess = target.history.len() - limit;
            target.history.drain(..excess);
        }

        debug!(
            target_id = %target.id,
            progress = target.progress,
            current_tps = target.current_tps,
            issues = target.issues.len(),
            "Target progressed"
        );

        if target.progress < 100.0 {
            return events;
        }

        target.status = TargetStatus::Achieved;
        let run = benchmark(target, self.config.benchmark_tolerance_pct);
        info!(
            target_id = %target.id,
            observed_tps = run.observed_tps,
            stability_pct = run.stability_pct,
            "Throughput target achieved"
        );
        events.push(PipelineEvent::TargetAchieved {
            target_id: target.id.clone(),
            target_tps: target.target_tps,
        });
        events.push(PipelineEvent::BenchmarkCollected {
            target_id: run.target_id.clone(),
            target_tps: run.target_tps,
            observed_tps: run.observed_tps,
            within_tolerance: run.within_tolerance,
            stability_pct: run.stability_pct,
        });
        state.benchmarks.push(run);

        if let Some(next) = state.targets.get_mut(index + 1) {
            next.status = TargetStatus::InProgress;
            info!(target_id = %next.id, target_tps = next.target_tps, "Throughput target started");
            events.push(PipelineEvent::TargetStarted {
                target_id: next.id.clone(),
                target_tps: next.target_tps,
            });
        } else {
            info!("Final throughput target achieved");
        }

        events
    }

    // =========================================================================
    // QUERIES
    // =========================================================================

    #[must_use]
    pub fn targets(&self) -> Vec<ThroughputTarget> {
        self.state.lock().targets.clone()
    }

    #[must_use]
    pub fn target(&self, id: &str) -> Option<ThroughputTarget> {
        self.state.lock().targets.iter().find(|t| t.id == id).cloned()
    }

    #[must_use]
    pub fn active_target(&self) -> Option<ThroughputTarget> {
        let state = self.state.lock();
        state.active_index().map(|i| state.targets[i].clone())
    }

    #[must_use]
    pub fn benchmarks(&self) -> Vec<BenchmarkRun> {
        self.state.lock().benchmarks.clone()
    }

    #[must_use]
    pub fn strategies(&self) -> Vec<ScalingStrategy> {
        self.state.lock().strategies.clone()
    }

    /// Pending strategies whose dependencies are complete, by priority then
    /// estimated improvement.
    #[must_use]
    pub fn recommended_strategies(&self) -> Vec<ScalingStrategy> {
        let state = self.state.lock();
        let mut ready: Vec<ScalingStrategy> = state
            .strategies
            .iter()
            .filter(|s| s.status == StrategyStatus::Pending)
            .filter(|s| s.dependencies.iter().all(|d| state.strategy_completed(d)))
            .cloned()
            .collect();
        ready.sort_by(|a, b| {
            a.priority.cmp(&b.priority).then_with(|| {
                b.estimated_improvement_pct
                    .total_cmp(&a.estimated_improvement_pct)
            })
        });
        ready
    }

    /// Roll out a scaling strategy.
    ///
    /// The strategy is `InProgress` for `strategy_delay`, then `Completed`.
    pub async fn implement_strategy(&self, id: &str) -> PipelineResult<ScalingStrategy> {
        {
            let mut state = self.state.lock();
            let completed: HashSet<String> = state
                .strategies
                .iter()
                .filter(|s| s.status == StrategyStatus::Completed)
                .map(|s| s.id.clone())
                .collect();
            let strategy = state
                .strategies
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or_else(|| PipelineError::UnknownStrategy(id.to_string()))?;

            if strategy.status != StrategyStatus::Pending {
                return Err(PipelineError::StrategyNotPending {
                    id: id.to_string(),
                    status: strategy.status.as_str().to_string(),
                });
            }
            if let Some(missing) = strategy
                .dependencies
                .iter()
                .find(|d| !completed.contains(*d))
            {
                return Err(PipelineError::DependencyNotMet {
                    strategy: id.to_string(),
                    dependency: missing.clone(),
                });
            }
            strategy.status = StrategyStatus::InProgress;
        }

        info!(strategy_id = id, delay = ?self.config.strategy_delay, "Implementing scaling strategy");
        tokio::time::sleep(self.config.strategy_delay).await;

        let mut state = self.state.lock();
        let strategy = state
            .strategies
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| PipelineError::UnknownStrategy(id.to_string()))?;
        strategy.status = StrategyStatus::Completed;
        info!(strategy_id = id, "Scaling strategy completed");
        Ok(strategy.clone())
    }
}

/// Observed resources with completed strategies applied.
fn effective_resources(
    state: &ControllerState,
    target_index: usize,
    base: &ResourceSnapshot,
) -> ResourceSnapshot {
    let mut resources = base.clone();
    if state.strategy_completed(STATE_SHARDING) {
        let shards = state.targets[target_index].configuration.shard.shard_count;
        resources.shards = resources.shards.max(shards);
    }
    if state.strategy_completed(GPU_ACCELERATION) {
        resources.gpu_available = true;
    }
    if state.strategy_completed(ADAPTIVE_BATCHING) {
        resources.batching_enabled = true;
    }
    if state.strategy_completed(SIGNATURE_AGGREGATION) {
        resources.aggregation_enabled = true;
    }
    resources
}

fn benchmark(target: &ThroughputTarget, tolerance_pct: f64) -> BenchmarkRun {
    let samples = target.history.len().max(1) as f64;
    let mean_success = target
        .history
        .iter()
        .map(|s| s.metrics.success_rate)
        .sum::<f64>()
        / samples;
    let latencies: Vec<f64> = target.history.iter().map(|s| s.metrics.latency_ms).collect();
    let mean_latency = latencies.iter().sum::<f64>() / samples;
    let variance = latencies
        .iter()
        .map(|l| (l - mean_latency).powi(2))
        .sum::<f64>()
        / samples;
    let cv = if mean_latency > 0.0 {
        variance.sqrt() / mean_latency
    } else {
        0.0
    };

    let target_tps = target.target_tps as f64;
    let observed_tps = target.current_tps * mean_success / 100.0;
    BenchmarkRun {
        target_id: target.id.clone(),
        target_tps: target.target_tps,
        observed_tps,
        within_tolerance: observed_tps >= target_tps * (1.0 - tolerance_pct / 100.0),
        stability_pct: (100.0 * (1.0 - cv)).clamp(0.0, 100.0),
        avg_latency_ms: mean_latency,
        ticks: target.history.len(),
    }
}
