//! # Processing Service
//!
//! Facade composing the worker pool, batcher, load balancer and target
//! controller behind [`PipelineApi`].
//!
//! ```text
//! process_transaction ──→ TransactionBatcher ──jobs──→ WorkerPool
//!                               │                          │
//!                               └──routed via──→ LoadBalancer
//!                                                          │
//!          monitor tick ←── batcher / routing stats ←──────┘
//!               │
//!               └──→ ThroughputTargetController ──→ target events
//! ```
//!
//! ## Lifecycle
//!
//! `Created → Running → Stopped`. A stopped service cannot be restarted.
//!
//! ## Shutdown Sequence
//!
//! 1. Refuse new submissions
//! 2. Stop the wait timer, health checks and monitoring loop
//! 3. Flush the pending queue into final batches
//! 4. Wait for every batch execution
//! 5. Shut the worker pool down
//! 6. Release every node registration

use crate::balancer::{LoadBalancer, RouteRequest};
use crate::batcher::{BatcherContext, TransactionBatcher};
use crate::config::PipelineConfig;
use crate::controller::ThroughputTargetController;
use crate::domain::{
    Batch, BenchmarkRun, DagTraversalRequest, DagTraversalResult, JobKind, PipelineError,
    PipelineResult, QuantumValidationRequest, QuantumValidationResult, ResourceSnapshot,
    ScalingStrategy, ThroughputSample, Transaction, WorkerNode,
};
use crate::adapters::{DigestSignatureVerifier, InMemoryLedger, InMemoryProbe};
use crate::ports::inbound::{BatchSubmission, PerformanceSummary, PipelineApi, PipelineMetrics};
use crate::ports::outbound::{
    LedgerEngine, NodeProbe, SignatureVerifier, SystemTimeSource, TimeSource,
};
use crate::worker_pool::WorkerPool;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use shared_bus::{EventFilter, EventPublisher, EventStream, InMemoryEventBus, PipelineEvent, Subscription};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Pool priority of routed quantum-validation and DAG-traversal jobs.
const QUERY_JOB_PRIORITY: u8 = 8;

/// Service lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceState {
    Created,
    Running,
    Stopped,
}

/// Outbound collaborators of the service.
#[derive(Clone)]
pub struct ServiceDependencies {
    pub ledger: Arc<dyn LedgerEngine>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub probe: Arc<dyn NodeProbe>,
    pub clock: Arc<dyn TimeSource>,
    pub bus: Arc<InMemoryEventBus>,
}

impl ServiceDependencies {
    /// In-memory ledger, digest signatures, scriptable probe, system clock.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            verifier: Arc::new(DigestSignatureVerifier::new()),
            probe: Arc::new(InMemoryProbe::default()),
            clock: Arc::new(SystemTimeSource),
            bus: Arc::new(InMemoryEventBus::new()),
        }
    }
}

/// Monitoring state sampled once per tick.
#[derive(Default)]
struct MonitorState {
    /// (tick time, committed transaction total) within the TPS window.
    window: VecDeque<(Instant, u64)>,
    current_tps: f64,
    peak_tps: f64,
    last_batch_txs: (u64, u64),
    last_requests: (u64, u64),
}

struct ServiceInner {
    config: PipelineConfig,
    state: RwLock<ServiceState>,
    bus: Arc<InMemoryEventBus>,
    pool: Arc<WorkerPool>,
    batcher: TransactionBatcher,
    balancer: Arc<LoadBalancer>,
    controller: ThroughputTargetController,
    ledger: Arc<dyn LedgerEngine>,
    verifier: Arc<dyn SignatureVerifier>,
    shutdown: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    monitor: Mutex<MonitorState>,
    started_at: Mutex<Option<Instant>>,
    rejected: AtomicU64,
}

/// The throughput pipeline service.
#[derive(Clone)]
pub struct ProcessingService {
    inner: Arc<ServiceInner>,
}

impl ProcessingService {
    /// Wire every component.
    ///
    /// Must be called from within a Tokio runtime: the worker pool starts
    /// its dispatcher immediately.
    pub fn new(config: PipelineConfig, deps: ServiceDependencies) -> Self {
        let events: Arc<dyn EventPublisher> = deps.bus.clone();
        let pool = Arc::new(WorkerPool::new(config.worker_pool.clone()));
        let balancer = Arc::new(LoadBalancer::new(
            config.load_balancer.clone(),
            Arc::clone(&deps.probe),
            Arc::clone(&events),
        ));
        let batcher = TransactionBatcher::new(
            config.batcher.clone(),
            BatcherContext {
                pool: Arc::clone(&pool),
                verifier: Arc::clone(&deps.verifier),
                ledger: Arc::clone(&deps.ledger),
                balancer: Some(Arc::clone(&balancer)),
                events,
                clock: Arc::clone(&deps.clock),
            },
        );
        let controller = ThroughputTargetController::new(config.targets.clone());
        let (shutdown, _) = watch::channel(false);

        info!(
            max_workers = config.worker_pool.max_workers,
            max_batch_size = config.batcher.max_batch_size,
            strategy = config.load_balancer.strategy.as_str(),
            "Processing service created"
        );

        Self {
            inner: Arc::new(ServiceInner {
                config,
                state: RwLock::new(ServiceState::Created),
                bus: deps.bus,
                pool,
                batcher,
                balancer,
                controller,
                ledger: deps.ledger,
                verifier: deps.verifier,
                shutdown,
                tasks: Mutex::new(Vec::new()),
                monitor: Mutex::new(MonitorState::default()),
                started_at: Mutex::new(None),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> ServiceState {
        *self.inner.state.read()
    }

    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Subscribe to pipeline events.
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        self.inner.bus.subscribe(filter)
    }

    /// Pipeline events as a `Stream`.
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        self.inner.bus.event_stream(filter)
    }

    #[must_use]
    pub fn events(&self) -> Arc<InMemoryEventBus> {
        Arc::clone(&self.inner.bus)
    }

    #[must_use]
    pub fn pending_transactions(&self) -> usize {
        self.inner.batcher.pending_count()
    }

    /// Active or archived batch by id.
    #[must_use]
    pub fn batch(&self, id: &Uuid) -> Option<Batch> {
        self.inner.batcher.batch(id)
    }

    #[must_use]
    pub fn worker_nodes(&self) -> Vec<WorkerNode> {
        self.inner.balancer.nodes()
    }

    fn ensure_running(&self) -> PipelineResult<()> {
        match *self.inner.state.read() {
            ServiceState::Running => Ok(()),
            _ => Err(PipelineError::ServiceNotRunning),
        }
    }

    fn spawn_periodic<F, Fut>(&self, name: &'static str, period: Duration, mut on_tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut shutdown = self.inner.shutdown.subscribe();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => on_tick().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Background task stopped");
        });
        self.inner.tasks.lock().push(handle);
    }

    /// Sample the pipeline, advance the target controller and publish
    /// `MetricsUpdated`. Runs every monitoring interval while started.
    pub async fn monitor_tick(&self) -> PipelineMetrics {
        let sample = self.sample();
        for event in self.inner.controller.tick(&sample) {
            self.inner.bus.publish(event).await;
        }

        let metrics = self.get_metrics();
        self.inner
            .bus
            .publish(PipelineEvent::MetricsUpdated {
                current_tps: metrics.current_tps,
                avg_latency_ms: metrics.avg_latency_ms,
                pending_transactions: metrics.pending_transactions,
                processed_transactions: metrics.processed_transactions,
                active_nodes: metrics.active_nodes,
            })
            .await;
        metrics
    }

    /// Update the TPS window and build the controller sample from the
    /// deltas since the previous tick.
    fn sample(&self) -> ThroughputSample {
        let batcher = self.inner.batcher.stats();
        let routing = self.inner.balancer.stats();
        let now = Instant::now();
        let window = self.inner.config.monitoring.tps_window;

        let mut guard = self.inner.monitor.lock();
        let monitor = &mut *guard;
        monitor.window.push_back((now, batcher.transactions_committed));
        while monitor.window.len() > 2
            && monitor
                .window
                .get(1)
                .is_some_and(|(t, _)| now.duration_since(*t) >= window)
        {
            monitor.window.pop_front();
        }
        let current_tps = match (monitor.window.front(), monitor.window.back()) {
            (Some((t0, c0)), Some((t1, c1))) if t1 > t0 => {
                c1.saturating_sub(*c0) as f64 / t1.duration_since(*t0).as_secs_f64()
            }
            _ => 0.0,
        };
        monitor.current_tps = current_tps;
        monitor.peak_tps = monitor.peak_tps.max(monitor.current_tps);

        let (prev_ok, prev_failed) = monitor.last_batch_txs;
        let ok = batcher.transactions_committed.saturating_sub(prev_ok);
        let failed = batcher.transactions_failed.saturating_sub(prev_failed);
        monitor.last_batch_txs = (batcher.transactions_committed, batcher.transactions_failed);
        let success_rate = if ok + failed > 0 {
            100.0 * ok as f64 / (ok + failed) as f64
        } else {
            100.0
        };

        let (prev_completed, prev_req_failed) = monitor.last_requests;
        let completed = routing.completed.saturating_sub(prev_completed);
        let req_failed = routing.failed.saturating_sub(prev_req_failed);
        monitor.last_requests = (routing.completed, routing.failed);
        let error_rate = if completed + req_failed > 0 {
            100.0 * req_failed as f64 / (completed + req_failed) as f64
        } else {
            0.0
        };

        ThroughputSample {
            latency_ms: self.average_latency(),
            success_rate,
            error_rate,
            resources: ResourceSnapshot {
                active_nodes: routing.active_nodes,
                quantum_nodes: self.inner.balancer.quantum_node_count(),
                shards: 1,
                gpu_available: false,
                batching_enabled: self.inner.config.batcher.max_batch_size > 1,
                // Set once an aggregate has verified and committed.
                aggregation_enabled: batcher.batches_committed > 0,
            },
        }
    }

    fn average_latency(&self) -> f64 {
        let routing = self.inner.balancer.stats();
        if routing.completed + routing.failed > 0 {
            routing.avg_latency_ms
        } else {
            self.inner.batcher.stats().avg_batch_duration_ms
        }
    }
}

#[async_trait]
impl PipelineApi for ProcessingService {
    async fn start(&self) -> PipelineResult<()> {
        self.inner.config.validate()?;
        {
            let mut state = self.inner.state.write();
            match *state {
                ServiceState::Running => return Ok(()),
                ServiceState::Stopped => return Err(PipelineError::ServiceStopped),
                ServiceState::Created => *state = ServiceState::Running,
            }
        }
        *self.inner.started_at.lock() = Some(Instant::now());

        for event in self.inner.controller.start() {
            self.inner.bus.publish(event).await;
        }

        let timer = self.inner.batcher.spawn_wait_timer(self.inner.shutdown.subscribe());
        self.inner.tasks.lock().push(timer);

        let balancer = Arc::clone(&self.inner.balancer);
        self.spawn_periodic(
            "health-checks",
            self.inner.config.load_balancer.health_check_interval,
            move || {
                let balancer = Arc::clone(&balancer);
                async move { balancer.run_health_checks().await }
            },
        );

        let service = self.clone();
        self.spawn_periodic(
            "monitoring",
            self.inner.config.monitoring.interval,
            move || {
                let service = service.clone();
                async move {
                    service.monitor_tick().await;
                }
            },
        );

        info!("Processing service started");
        Ok(())
    }

    async fn stop(&self) -> PipelineResult<()> {
        {
            let mut state = self.inner.state.write();
            match *state {
                ServiceState::Running => *state = ServiceState::Stopped,
                ServiceState::Stopped => return Ok(()),
                ServiceState::Created => return Err(PipelineError::ServiceNotRunning),
            }
        }
        info!(
            pending = self.inner.batcher.pending_count(),
            "Stopping processing service"
        );

        // Background tasks hold clones of the service; join them first.
        let _ = self.inner.shutdown.send(true);
        let tasks = std::mem::take(&mut *self.inner.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.inner.batcher.flush().await;
        self.inner.batcher.wait_idle().await;
        self.inner.pool.shutdown().await;
        let released = self.inner.balancer.release_all().await;

        let metrics = self.monitor_tick().await;
        info!(
            processed = metrics.processed_transactions,
            failed = metrics.failed_transactions,
            batches = metrics.batches_committed,
            released_nodes = released,
            "Processing service stopped"
        );
        Ok(())
    }

    fn process_transaction(&self, tx: Transaction) -> PipelineResult<Uuid> {
        // Held for the whole submission so stop() cannot flush in between.
        let state = self.inner.state.read();
        if *state != ServiceState::Running {
            return Err(PipelineError::ServiceNotRunning);
        }
        self.inner.batcher.add_transaction(tx).inspect_err(|e| {
            if e.is_invalid_transaction() {
                self.inner.rejected.fetch_add(1, Ordering::Relaxed);
            }
        })
    }

    fn process_batch(&self, txs: Vec<Transaction>) -> PipelineResult<BatchSubmission> {
        let state = self.inner.state.read();
        if *state != ServiceState::Running {
            return Err(PipelineError::ServiceNotRunning);
        }

        let mut submission = BatchSubmission::default();
        for (index, tx) in txs.into_iter().enumerate() {
            match self.inner.batcher.add_transaction(tx) {
                Ok(id) => submission.accepted.push(id),
                Err(e) => {
                    self.inner.rejected.fetch_add(1, Ordering::Relaxed);
                    submission.rejected.push((index, e.to_string()));
                }
            }
        }
        debug!(
            accepted = submission.accepted.len(),
            rejected = submission.rejected.len(),
            "Transaction batch submitted"
        );
        Ok(submission)
    }

    async fn process_quantum_validation(
        &self,
        request: QuantumValidationRequest,
    ) -> PipelineResult<QuantumValidationResult> {
        self.ensure_running()?;
        let route = RouteRequest::any()
            .in_region(request.region.clone())
            .quantum();
        let request = Arc::new(request);
        let pool = &self.inner.pool;
        let verifier = &self.inner.verifier;

        self.inner
            .balancer
            .dispatch(&route, |node| {
                let request = Arc::clone(&request);
                let request_id = request.id;
                let verifier = Arc::clone(verifier);
                let job = pool.submit(JobKind::QuantumValidation, QUERY_JOB_PRIORITY, async move {
                    Ok(verifier.verify_quantum(&request))
                });
                async move {
                    let valid = job?.join().await?;
                    debug!(node_id = %node.id, %request_id, valid, "Quantum validation done");
                    Ok(QuantumValidationResult {
                        request_id,
                        node_id: node.id,
                        valid,
                    })
                }
            })
            .await
    }

    async fn process_dag_traversal(
        &self,
        request: DagTraversalRequest,
    ) -> PipelineResult<DagTraversalResult> {
        self.ensure_running()?;
        let route = RouteRequest::any().in_region(request.region.clone());
        let request = Arc::new(request);
        let pool = &self.inner.pool;
        let ledger = &self.inner.ledger;

        self.inner
            .balancer
            .dispatch(&route, |node| {
                let request = Arc::clone(&request);
                let ledger = Arc::clone(ledger);
                let job = pool.submit(JobKind::DagTraversal, QUERY_JOB_PRIORITY, async move {
                    ledger.traverse(&request).await
                });
                async move {
                    let visited = job?.join().await?;
                    debug!(node_id = %node.id, visited = visited.len(), "DAG traversal done");
                    Ok(DagTraversalResult {
                        node_id: node.id,
                        visited,
                    })
                }
            })
            .await
    }

    async fn add_worker_node(&self, node: WorkerNode) -> PipelineResult<()> {
        self.ensure_running()?;
        self.inner.balancer.add_node(node).await
    }

    async fn remove_worker_node(&self, node_id: &str) -> PipelineResult<()> {
        self.ensure_running()?;
        self.inner.balancer.remove_node(node_id).await
    }

    async fn implement_strategy(&self, strategy_id: &str) -> PipelineResult<ScalingStrategy> {
        self.ensure_running()?;
        let strategy = self.inner.controller.implement_strategy(strategy_id).await?;
        self.inner
            .bus
            .publish(PipelineEvent::StrategyCompleted {
                strategy_id: strategy.id.clone(),
            })
            .await;
        Ok(strategy)
    }

    fn get_metrics(&self) -> PipelineMetrics {
        let batcher = self.inner.batcher.stats();
        let routing = self.inner.balancer.stats();
        let (current_tps, peak_tps) = {
            let monitor = self.inner.monitor.lock();
            (monitor.current_tps, monitor.peak_tps)
        };
        let uptime_ms = self
            .inner
            .started_at
            .lock()
            .map_or(0, |t| u64::try_from(t.elapsed().as_millis()).unwrap_or(u64::MAX));

        PipelineMetrics {
            current_tps,
            peak_tps,
            avg_latency_ms: self.average_latency(),
            avg_batch_duration_ms: batcher.avg_batch_duration_ms,
            pending_transactions: batcher.pending_transactions,
            processed_transactions: batcher.transactions_committed,
            failed_transactions: batcher.transactions_failed,
            rejected_transactions: self.inner.rejected.load(Ordering::Relaxed),
            batches_committed: batcher.batches_committed,
            batches_failed: batcher.batches_failed,
            active_batches: batcher.active_batches,
            active_nodes: routing.active_nodes,
            total_nodes: routing.total_nodes,
            uptime_ms,
        }
    }

    fn get_benchmarks(&self) -> Vec<BenchmarkRun> {
        self.inner.controller.benchmarks()
    }

    fn get_performance_summary(&self) -> PerformanceSummary {
        PerformanceSummary {
            metrics: self.get_metrics(),
            worker_pool: self.inner.pool.stats(),
            batcher: self.inner.batcher.stats(),
            routing: self.inner.balancer.stats(),
            nodes: self.inner.balancer.nodes(),
            targets: self.inner.controller.targets(),
            active_target: self.inner.controller.active_target().map(|t| t.id),
            recommended_strategies: self.inner.controller.recommended_strategies(),
            benchmarks: self.inner.controller.benchmarks(),
            events: self.inner.bus.stats(),
        }
    }
}
