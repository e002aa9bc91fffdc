//! Runtime wiring: configuration, service, metrics bridge and load.

use anyhow::{Context, Result};
use pipeline_telemetry::MetricsBridge;
use shared_bus::EventFilter;
use throughput_pipeline::{
    PipelineApi, PipelineConfig, PipelineMetrics, ProcessingService, ServiceDependencies,
    WorkerNode,
};
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::load::LoadGenerator;
use crate::node_spec::parse_worker_nodes;

/// Everything the binary reads from the environment.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub pipeline: PipelineConfig,
    /// Nodes registered right after start.
    pub worker_nodes: Vec<WorkerNode>,
    /// Synthetic transactions per second, disabled when `None`.
    pub demo_tps: Option<u64>,
}

impl RuntimeConfig {
    /// Load from `PIPELINE_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let pipeline =
            PipelineConfig::from_lookup(&lookup).context("Invalid pipeline configuration")?;

        let worker_nodes = match lookup("PIPELINE_WORKER_NODES") {
            Some(spec) => parse_worker_nodes(&spec).context("Invalid PIPELINE_WORKER_NODES")?,
            None => Vec::new(),
        };

        let demo_tps = lookup("PIPELINE_DEMO_TPS")
            .map(|v| v.trim().parse::<u64>())
            .transpose()
            .context("PIPELINE_DEMO_TPS must be a whole number")?
            .filter(|tps| *tps > 0);

        Ok(Self {
            pipeline,
            worker_nodes,
            demo_tps,
        })
    }
}

/// The running pipeline with its background helpers.
pub struct PipelineRuntime {
    service: ProcessingService,
    worker_nodes: Vec<WorkerNode>,
    demo_tps: Option<u64>,
    bridge: Option<MetricsBridge>,
    bridge_shutdown: watch::Sender<bool>,
    load: Option<LoadGenerator>,
    load_shutdown: watch::Sender<bool>,
}

impl PipelineRuntime {
    /// Wire the service with in-memory collaborators.
    pub fn new(config: RuntimeConfig) -> Self {
        info!("Creating throughput pipeline runtime");
        let service = ProcessingService::new(config.pipeline, ServiceDependencies::in_memory());
        let (bridge_shutdown, _) = watch::channel(false);
        let (load_shutdown, _) = watch::channel(false);

        Self {
            service,
            worker_nodes: config.worker_nodes,
            demo_tps: config.demo_tps,
            bridge: None,
            bridge_shutdown,
            load: None,
            load_shutdown,
        }
    }

    #[must_use]
    pub fn service(&self) -> &ProcessingService {
        &self.service
    }

    /// Start the service and its helpers.
    ///
    /// ## Startup Sequence
    ///
    /// 1. Attach the metrics bridge (before start, so the first target is seen)
    /// 2. Start the service
    /// 3. Register configured worker nodes
    /// 4. Start synthetic load if configured
    pub async fn start(&mut self) -> Result<()> {
        info!("===========================================");
        info!("  Throughput Pipeline Runtime v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        self.bridge = Some(MetricsBridge::spawn(
            self.service.subscribe(EventFilter::all()),
            self.bridge_shutdown.subscribe(),
        ));

        self.service.start().await.context("Failed to start service")?;

        for node in self.worker_nodes.clone() {
            let id = node.id.clone();
            if let Err(e) = self.service.add_worker_node(node).await {
                warn!(node_id = %id, error = %e, "Skipping worker node");
            }
        }

        let config = self.service.config();
        info!(
            max_workers = config.worker_pool.max_workers,
            max_batch_size = config.batcher.max_batch_size,
            strategy = ?config.load_balancer.strategy,
            nodes = self.service.worker_nodes().len(),
            "Pipeline running"
        );

        if let Some(tps) = self.demo_tps {
            self.load = Some(LoadGenerator::spawn(
                self.service.clone(),
                tps,
                self.load_shutdown.subscribe(),
            ));
        }

        Ok(())
    }

    /// Shutdown the pipeline gracefully.
    ///
    /// ## Shutdown Sequence
    ///
    /// 1. Stop synthetic load
    /// 2. Stop the service (flushes the queue, releases nodes)
    /// 3. Stop the metrics bridge once the final events are out
    pub async fn shutdown(mut self) -> Result<PipelineMetrics> {
        info!("Initiating graceful shutdown...");

        if let Some(load) = self.load.take() {
            let _ = self.load_shutdown.send(true);
            let submitted = load.join().await;
            info!(submitted, "Synthetic load stopped");
        }

        if let Err(e) = self.service.stop().await {
            error!(error = %e, "Service stop failed");
            return Err(e).context("Failed to stop service");
        }

        if let Some(bridge) = self.bridge.take() {
            let _ = self.bridge_shutdown.send(true);
            let observed = bridge.join().await;
            info!(observed, "Metrics bridge stopped");
        }

        let metrics = self.service.get_metrics();
        info!(
            processed = metrics.processed_transactions,
            failed = metrics.failed_transactions,
            rejected = metrics.rejected_transactions,
            peak_tps = metrics.peak_tps,
            "Shutdown complete"
        );
        Ok(metrics)
    }
}
