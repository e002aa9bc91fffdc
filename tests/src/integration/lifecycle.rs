//! # Lifecycle Tests
//!
//! `stop()` must leave nothing behind: no pending transactions, no active
//! batches, no node registrations. A ledger supplied through the outbound
//! port decides which batches commit.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, PipelineEvent};
    use throughput_pipeline::{
        Batch, DagTraversalRequest, DigestSignatureVerifier, InMemoryLedger, InMemoryProbe,
        LedgerEngine, PipelineApi, PipelineConfig, PipelineResult, ProcessingService,
        ServiceDependencies, ServiceState, SystemTimeSource, ValidationVerdict, WorkerNode,
    };
    use uuid::Uuid;

    use crate::integration::fixtures::tx;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Ledger that refuses any batch holding a transaction with an unlucky amount.
    struct SuperstitiousLedger {
        inner: InMemoryLedger,
        refused: Mutex<Vec<Uuid>>,
    }

    #[async_trait]
    impl LedgerEngine for SuperstitiousLedger {
        async fn validate_batch(&self, batch: &Batch) -> PipelineResult<ValidationVerdict> {
            if batch.transactions.iter().any(|tx| tx.amount == 13) {
                self.refused.lock().push(batch.id);
                return Ok(ValidationVerdict::invalid("amount 13 refused"));
            }
            self.inner.validate_batch(batch).await
        }

        async fn update_dag(&self, batch: &Batch) -> PipelineResult<()> {
            self.inner.update_dag(batch).await
        }

        async fn propagate(&self, batch: &Batch) -> PipelineResult<()> {
            self.inner.propagate(batch).await
        }

        async fn traverse(&self, request: &DagTraversalRequest) -> PipelineResult<Vec<Uuid>> {
            self.inner.traverse(request).await
        }
    }

    fn deps(ledger: Arc<dyn LedgerEngine>) -> ServiceDependencies {
        ServiceDependencies {
            ledger,
            verifier: Arc::new(DigestSignatureVerifier::new()),
            probe: Arc::new(InMemoryProbe::default()),
            clock: Arc::new(SystemTimeSource),
            bus: Arc::new(InMemoryEventBus::new()),
        }
    }

    // =============================================================================
    // STOP
    // =============================================================================

    #[tokio::test]
    async fn test_stop_drains_everything() {
        let mut config = PipelineConfig::default();
        config.batcher.max_in_flight_batches = 2;
        let service = ProcessingService::new(config, ServiceDependencies::in_memory());
        let mut lb_events = service.subscribe(EventFilter::topics(vec![EventTopic::LoadBalancing]));
        service.start().await.unwrap();

        service
            .add_worker_node(WorkerNode::new("n1", "n1.local:9000", "eu-west", 32))
            .await
            .unwrap();
        service
            .add_worker_node(WorkerNode::new("n2", "n2.local:9000", "us-east", 32))
            .await
            .unwrap();

        for i in 0..537 {
            service.process_transaction(tx(i)).unwrap();
        }
        service.stop().await.unwrap();

        assert_eq!(service.state(), ServiceState::Stopped);
        let metrics = service.get_metrics();
        assert_eq!(metrics.pending_transactions, 0);
        assert_eq!(metrics.active_batches, 0);
        assert_eq!(metrics.processed_transactions, 537);
        assert_eq!(metrics.total_nodes, 0);
        assert!(service.worker_nodes().is_empty());

        let removed = lb_events
            .drain()
            .into_iter()
            .filter(|e| matches!(e, PipelineEvent::WorkerNodeRemoved { .. }))
            .count();
        assert_eq!(removed, 2);

        // Stopping twice is harmless
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_summary_after_stop_reflects_final_state() {
        let service = ProcessingService::new(PipelineConfig::default(), ServiceDependencies::in_memory());
        service.start().await.unwrap();
        for i in 0..42 {
            service.process_transaction(tx(i)).unwrap();
        }
        service.stop().await.unwrap();

        let summary = service.get_performance_summary();
        assert_eq!(summary.batcher.transactions_committed, 42);
        assert_eq!(summary.batcher.pending_transactions, 0);
        assert!(summary.worker_pool.completed_jobs > 0);
        assert_eq!(summary.worker_pool.active_workers, 0);
        assert_eq!(summary.targets.len(), 4);
    }

    // =============================================================================
    // LEDGER PORT
    // =============================================================================

    #[tokio::test]
    async fn test_ledger_refusal_fails_batch_without_requeue() {
        let ledger = Arc::new(SuperstitiousLedger {
            inner: InMemoryLedger::new(),
            refused: Mutex::new(Vec::new()),
        });
        let mut config = PipelineConfig::default();
        config.batcher.max_batch_size = 10;
        let service = ProcessingService::new(config, deps(ledger.clone()));
        service.start().await.unwrap();

        // amounts 1..=30; amount 13 lands in exactly one of three batches
        for i in 0..30 {
            service.process_transaction(tx(i)).unwrap();
        }
        service.stop().await.unwrap();

        let refused = ledger.refused.lock().clone();
        assert_eq!(refused.len(), 1);
        let failed = service.batch(&refused[0]).expect("archived failed batch");
        assert!(failed.error.is_some());
        assert_eq!(failed.len(), 10);

        let metrics = service.get_metrics();
        assert_eq!(metrics.batches_failed, 1);
        assert_eq!(metrics.failed_transactions, 10);
        assert_eq!(metrics.processed_transactions, 20);
        assert_eq!(metrics.pending_transactions, 0);
    }
}
