//! # Pipeline Scenarios
//!
//! End-to-end behaviour of batch formation and target sequencing:
//!
//! 1. **Size trigger**: 120 queued transactions form one batch of 100, 20 stay pending
//! 2. **Validation**: a transaction below the gas floor never reaches the queue
//! 3. **Priority trigger**: an urgent transaction forms a batch at the minimum size
//! 4. **Wait timer**: a small queue is batched once the timer fires
//! 5. **Targets**: 1k is achieved before 10k starts; a failed target halts the sequence

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use shared_bus::{EventFilter, EventTopic, PipelineEvent};
    use throughput_pipeline::{
        DigestSignatureVerifier, IssueKind, PipelineApi, PipelineConfig, PipelineError,
        ProcessingService, ResourceSnapshot, ServiceDependencies, TargetControllerConfig,
        TargetStatus, ThroughputSample, ThroughputTargetController, Transaction,
    };

    use crate::integration::fixtures::{priority_tx, tx, wait_for};

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Service whose wait timer never fires during a test.
    fn service_without_timer() -> ProcessingService {
        let mut config = PipelineConfig::default();
        config.batcher.max_wait = Duration::from_secs(600);
        ProcessingService::new(config, ServiceDependencies::in_memory())
    }

    fn healthy_sample(resources: ResourceSnapshot) -> ThroughputSample {
        ThroughputSample {
            latency_ms: 12.0,
            success_rate: 99.5,
            error_rate: 0.1,
            resources,
        }
    }

    fn baseline_resources() -> ResourceSnapshot {
        ResourceSnapshot {
            active_nodes: 1,
            shards: 1,
            batching_enabled: true,
            ..ResourceSnapshot::default()
        }
    }

    // =============================================================================
    // BATCH FORMATION
    // =============================================================================

    #[tokio::test]
    async fn test_120_transactions_form_one_full_batch() {
        let service = service_without_timer();
        let mut batching = service.subscribe(EventFilter::topics(vec![EventTopic::Batching]));
        service.start().await.unwrap();

        for i in 0..120 {
            service.process_transaction(tx(i)).unwrap();
        }

        let created = wait_for(&mut batching, |e| {
            matches!(e, PipelineEvent::BatchCreated { .. })
        })
        .await
        .expect("batch created");
        match created {
            PipelineEvent::BatchCreated {
                tx_count, trigger, ..
            } => {
                assert_eq!(tx_count, 100);
                assert_eq!(trigger, "size");
            }
            other => panic!("unexpected event {other:?}"),
        }

        let complete = wait_for(&mut batching, |e| {
            matches!(e, PipelineEvent::BatchComplete { .. })
        })
        .await
        .expect("batch complete");
        match complete {
            PipelineEvent::BatchComplete {
                tx_count, algorithm, ..
            } => {
                assert_eq!(tx_count, 100);
                assert_eq!(algorithm, "bls-aggregation");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(service.pending_transactions(), 20);

        service.stop().await.unwrap();
        let metrics = service.get_metrics();
        assert_eq!(metrics.processed_transactions, 120);
        assert_eq!(metrics.batches_committed, 2);
        assert_eq!(metrics.pending_transactions, 0);
    }

    #[tokio::test]
    async fn test_gas_below_minimum_is_rejected() {
        let service = service_without_timer();
        service.start().await.unwrap();

        let cheap = DigestSignatureVerifier::sign(Transaction::new("alice", "bob", 5, 20_000));
        let result = service.process_transaction(cheap);

        assert!(matches!(result, Err(PipelineError::InvalidTransaction { .. })));
        assert_eq!(service.pending_transactions(), 0);
        assert_eq!(service.get_metrics().rejected_transactions, 1);
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_priority_transaction_forms_batch_at_minimum_size() {
        let service = service_without_timer();
        let mut batching = service.subscribe(EventFilter::topics(vec![EventTopic::Batching]));
        service.start().await.unwrap();

        for i in 0..9 {
            service.process_transaction(tx(i)).unwrap();
        }
        assert_eq!(service.pending_transactions(), 9);
        service.process_transaction(priority_tx(9, 9)).unwrap();

        let created = wait_for(&mut batching, |e| {
            matches!(e, PipelineEvent::BatchCreated { .. })
        })
        .await
        .expect("batch created");
        assert!(matches!(
            created,
            PipelineEvent::BatchCreated { tx_count: 10, ref trigger, .. } if trigger == "priority"
        ));
        service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_timer_batches_small_queue() {
        let mut config = PipelineConfig::default();
        config.batcher.max_wait = Duration::from_millis(50);
        let service = ProcessingService::new(config, ServiceDependencies::in_memory());
        let mut batching = service.subscribe(EventFilter::topics(vec![EventTopic::Batching]));
        service.start().await.unwrap();

        for i in 0..15 {
            service.process_transaction(tx(i)).unwrap();
        }

        let created = wait_for(&mut batching, |e| {
            matches!(e, PipelineEvent::BatchCreated { .. })
        })
        .await
        .expect("timer batch");
        assert!(matches!(
            created,
            PipelineEvent::BatchCreated { tx_count: 15, ref trigger, .. } if trigger == "timer"
        ));
        service.stop().await.unwrap();
    }

    // =============================================================================
    // TARGET SEQUENCING
    // =============================================================================

    #[test]
    fn test_targets_advance_in_order() {
        let controller = ThroughputTargetController::new(TargetControllerConfig::default());
        let started = controller.start();
        assert!(matches!(
            started.as_slice(),
            [PipelineEvent::TargetStarted { target_id, .. }] if target_id == "tps-1k"
        ));

        // 5 points per healthy tick
        let mut events = Vec::new();
        for _ in 0..20 {
            events.extend(controller.tick(&healthy_sample(baseline_resources())));
        }
        let names: Vec<&str> = events.iter().map(PipelineEvent::name).collect();
        assert_eq!(
            names,
            vec!["target_achieved", "benchmark_collected", "target_started"]
        );
        assert_eq!(
            controller.target("tps-1k").map(|t| t.status),
            Some(TargetStatus::Achieved)
        );
        assert_eq!(
            controller.active_target().map(|t| t.id),
            Some("tps-10k".to_string())
        );
        assert_eq!(controller.benchmarks().len(), 1);

        // 10k needs three nodes and aggregation; nothing moves without them
        assert!(controller.tick(&healthy_sample(baseline_resources())).is_empty());
        let active = controller.active_target().expect("10k active");
        assert_eq!(active.progress, 0.0);
        assert_eq!(active.issues.len(), 1);
        assert_eq!(active.issues[0].kind, IssueKind::InsufficientResources);
    }

    #[test]
    fn test_failed_target_halts_sequence() {
        let config = TargetControllerConfig::default();
        let max_unhealthy = config.max_unhealthy_ticks;
        let controller = ThroughputTargetController::new(config);
        controller.start();

        let sick = ThroughputSample {
            success_rate: 80.0,
            ..healthy_sample(baseline_resources())
        };
        let mut events = Vec::new();
        for _ in 0..max_unhealthy {
            events.extend(controller.tick(&sick));
        }
        assert!(matches!(
            events.last(),
            Some(PipelineEvent::TargetFailed { target_id, .. }) if target_id == "tps-1k"
        ));

        assert!(controller.active_target().is_none());
        assert!(controller.tick(&healthy_sample(baseline_resources())).is_empty());
        assert_eq!(
            controller.target("tps-10k").map(|t| t.status),
            Some(TargetStatus::NotStarted)
        );
    }
}
