//! # Concurrency Tests
//!
//! Many producers feed one service while several batches execute at once.
//! Every accepted transaction must be committed exactly once and the ledger
//! must see batches in formation order.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use rand::Rng;
    use throughput_pipeline::{
        DigestSignatureVerifier, InMemoryLedger, InMemoryProbe, PipelineApi, PipelineConfig,
        ProcessingService, ServiceDependencies, SystemTimeSource, Transaction, MIN_GAS_LIMIT,
    };
    use shared_bus::InMemoryEventBus;
    use uuid::Uuid;

    const PRODUCERS: u64 = 8;
    const PER_PRODUCER: u64 = 250;

    fn service_with_ledger(in_flight: usize) -> (ProcessingService, Arc<InMemoryLedger>) {
        let ledger = Arc::new(InMemoryLedger::new());
        let deps = ServiceDependencies {
            ledger: ledger.clone(),
            verifier: Arc::new(DigestSignatureVerifier::new()),
            probe: Arc::new(InMemoryProbe::default()),
            clock: Arc::new(SystemTimeSource),
            bus: Arc::new(InMemoryEventBus::new()),
        };
        let mut config = PipelineConfig::default();
        config.batcher.max_in_flight_batches = in_flight;
        (ProcessingService::new(config, deps), ledger)
    }

    async fn produce(service: &ProcessingService) -> Vec<Uuid> {
        let mut handles = Vec::new();
        for producer in 0..PRODUCERS {
            let service = service.clone();
            handles.push(tokio::spawn(async move {
                let mut accepted = Vec::with_capacity(PER_PRODUCER as usize);
                for i in 0..PER_PRODUCER {
                    let priority = rand::thread_rng().gen_range(0..=10u8);
                    let tx = Transaction::new(format!("producer-{producer}"), "sink", i + 1, MIN_GAS_LIMIT)
                        .with_priority(priority);
                    let id = service
                        .process_transaction(DigestSignatureVerifier::sign(tx))
                        .unwrap();
                    accepted.push(id);
                    if i % 50 == 0 {
                        tokio::task::yield_now().await;
                    }
                }
                accepted
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_producers_lose_nothing() {
        let (service, ledger) = service_with_ledger(4);
        service.start().await.unwrap();

        let accepted = produce(&service).await;
        service.stop().await.unwrap();

        let total = (PRODUCERS * PER_PRODUCER) as usize;
        assert_eq!(accepted.len(), total);
        assert_eq!(accepted.iter().collect::<HashSet<_>>().len(), total);

        let metrics = service.get_metrics();
        assert_eq!(metrics.processed_transactions, total as u64);
        assert_eq!(metrics.failed_transactions, 0);
        assert_eq!(metrics.pending_transactions, 0);
        assert_eq!(ledger.committed_transaction_count(), total);
        assert!(accepted.iter().all(|id| ledger.contains_transaction(id)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_commits_follow_formation_order() {
        let (service, ledger) = service_with_ledger(4);
        service.start().await.unwrap();

        produce(&service).await;
        service.stop().await.unwrap();

        let sequences: Vec<u64> = ledger
            .committed_batches()
            .iter()
            .map(|id| service.batch(id).expect("archived batch").sequence)
            .collect();
        assert!(!sequences.is_empty());
        assert!(sequences.windows(2).all(|w| w[0] < w[1]));

        let total: usize = ledger
            .committed_batches()
            .iter()
            .filter_map(|id| service.batch(id))
            .map(|batch| batch.len())
            .sum();
        assert_eq!(total, (PRODUCERS * PER_PRODUCER) as usize);
    }
}
