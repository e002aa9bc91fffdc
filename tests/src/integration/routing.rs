//! # Routing Tests
//!
//! The balancer must never hand a new request to a draining or unhealthy
//! node, whatever the strategy, and must fall over to healthy nodes when an
//! attempt fails.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use shared_bus::{EventFilter, EventTopic, InMemoryEventBus, PipelineEvent};
    use throughput_pipeline::{
        InMemoryProbe, LoadBalancer, LoadBalancerConfig, LoadBalancingStrategy, NodeStatus,
        PipelineError, RouteRequest, WorkerNode,
    };

    const STRATEGIES: [LoadBalancingStrategy; 4] = [
        LoadBalancingStrategy::RoundRobin,
        LoadBalancingStrategy::LeastConnections,
        LoadBalancingStrategy::Weighted,
        LoadBalancingStrategy::RegionAware,
    ];

    struct Cluster {
        balancer: LoadBalancer,
        probe: Arc<InMemoryProbe>,
        bus: Arc<InMemoryEventBus>,
    }

    async fn cluster(strategy: LoadBalancingStrategy, quantum_awareness: bool) -> Cluster {
        let probe = Arc::new(InMemoryProbe::new(Duration::from_millis(2)));
        let bus = Arc::new(InMemoryEventBus::new());
        let config = LoadBalancerConfig {
            strategy,
            enable_quantum_awareness: quantum_awareness,
            ..LoadBalancerConfig::default()
        };
        let balancer = LoadBalancer::new(config, probe.clone(), bus.clone());
        balancer
            .add_node(WorkerNode::new("n1", "n1.local:9000", "eu-west", 16))
            .await
            .unwrap();
        balancer
            .add_node(WorkerNode::new("n2", "n2.local:9000", "eu-west", 16))
            .await
            .unwrap();
        balancer
            .add_node(WorkerNode::new("n3", "n3.local:9000", "us-east", 16).with_quantum_ready(true))
            .await
            .unwrap();
        Cluster {
            balancer,
            probe,
            bus,
        }
    }

    /// Route and immediately complete `count` requests, returning the node ids.
    async fn route_many(balancer: &LoadBalancer, request: &RouteRequest, count: usize) -> Vec<String> {
        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let ticket = balancer.route(request).unwrap();
            ids.push(ticket.node_id().to_string());
            balancer.complete(ticket, Ok(())).await;
        }
        ids
    }

    #[tokio::test]
    async fn test_never_routes_to_draining_node() {
        for strategy in STRATEGIES {
            let c = cluster(strategy, false).await;
            let request = RouteRequest::any().in_region(Some("eu-west".to_string()));

            // Pin one request on n1 so removal has to drain.
            let mut pinned = None;
            for _ in 0..3 {
                let ticket = c.balancer.route(&request).unwrap();
                if ticket.node_id() == "n1" {
                    pinned = Some(ticket);
                    break;
                }
                c.balancer.complete(ticket, Ok(())).await;
            }
            let pinned = pinned.unwrap_or_else(|| panic!("{strategy:?} never chose n1"));

            c.balancer.remove_node("n1").await.unwrap();
            assert_eq!(
                c.balancer.node("n1").map(|n| n.status),
                Some(NodeStatus::Draining)
            );

            let routed = route_many(&c.balancer, &request, 20).await;
            assert!(routed.iter().all(|id| id != "n1"), "{strategy:?} routed to draining n1");

            let mut lb_events = c.bus.subscribe(EventFilter::topics(vec![EventTopic::LoadBalancing]));
            c.balancer.complete(pinned, Ok(())).await;
            assert!(c.balancer.node("n1").is_none());
            let removed = lb_events
                .drain()
                .into_iter()
                .any(|e| matches!(e, PipelineEvent::WorkerNodeRemoved { ref node_id } if node_id == "n1"));
            assert!(removed);
        }
    }

    #[tokio::test]
    async fn test_never_routes_to_unhealthy_node() {
        for strategy in STRATEGIES {
            let c = cluster(strategy, false).await;
            let request = RouteRequest::any();
            let threshold = c.balancer.config().unhealthy_threshold;

            c.probe.set_healthy("n2", false);
            for _ in 0..threshold {
                c.balancer.run_health_checks().await;
            }
            assert_eq!(
                c.balancer.node("n2").map(|n| n.status),
                Some(NodeStatus::Unhealthy)
            );

            let routed = route_many(&c.balancer, &request, 30).await;
            assert!(routed.iter().all(|id| id != "n2"), "{strategy:?} routed to unhealthy n2");

            c.probe.set_healthy("n2", true);
            c.balancer.run_health_checks().await;
            assert_eq!(
                c.balancer.node("n2").map(|n| n.status),
                Some(NodeStatus::Active)
            );
        }
    }

    #[tokio::test]
    async fn test_dispatch_fails_over_to_next_node() {
        let c = cluster(LoadBalancingStrategy::RoundRobin, false).await;

        let result = c
            .balancer
            .dispatch(&RouteRequest::any(), |node| async move {
                if node.id == "n1" {
                    Err(PipelineError::Ledger("n1 refused".to_string()))
                } else {
                    Ok(node.id)
                }
            })
            .await
            .unwrap();
        assert_ne!(result, "n1");

        let stats = c.balancer.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert!(c.balancer.nodes().iter().all(|n| n.current_load == 0));
    }

    #[tokio::test]
    async fn test_quantum_requests_only_reach_quantum_nodes() {
        let c = cluster(LoadBalancingStrategy::LeastConnections, true).await;

        let routed = route_many(&c.balancer, &RouteRequest::any().quantum(), 10).await;
        assert!(routed.iter().all(|id| id == "n3"));

        c.probe.set_healthy("n3", false);
        for _ in 0..c.balancer.config().unhealthy_threshold {
            c.balancer.run_health_checks().await;
        }
        assert!(matches!(
            c.balancer.route(&RouteRequest::any().quantum()),
            Err(PipelineError::NodeUnavailable(_))
        ));
        // Classic requests still flow
        assert!(c.balancer.route(&RouteRequest::any()).is_ok());
    }
}
