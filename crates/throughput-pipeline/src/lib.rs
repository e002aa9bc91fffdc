//! # Throughput Pipeline
//!
//! Transaction batching and load-balancing core that scales ledger
//! throughput in discrete stages (1k → 10k → 30k → 75k TPS).
//!
//! ## Components
//!
//! | Module | Component | Role |
//! |--------|-----------|------|
//! | `worker_pool` | `WorkerPool` | Fixed number of async job slots behind a priority queue |
//! | `batcher` | `TransactionBatcher` | Pending queue, batch formation and execution |
//! | `aggregation` | `SignatureAggregator` | One aggregate per batch, order independent |
//! | `balancer` | `LoadBalancer` | Node registry, routing strategies, health checks, drain |
//! | `controller` | `ThroughputTargetController` | Staged targets and scaling strategies |
//! | `service` | `ProcessingService` | Facade implementing `PipelineApi` |
//!
//! ## Invariants
//!
//! | Invariant | Enforcement |
//! |-----------|-------------|
//! | A transaction lands in exactly one batch | `batcher.rs` - selection and removal under the queue lock |
//! | Batch count and gas never exceed their limits | `domain/selection.rs` - greedy fill |
//! | Commits follow formation order | `batcher.rs` - `CommitSequencer` |
//! | Draining and unhealthy nodes get no new requests | `balancer.rs` - eligibility filter |
//! | At most one target in progress | `controller.rs` - next target starts only on achievement |
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - InMemoryLedger, DigestSignatureVerifier,           │
//! │              InMemoryProbe                                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - PipelineApi trait                          │
//! │  ports/outbound.rs - LedgerEngine, SignatureVerifier,           │
//! │                      NodeProbe, TimeSource                      │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/entities.rs  - Transaction, Batch, WorkerNode           │
//! │  domain/queue.rs     - Stable priority queue                    │
//! │  domain/selection.rs - Size, gas, time and hybrid selection     │
//! │  domain/targets.rs   - Targets, benchmarks, strategy catalog    │
//! │  domain/errors.rs    - PipelineError enum                       │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! let service = ProcessingService::new(PipelineConfig::from_env()?, ServiceDependencies::in_memory());
//! service.start().await?;
//! service.add_worker_node(WorkerNode::new("n1", "10.0.0.1:9000", "us-east", 64)).await?;
//! service.process_transaction(tx)?;
//! service.stop().await?;
//! ```

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod adapters;
pub mod aggregation;
pub mod balancer;
pub mod batcher;
pub mod config;
pub mod controller;
pub mod domain;
pub mod ports;
pub mod service;
pub mod worker_pool;

pub use adapters::{DigestSignatureVerifier, InMemoryLedger, InMemoryProbe};
pub use aggregation::SignatureAggregator;
pub use balancer::{LoadBalancer, RouteRequest, RouteTicket, RoutingStats};
pub use batcher::{BatcherContext, BatcherStats, TransactionBatcher};
pub use config::{
    BatcherConfig, ConfigError, LoadBalancerConfig, LoadBalancingStrategy, MonitoringConfig,
    PipelineConfig, TargetControllerConfig, ValidationStrategy, WorkerPoolConfig,
};
pub use controller::ThroughputTargetController;
pub use domain::*;
pub use ports::*;
pub use service::{ProcessingService, ServiceDependencies, ServiceState};
pub use worker_pool::{JobHandle, WorkerPool, WorkerPoolStats};
