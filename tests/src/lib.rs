//! # Throughput Pipeline Test Suite
//!
//! Cross-component scenarios that exercise the processing service, the
//! batcher, the load balancer and the target controller together through
//! their public APIs and the event bus.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/integration/
//! │   ├── scenarios.rs    # Formation triggers, rejection, target sequencing
//! │   ├── concurrency.rs  # Concurrent producers, commit ordering
//! │   ├── routing.rs      # Draining, unhealthy and quantum routing
//! │   └── lifecycle.rs    # Stop drains everything, custom ledger ports
//! └── benches/
//!     └── pipeline_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p pipeline-tests
//! cargo test -p pipeline-tests integration::routing
//! cargo bench -p pipeline-tests
//! ```

pub mod integration;
