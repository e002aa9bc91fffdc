//! # Throughput Pipeline Runtime
//!
//! Wires the processing service for a standalone process.
//!
//! ## Modular Structure
//!
//! - `runtime` - Configuration loading, startup and graceful shutdown
//! - `node_spec` - `PIPELINE_WORKER_NODES` parsing
//! - `load` - Optional synthetic load (`PIPELINE_DEMO_TPS`)
//!
//! ## Startup Sequence
//!
//! ```text
//! env ──→ RuntimeConfig ──→ init_telemetry
//!                                │
//!                                ↓
//!               MetricsBridge ←── bus ←── ProcessingService::start
//!                                              │
//!                                              ↓
//!                                   add_worker_node (each entry)
//!                                              │
//!                                              ↓
//!                                    LoadGenerator (optional)
//! ```

pub mod load;
pub mod node_spec;
pub mod runtime;

pub use load::LoadGenerator;
pub use node_spec::{parse_worker_nodes, NodeSpecError};
pub use runtime::{PipelineRuntime, RuntimeConfig};
