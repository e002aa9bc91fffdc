//! # Domain Layer
//!
//! Pure types and functions with no I/O.
//!
//! ## Components
//!
//! - `entities`: Transaction, Batch, WorkerNode and routed request types
//! - `queue`: stable priority queue of pending transactions
//! - `selection`: batch selection strategies
//! - `targets`: throughput targets, benchmarks, scaling strategy catalog
//! - `errors`: PipelineError enumeration

pub mod entities;
pub mod errors;
pub mod queue;
pub mod selection;
pub mod targets;

pub use entities::*;
pub use errors::*;
pub use queue::*;
pub use selection::*;
pub use targets::*;
