//! # Domain Errors
//!
//! Error types for the throughput pipeline.
//!
//! Input validation errors surface synchronously to the caller. Batch and
//! node failures are recorded on the entity and published as events; only
//! `NodeUnavailable` and `RetriesExhausted` reach a caller from routing.

use thiserror::Error;
use uuid::Uuid;

use crate::config::ConfigError;

/// Pipeline error types.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Malformed or out-of-bounds transaction, rejected before queuing.
    #[error("Invalid transaction: {reason}")]
    InvalidTransaction {
        /// Which structural check failed.
        reason: String,
    },

    /// Downstream validation rejected the batch.
    #[error("Batch {batch_id} failed validation: {reason}")]
    BatchValidation {
        /// Rejected batch.
        batch_id: Uuid,
        /// Validator-supplied reason.
        reason: String,
    },

    /// One or more signatures did not verify during aggregation.
    #[error("Signature aggregation failed: {} invalid signature(s)", invalid.len())]
    SignatureAggregation {
        /// Transactions whose signature failed to verify.
        invalid: Vec<Uuid>,
    },

    /// Aggregation was asked to combine zero signatures.
    #[error("Cannot aggregate an empty signature set")]
    EmptyAggregation,

    /// The load balancer has no eligible node for the request.
    #[error("No eligible worker node: {0}")]
    NodeUnavailable(String),

    /// Every retry against the remaining nodes failed.
    #[error("Request failed after {attempts} attempt(s): {last_error}")]
    RetriesExhausted {
        /// Attempts made, including the first.
        attempts: u32,
        /// Error reported by the last node tried.
        last_error: String,
    },

    /// Node id not present in the registry.
    #[error("Unknown worker node: {0}")]
    UnknownNode(String),

    /// Node id already registered.
    #[error("Worker node already registered: {0}")]
    DuplicateNode(String),

    /// Health probe failed.
    #[error("Probe failed for node {node_id}: {reason}")]
    ProbeFailed {
        /// Probed node.
        node_id: String,
        /// Failure description.
        reason: String,
    },

    /// Operation invoked before `start()` or after `stop()`.
    #[error("Processing service is not running")]
    ServiceNotRunning,

    /// `start()` invoked on a service that has already been stopped.
    #[error("Processing service has been stopped and cannot be restarted")]
    ServiceStopped,

    /// The worker pool no longer accepts jobs.
    #[error("Worker pool is shut down")]
    WorkerPoolShutdown,

    /// A job ended without producing a result (panicked or dropped).
    #[error("Job was cancelled before completion")]
    JobCancelled,

    /// Scaling strategy id not in the catalog.
    #[error("Unknown scaling strategy: {0}")]
    UnknownStrategy(String),

    /// Strategy cannot start because it is not pending.
    #[error("Strategy {id} is {status}, expected pending")]
    StrategyNotPending {
        /// Strategy id.
        id: String,
        /// Current status.
        status: String,
    },

    /// Strategy depends on another strategy that is not completed.
    #[error("Strategy {strategy} requires {dependency} to be completed first")]
    DependencyNotMet {
        /// Strategy being implemented.
        strategy: String,
        /// Missing dependency.
        dependency: String,
    },

    /// Ledger collaborator error.
    #[error("Ledger error: {0}")]
    Ledger(String),

    /// Configuration rejected at startup.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl PipelineError {
    /// Shorthand for an `InvalidTransaction` error.
    pub fn invalid_transaction(reason: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            reason: reason.into(),
        }
    }

    /// Whether the error came from input validation.
    #[must_use]
    pub fn is_invalid_transaction(&self) -> bool {
        matches!(self, Self::InvalidTransaction { .. })
    }
}

/// Result alias used across the crate.
pub type PipelineResult<T> = Result<T, PipelineError>;
