//! # Outbound Ports
//!
//! Collaborators the pipeline calls but does not implement: the ledger
//! (consensus/DAG engine), signature verification, node health probes and
//! the clock.

use crate::domain::{
    Batch, DagTraversalRequest, PipelineResult, QuantumValidationRequest, Transaction, WorkerNode,
};
use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

/// Timestamp in milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Outcome of ledger-side batch validation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationVerdict {
    pub is_valid: bool,
    pub error: Option<String>,
}

impl ValidationVerdict {
    #[must_use]
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            error: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            error: Some(reason.into()),
        }
    }
}

/// Consensus/DAG engine - outbound port.
///
/// Every call may fail; failures move the batch to `Failed`.
#[async_trait]
pub trait LedgerEngine: Send + Sync {
    /// Decide whether the batch may be committed.
    async fn validate_batch(&self, batch: &Batch) -> PipelineResult<ValidationVerdict>;

    /// Insert the committed batch into the DAG.
    async fn update_dag(&self, batch: &Batch) -> PipelineResult<()>;

    /// Announce the committed batch to peers.
    async fn propagate(&self, batch: &Batch) -> PipelineResult<()>;

    /// Walk the DAG, returning visited batch ids in visit order.
    async fn traverse(&self, request: &DagTraversalRequest) -> PipelineResult<Vec<Uuid>>;
}

/// Signature scheme - outbound port.
///
/// Synchronous so that it can run inside rayon iterators.
pub trait SignatureVerifier: Send + Sync {
    /// Verify a transaction signature.
    fn verify(&self, tx: &Transaction) -> bool;

    /// Verify a post-quantum signature.
    fn verify_quantum(&self, request: &QuantumValidationRequest) -> bool;
}

/// Node health probe - outbound port.
#[async_trait]
pub trait NodeProbe: Send + Sync {
    /// Probe a node, returning the observed round-trip time.
    async fn probe(&self, node: &WorkerNode) -> PipelineResult<Duration>;
}

/// Time source abstraction for testability.
pub trait TimeSource: Send + Sync {
    /// Returns the current timestamp in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Default system time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

#[cfg(test)]
pub struct MockTimeSource {
    time: std::sync::atomic::AtomicU64,
}

#[cfg(test)]
impl MockTimeSource {
    pub fn new(initial: Timestamp) -> Self {
        Self {
            time: std::sync::atomic::AtomicU64::new(initial),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        self.time.load(std::sync::atomic::Ordering::SeqCst)
    }
}
