//! # Domain Entities
//!
//! Transactions, batches, worker nodes and the request types the service
//! routes to nodes.

use super::errors::{PipelineError, PipelineResult};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use uuid::Uuid;

/// 32-byte Keccak-256 digest.
pub type Hash = [u8; 32];

/// Protocol minimum gas limit for any transaction.
pub const MIN_GAS_LIMIT: u64 = 21_000;

/// Minimum accepted signature length in bytes.
pub const MIN_SIGNATURE_LEN: usize = 64;

/// Highest transaction priority.
pub const MAX_PRIORITY: u8 = 10;

/// Keccak-256 over the concatenation of `parts`.
#[must_use]
pub fn keccak(parts: &[&[u8]]) -> Hash {
    let mut hasher = Keccak256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

// =============================================================================
// TRANSACTION
// =============================================================================

/// A transaction submitted to the pipeline.
///
/// Owned by the pending queue from acceptance until it is drawn into exactly
/// one batch. Never mutated after acceptance.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction identity.
    pub id: Uuid,
    /// Sending account.
    pub sender: String,
    /// Receiving account.
    pub recipient: String,
    /// Transferred amount, must be non-zero.
    pub amount: u64,
    /// Opaque payload.
    pub payload: Vec<u8>,
    /// Gas limit, at least [`MIN_GAS_LIMIT`].
    pub gas_limit: u64,
    /// Signature over [`Transaction::signing_digest`].
    pub signature: Vec<u8>,
    /// Submission time in milliseconds. Stamped on acceptance when zero.
    pub submitted_at: u64,
    /// Priority from 0 (lowest) to [`MAX_PRIORITY`].
    pub priority: u8,
}

impl Transaction {
    /// Create an unsigned transaction with a fresh identity.
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        amount: u64,
        gas_limit: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender: sender.into(),
            recipient: recipient.into(),
            amount,
            payload: Vec::new(),
            gas_limit,
            signature: Vec::new(),
            submitted_at: 0,
            priority: 0,
        }
    }

    /// Set the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    /// Set the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Set the signature.
    #[must_use]
    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    /// Set the submission time.
    #[must_use]
    pub fn with_submitted_at(mut self, submitted_at: u64) -> Self {
        self.submitted_at = submitted_at;
        self
    }

    /// Digest covered by the signature.
    ///
    /// Excludes the signature itself and the submission time, which is
    /// stamped by the pipeline after signing.
    #[must_use]
    pub fn signing_digest(&self) -> Hash {
        keccak(&[
            self.id.as_bytes(),
            self.sender.as_bytes(),
            &[0],
            self.recipient.as_bytes(),
            &[0],
            &self.amount.to_le_bytes(),
            &self.gas_limit.to_le_bytes(),
            &[self.priority],
            &self.payload,
        ])
    }

    /// Serialized size in bytes, used by the by-size selection strategy.
    #[must_use]
    pub fn serialized_size(&self) -> u64 {
        bincode::serialized_size(self).unwrap_or(u64::MAX)
    }

    /// Check structural invariants.
    ///
    /// A transaction whose gas limit exceeds `max_gas_limit` could never fit
    /// a batch, so it is rejected here as well.
    pub fn validate(&self, max_gas_limit: u64) -> PipelineResult<()> {
        if self.amount == 0 {
            return Err(PipelineError::invalid_transaction("amount must be positive"));
        }
        if self.gas_limit < MIN_GAS_LIMIT {
            return Err(PipelineError::invalid_transaction(format!(
                "gas limit {} below minimum {}",
                self.gas_limit, MIN_GAS_LIMIT
            )));
        }
        if self.gas_limit > max_gas_limit {
            return Err(PipelineError::invalid_transaction(format!(
                "gas limit {} exceeds batch maximum {}",
                self.gas_limit, max_gas_limit
            )));
        }
        if self.signature.len() < MIN_SIGNATURE_LEN {
            return Err(PipelineError::invalid_transaction(format!(
                "signature length {} below minimum {}",
                self.signature.len(),
                MIN_SIGNATURE_LEN
            )));
        }
        if self.priority > MAX_PRIORITY {
            return Err(PipelineError::invalid_transaction(format!(
                "priority {} above maximum {}",
                self.priority, MAX_PRIORITY
            )));
        }
        Ok(())
    }
}

// =============================================================================
// BATCH
// =============================================================================

/// Batch lifecycle.
///
/// ```text
/// Pending → Validating → Aggregating → Committing → Committed
///               │             │             │
///               └─────────────┴─────────────┴──────→ Failed
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BatchStatus {
    Pending,
    Validating,
    Aggregating,
    Committing,
    Committed,
    Failed,
}

impl BatchStatus {
    /// Committed or failed.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Failed)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validating => "validating",
            Self::Aggregating => "aggregating",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Failed => "failed",
        }
    }
}

/// What caused a batch to form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FormationTrigger {
    /// Pending count reached the maximum batch size.
    SizeThreshold,
    /// Minimum size reached and an urgent transaction is waiting.
    PriorityThreshold,
    /// The wait timer fired with at least the minimum size pending.
    WaitTimer,
    /// Shutdown drained the queue regardless of the minimum size.
    Flush,
}

impl FormationTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SizeThreshold => "size",
            Self::PriorityThreshold => "priority",
            Self::WaitTimer => "timer",
            Self::Flush => "flush",
        }
    }
}

/// Aggregation algorithms, chosen by batch size.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationAlgorithm {
    /// Fewer than 10 signatures.
    SchnorrHalfAggregation,
    /// 10 to 99 signatures.
    MuSigAggregation,
    /// 100 signatures or more.
    BlsAggregation,
}

impl AggregationAlgorithm {
    /// Pick the algorithm for a batch of `count` signatures.
    #[must_use]
    pub fn for_batch_size(count: usize) -> Self {
        match count {
            0..=9 => Self::SchnorrHalfAggregation,
            10..=99 => Self::MuSigAggregation,
            _ => Self::BlsAggregation,
        }
    }

    /// Size in bytes of the aggregate for `count` signatures.
    #[must_use]
    pub fn aggregate_size(self, count: usize) -> usize {
        match self {
            // Half aggregation keeps one 32-byte scalar per signer plus a shared point.
            Self::SchnorrHalfAggregation => 32 * count + 32,
            Self::MuSigAggregation => 64,
            Self::BlsAggregation => 96,
        }
    }

    /// Nominal verification time saved versus verifying each signature.
    #[must_use]
    pub fn verification_time_reduction_pct(self) -> f64 {
        match self {
            Self::SchnorrHalfAggregation => 40.0,
            Self::MuSigAggregation => 60.0,
            Self::BlsAggregation => 80.0,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SchnorrHalfAggregation => "schnorr-half-aggregation",
            Self::MuSigAggregation => "musig-aggregation",
            Self::BlsAggregation => "bls-aggregation",
        }
    }
}

/// One aggregate standing in for every signature of a batch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AggregatedSignature {
    pub algorithm: AggregationAlgorithm,
    /// Commitment over the sorted per-signature digests and signer count.
    pub commitment: Hash,
    pub signer_count: usize,
    /// Sum of the individual signature lengths.
    pub original_size_bytes: usize,
    pub aggregate_size_bytes: usize,
    pub size_reduction_pct: f64,
    pub verification_time_reduction_pct: f64,
}

/// A bounded group of transactions processed and committed together.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    pub id: Uuid,
    /// Transactions in selection order.
    pub transactions: Vec<Transaction>,
    pub total_gas: u64,
    pub aggregated_signature: Option<AggregatedSignature>,
    pub status: BatchStatus,
    pub trigger: FormationTrigger,
    /// Formation order; commits follow it.
    pub sequence: u64,
    pub created_at: u64,
    pub validated_at: Option<u64>,
    pub committed_at: Option<u64>,
    pub error: Option<String>,
}

impl Batch {
    /// Form a pending batch.
    #[must_use]
    pub fn new(
        transactions: Vec<Transaction>,
        trigger: FormationTrigger,
        sequence: u64,
        created_at: u64,
    ) -> Self {
        let total_gas = transactions.iter().map(|tx| tx.gas_limit).sum();
        Self {
            id: Uuid::new_v4(),
            transactions,
            total_gas,
            aggregated_signature: None,
            status: BatchStatus::Pending,
            trigger,
            sequence,
            created_at,
            validated_at: None,
            committed_at: None,
            error: None,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// Ids of the contained transactions, in batch order.
    #[must_use]
    pub fn transaction_ids(&self) -> Vec<Uuid> {
        self.transactions.iter().map(|tx| tx.id).collect()
    }
}

// =============================================================================
// WORKER NODES
// =============================================================================

/// Health status of a worker node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeStatus {
    /// Receives routed requests.
    Active,
    /// Finishing in-flight work, receives nothing new.
    Draining,
    /// Demoted by health checks until a probe succeeds.
    Unhealthy,
}

impl NodeStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Unhealthy => "unhealthy",
        }
    }
}

/// A worker node in the load balancer registry.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkerNode {
    pub id: String,
    pub address: String,
    pub status: NodeStatus,
    /// Requests currently routed to the node.
    pub current_load: u32,
    pub max_capacity: u32,
    /// Moving average of observed response time.
    pub response_time_ms: f64,
    pub region: String,
    /// Supports post-quantum cryptographic operations.
    pub quantum_ready: bool,
}

impl WorkerNode {
    pub fn new(
        id: impl Into<String>,
        address: impl Into<String>,
        region: impl Into<String>,
        max_capacity: u32,
    ) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            status: NodeStatus::Active,
            current_load: 0,
            max_capacity,
            response_time_ms: 0.0,
            region: region.into(),
            quantum_ready: false,
        }
    }

    #[must_use]
    pub fn with_quantum_ready(mut self, quantum_ready: bool) -> Self {
        self.quantum_ready = quantum_ready;
        self
    }

    /// Active with spare capacity.
    #[must_use]
    pub fn is_eligible(&self) -> bool {
        self.status == NodeStatus::Active && self.current_load < self.max_capacity
    }

    /// Load as a fraction of capacity.
    #[must_use]
    pub fn utilization(&self) -> f64 {
        if self.max_capacity == 0 {
            return 1.0;
        }
        f64::from(self.current_load) / f64::from(self.max_capacity)
    }
}

// =============================================================================
// JOBS AND ROUTED REQUESTS
// =============================================================================

/// Kinds of work the worker pool executes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Validation,
    Aggregation,
    Commit,
    QuantumValidation,
    DagTraversal,
}

impl JobKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Aggregation => "aggregation",
            Self::Commit => "commit",
            Self::QuantumValidation => "quantum_validation",
            Self::DagTraversal => "dag_traversal",
        }
    }
}

/// Post-quantum signature check routed to a quantum-ready node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantumValidationRequest {
    pub id: Uuid,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    /// Preferred region for region-aware routing.
    pub region: Option<String>,
}

impl QuantumValidationRequest {
    pub fn new(payload: Vec<u8>, signature: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4(),
            payload,
            signature,
            region: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QuantumValidationResult {
    pub request_id: Uuid,
    pub node_id: String,
    pub valid: bool,
}

/// Walk of the committed-batch DAG.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DagTraversalRequest {
    /// Starting batch. `None` starts from the current tips.
    pub start: Option<Uuid>,
    pub max_depth: usize,
    pub region: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DagTraversalResult {
    pub node_id: String,
    /// Batch ids in visit order.
    pub visited: Vec<Uuid>,
}
