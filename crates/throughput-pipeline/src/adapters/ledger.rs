//! In-memory ledger adapter.
//!
//! Implements `LedgerEngine` as a DAG of committed batches. Each new vertex
//! references up to `parent_fan_in` of the current tips, newest first.
//! Validation rejects batches that reuse a committed transaction id or
//! contain a transaction scripted for rejection.

use crate::domain::{Batch, DagTraversalRequest, PipelineError, PipelineResult};
use crate::ports::outbound::{LedgerEngine, ValidationVerdict};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;
use uuid::Uuid;

/// Default number of parents per DAG vertex.
pub const DEFAULT_PARENT_FAN_IN: usize = 2;

#[derive(Clone, Debug)]
struct DagVertex {
    parents: Vec<Uuid>,
    tx_count: usize,
}

#[derive(Default)]
struct LedgerState {
    vertices: HashMap<Uuid, DagVertex>,
    /// Commit order.
    order: Vec<Uuid>,
    tips: Vec<Uuid>,
    committed_txs: HashSet<Uuid>,
    propagated: Vec<Uuid>,
    rejected_txs: HashSet<Uuid>,
    fail_propagation: bool,
}

/// DAG ledger held in memory.
pub struct InMemoryLedger {
    state: RwLock<LedgerState>,
    parent_fan_in: usize,
}

impl InMemoryLedger {
    #[must_use]
    pub fn new() -> Self {
        Self::with_fan_in(DEFAULT_PARENT_FAN_IN)
    }

    #[must_use]
    pub fn with_fan_in(parent_fan_in: usize) -> Self {
        Self {
            state: RwLock::new(LedgerState::default()),
            parent_fan_in: parent_fan_in.max(1),
        }
    }

    /// Reject any batch containing `tx_id` at validation.
    pub fn reject_transaction(&self, tx_id: Uuid) {
        self.state.write().rejected_txs.insert(tx_id);
    }

    /// Make every subsequent `propagate` call fail.
    pub fn fail_propagation(&self, fail: bool) {
        self.state.write().fail_propagation = fail;
    }

    /// Committed batch ids in commit order.
    #[must_use]
    pub fn committed_batches(&self) -> Vec<Uuid> {
        self.state.read().order.clone()
    }

    /// Total transactions across committed batches.
    #[must_use]
    pub fn committed_transaction_count(&self) -> usize {
        self.state.read().vertices.values().map(|v| v.tx_count).sum()
    }

    #[must_use]
    pub fn contains_transaction(&self, tx_id: &Uuid) -> bool {
        self.state.read().committed_txs.contains(tx_id)
    }

    /// Parents recorded for a committed batch.
    #[must_use]
    pub fn parents_of(&self, batch_id: &Uuid) -> Option<Vec<Uuid>> {
        self.state
            .read()
            .vertices
            .get(batch_id)
            .map(|v| v.parents.clone())
    }

    #[must_use]
    pub fn propagated_batches(&self) -> Vec<Uuid> {
        self.state.read().propagated.clone()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerEngine for InMemoryLedger {
    async fn validate_batch(&self, batch: &Batch) -> PipelineResult<ValidationVerdict> {
        let state = self.state.read();
        let mut seen = HashSet::with_capacity(batch.len());
        for tx in &batch.transactions {
            if state.rejected_txs.contains(&tx.id) {
                return Ok(ValidationVerdict::invalid(format!(
                    "transaction {} rejected by consensus",
                    tx.id
                )));
            }
            if state.committed_txs.contains(&tx.id) || !seen.insert(tx.id) {
                return Ok(ValidationVerdict::invalid(format!(
                    "transaction {} already committed",
                    tx.id
                )));
            }
        }
        Ok(ValidationVerdict::valid())
    }

    async fn update_dag(&self, batch: &Batch) -> PipelineResult<()> {
        let mut state = self.state.write();
        if state.vertices.contains_key(&batch.id) {
            return Err(PipelineError::Ledger(format!(
                "batch {} already in DAG",
                batch.id
            )));
        }

        let parents: Vec<Uuid> = state
            .tips
            .iter()
            .rev()
            .take(self.parent_fan_in)
            .copied()
            .collect();
        state.tips.retain(|tip| !parents.contains(tip));
        state.tips.push(batch.id);

        state.vertices.insert(
            batch.id,
            DagVertex {
                parents: parents.clone(),
                tx_count: batch.len(),
            },
        );
        state.order.push(batch.id);
        state
            .committed_txs
            .extend(batch.transactions.iter().map(|tx| tx.id));

        debug!(batch_id = %batch.id, parents = parents.len(), "Batch added to DAG");
        Ok(())
    }

    async fn propagate(&self, batch: &Batch) -> PipelineResult<()> {
        let mut state = self.state.write();
        if state.fail_propagation {
            return Err(PipelineError::Ledger("propagation unavailable".to_string()));
        }
        state.propagated.push(batch.id);
        Ok(())
    }

    async fn traverse(&self, request: &DagTraversalRequest) -> PipelineResult<Vec<Uuid>> {
        let state = self.state.read();
        let roots: Vec<Uuid> = match request.start {
            Some(start) if state.vertices.contains_key(&start) => vec![start],
            Some(start) => {
                return Err(PipelineError::Ledger(format!("unknown batch {start}")));
            }
            None => state.tips.iter().rev().copied().collect(),
        };

        // Breadth-first towards the genesis batches.
        let mut visited = Vec::new();
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut frontier: VecDeque<(Uuid, usize)> = roots.into_iter().map(|id| (id, 0)).collect();
        while let Some((id, depth)) = frontier.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            visited.push(id);
            if depth >= request.max_depth {
                continue;
            }
            if let Some(vertex) = state.vertices.get(&id) {
                frontier.extend(vertex.parents.iter().map(|p| (*p, depth + 1)));
            }
        }
        Ok(visited)
    }
}
