//! # Signature Aggregation
//!
//! Combines a batch's per-transaction signatures into one aggregate.
//!
//! | Algorithm | Batch size | Aggregate size | Verification saved |
//! |-----------|------------|----------------|--------------------|
//! | `SchnorrHalfAggregation` | < 10 | 32·n + 32 bytes | 40% |
//! | `MuSigAggregation` | 10–99 | 64 bytes | 60% |
//! | `BlsAggregation` | ≥ 100 | 96 bytes | 80% |
//!
//! The aggregate commits to the sorted set of per-signature digests, so it
//! does not depend on transaction order. It verifies if and only if every
//! constituent signature verifies.

use crate::domain::{
    keccak, AggregatedSignature, AggregationAlgorithm, Hash, PipelineError, PipelineResult,
    Transaction,
};
use crate::ports::outbound::SignatureVerifier;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

/// Aggregates and verifies batch signatures.
pub struct SignatureAggregator {
    verifier: Arc<dyn SignatureVerifier>,
}

impl SignatureAggregator {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self { verifier }
    }

    /// Aggregate the signatures of `transactions`.
    ///
    /// Fails with the ids of every transaction whose signature does not
    /// verify.
    pub fn aggregate(&self, transactions: &[Transaction]) -> PipelineResult<AggregatedSignature> {
        if transactions.is_empty() {
            return Err(PipelineError::EmptyAggregation);
        }

        let invalid = self.invalid_signatures(transactions);
        if !invalid.is_empty() {
            warn!(invalid = invalid.len(), "Aggregation rejected invalid signatures");
            return Err(PipelineError::SignatureAggregation { invalid });
        }

        let algorithm = AggregationAlgorithm::for_batch_size(transactions.len());
        let commitment = commitment(algorithm, transactions);
        let original_size_bytes: usize = transactions.iter().map(|tx| tx.signature.len()).sum();
        let aggregate_size_bytes = algorithm.aggregate_size(transactions.len());
        let size_reduction_pct = if original_size_bytes > 0 {
            (100.0 * (1.0 - aggregate_size_bytes as f64 / original_size_bytes as f64)).max(0.0)
        } else {
            0.0
        };

        debug!(
            algorithm = algorithm.as_str(),
            signers = transactions.len(),
            original_size_bytes,
            aggregate_size_bytes,
            "Signatures aggregated"
        );

        Ok(AggregatedSignature {
            algorithm,
            commitment,
            signer_count: transactions.len(),
            original_size_bytes,
            aggregate_size_bytes,
            size_reduction_pct,
            verification_time_reduction_pct: algorithm.verification_time_reduction_pct(),
        })
    }

    /// Check an aggregate against `transactions`.
    #[must_use]
    pub fn verify_aggregate(
        &self,
        transactions: &[Transaction],
        aggregate: &AggregatedSignature,
    ) -> bool {
        if transactions.len() != aggregate.signer_count
            || AggregationAlgorithm::for_batch_size(transactions.len()) != aggregate.algorithm
        {
            return false;
        }
        self.invalid_signatures(transactions).is_empty()
            && commitment(aggregate.algorithm, transactions) == aggregate.commitment
    }

    fn invalid_signatures(&self, transactions: &[Transaction]) -> Vec<Uuid> {
        transactions
            .par_iter()
            .filter(|tx| !self.verifier.verify(tx))
            .map(|tx| tx.id)
            .collect()
    }
}

/// Digest binding one signature to its transaction.
fn signature_digest(tx: &Transaction) -> Hash {
    keccak(&[tx.id.as_bytes(), &tx.signature])
}

fn commitment(algorithm: AggregationAlgorithm, transactions: &[Transaction]) -> Hash {
    let mut digests: Vec<Hash> = transactions.par_iter().map(signature_digest).collect();
    digests.par_sort_unstable();

    let count = (transactions.len() as u64).to_le_bytes();
    let mut parts: Vec<&[u8]> = Vec::with_capacity(digests.len() + 2);
    parts.push(algorithm.as_str().as_bytes());
    parts.push(&count);
    parts.extend(digests.iter().map(|d| d.as_slice()));
    keccak(&parts)
}
