//! Digest signature adapter.
//!
//! Implements `SignatureVerifier` with a Keccak-bound reference scheme: the
//! 64-byte signature is two chained Keccak-256 digests of the signing
//! digest. It binds a signature to exactly one transaction, which is all the
//! batching pipeline needs from a scheme, without modelling key material.

use crate::domain::{keccak, QuantumValidationRequest, Transaction, MIN_SIGNATURE_LEN};
use crate::ports::outbound::SignatureVerifier;

const TX_DOMAIN: &[u8] = b"tx-sig";
const PQ_DOMAIN: &[u8] = b"pq-sig";

/// Reference signature scheme over Keccak-256.
#[derive(Debug, Clone, Copy, Default)]
pub struct DigestSignatureVerifier;

impl DigestSignatureVerifier {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Signature for `tx` under this scheme.
    #[must_use]
    pub fn signature_for(tx: &Transaction) -> Vec<u8> {
        expand(TX_DOMAIN, &tx.signing_digest())
    }

    /// Return `tx` carrying a valid signature.
    #[must_use]
    pub fn sign(tx: Transaction) -> Transaction {
        let signature = Self::signature_for(&tx);
        tx.with_signature(signature)
    }

    /// Post-quantum signature for a payload under this scheme.
    #[must_use]
    pub fn quantum_signature_for(payload: &[u8]) -> Vec<u8> {
        expand(PQ_DOMAIN, &keccak(&[payload]))
    }
}

fn expand(domain: &[u8], digest: &[u8; 32]) -> Vec<u8> {
    let first = keccak(&[domain, digest]);
    let second = keccak(&[domain, &first]);
    let mut signature = Vec::with_capacity(MIN_SIGNATURE_LEN);
    signature.extend_from_slice(&first);
    signature.extend_from_slice(&second);
    signature
}

impl SignatureVerifier for DigestSignatureVerifier {
    fn verify(&self, tx: &Transaction) -> bool {
        tx.signature == Self::signature_for(tx)
    }

    fn verify_quantum(&self, request: &QuantumValidationRequest) -> bool {
        request.signature == Self::quantum_signature_for(&request.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unsigned() -> Transaction {
        Transaction::new("alice", "bob", 5, 21_000)
    }

    #[test]
    fn test_signed_transaction_verifies() {
        let tx = DigestSignatureVerifier::sign(unsigned());
        assert_eq!(tx.signature.len(), MIN_SIGNATURE_LEN);
        assert!(DigestSignatureVerifier.verify(&tx));
    }

    #[test]
    fn test_tampered_transaction_fails() {
        let mut tx = DigestSignatureVerifier::sign(unsigned());
        tx.amount += 1;
        assert!(!DigestSignatureVerifier.verify(&tx));
    }

    #[test]
    fn test_signature_bound_to_transaction() {
        let a = DigestSignatureVerifier::sign(unsigned());
        let b = unsigned().with_signature(a.signature.clone());
        assert!(!DigestSignatureVerifier.verify(&b));
    }

    #[test]
    fn test_quantum_signature() {
        let payload = b"lattice".to_vec();
        let signature = DigestSignatureVerifier::quantum_signature_for(&payload);
        let request = QuantumValidationRequest::new(payload, signature);
        assert!(DigestSignatureVerifier.verify_quantum(&request));

        let forged = QuantumValidationRequest::new(b"other".to_vec(), request.signature.clone());
        assert!(!DigestSignatureVerifier.verify_quantum(&forged));
    }
}
