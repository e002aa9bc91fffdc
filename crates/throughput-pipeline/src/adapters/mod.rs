//! # Adapters Layer
//!
//! In-memory implementations of the outbound ports, used by the runtime
//! binary and by tests.

pub mod ledger;
pub mod probe;
pub mod verifier;

pub use ledger::InMemoryLedger;
pub use probe::InMemoryProbe;
pub use verifier::DigestSignatureVerifier;
