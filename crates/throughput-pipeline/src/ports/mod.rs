//! # Ports Layer
//!
//! - `inbound`: `PipelineApi`, the operation surface upstream layers call
//! - `outbound`: `LedgerEngine`, `SignatureVerifier`, `NodeProbe`, `TimeSource`

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
