//! # Shared Bus - Event Bus for Pipeline Components
//!
//! Every component of the throughput pipeline reports what it did by
//! publishing a [`PipelineEvent`]. Dashboards, alerting and the Prometheus
//! bridge consume the same stream; no component keeps its own listener list.
//!
//! ```text
//! ┌──────────────┐                    ┌──────────────┐
//! │  Batcher     │                    │  Telemetry   │
//! │  Balancer    │    publish()       │  Dashboards  │
//! │  Controller  │ ──────┐            │              │
//! └──────────────┘       │            └──────────────┘
//!                        ▼                    ↑
//!                  ┌──────────────┐          │
//!                  │  Event Bus   │          │
//!                  │  (broadcast) │ ─────────┘
//!                  └──────────────┘  subscribe()
//! ```
//!
//! Delivery is best effort: a subscriber that falls more than
//! [`DEFAULT_CHANNEL_CAPACITY`] events behind skips the oldest ones.

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod events;
pub mod publisher;
pub mod subscriber;

// Re-export main types
pub use events::{Component, EventFilter, EventTopic, PipelineEvent};
pub use publisher::{BusStats, EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are skipped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_capacity() {
        assert_eq!(DEFAULT_CHANNEL_CAPACITY, 1000);
    }
}
