//! # Pipeline Telemetry
//!
//! Logging and metrics for the throughput pipeline.
//!
//! ## Components
//!
//! - **Logs**: `tracing-subscriber` with an env filter, pretty for
//!   development and JSON for containers
//! - **Metrics**: Prometheus collectors fed from bus events by the
//!   [`MetricsBridge`], rendered with [`encode_metrics`]
//!
//! ## Usage
//!
//! ```rust,ignore
//! use pipeline_telemetry::{init_telemetry, MetricsBridge, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_telemetry(&TelemetryConfig::from_env())?;
//!     let bridge = MetricsBridge::spawn(bus.subscribe(EventFilter::all()), shutdown_rx);
//!     // ...
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `PIPELINE_SERVICE_NAME` | `throughput-pipeline` | Service name in logs |
//! | `PIPELINE_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `PIPELINE_JSON_LOGS` | `false` (`true` in containers) | JSON log lines |
//! | `PIPELINE_CONSOLE_OUTPUT` | `true` | Write logs to the console |

// Nursery lints that are too strict
#![allow(clippy::missing_const_for_fn)]
// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod bridge;
mod config;
pub mod metrics;
mod tracing_setup;

pub use bridge::MetricsBridge;
pub use config::TelemetryConfig;
pub use metrics::{encode_metrics, observe_event, register_metrics};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Register metrics and install the global tracing subscriber.
///
/// # Errors
/// - `MetricsInit`: a collector could not be registered
/// - `Config`: the log level filter does not parse
/// - `TracingInit`: a global subscriber is already installed
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    // Metrics first, so events observed during startup are not lost
    register_metrics()?;
    tracing_setup::init_tracing(config)?;

    tracing::debug!(
        config = %serde_json::to_string(config).unwrap_or_default(),
        "Telemetry configured"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TelemetryError::Config("bad level".to_string());
        assert_eq!(err.to_string(), "Invalid configuration: bad level");
    }
}
