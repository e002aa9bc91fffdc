//! # Throughput Pipeline Runtime
//!
//! Entry point: load configuration, initialise telemetry, run until Ctrl+C.

use anyhow::{Context, Result};
use pipeline_runtime::{PipelineRuntime, RuntimeConfig};
use pipeline_telemetry::{init_telemetry, TelemetryConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging and metrics
    init_telemetry(&TelemetryConfig::from_env()).context("Failed to initialize telemetry")?;

    // Load configuration
    let config = RuntimeConfig::from_env()?;

    let mut runtime = PipelineRuntime::new(config);
    runtime.start().await?;

    // Keep the pipeline running
    info!("Pipeline is running. Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;

    // Graceful shutdown
    runtime.shutdown().await?;

    match pipeline_telemetry::encode_metrics() {
        Ok(text) => tracing::debug!("Final metrics:\n{text}"),
        Err(e) => tracing::warn!(error = %e, "Failed to encode final metrics"),
    }

    Ok(())
}
