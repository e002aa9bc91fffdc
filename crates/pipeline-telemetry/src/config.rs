//! Telemetry configuration from environment variables.

use serde::{Deserialize, Serialize};
use std::env;

/// Configuration for logging and metrics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error or a full directive)
    pub log_level: String,

    /// Whether to write logs to the console
    pub console_output: bool,

    /// Whether to format logs as JSON
    pub json_logs: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "throughput-pipeline".to_string(),
            log_level: "info".to_string(),
            console_output: true,
            json_logs: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PIPELINE_SERVICE_NAME`: Service name (default: throughput-pipeline)
    /// - `PIPELINE_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `PIPELINE_CONSOLE_OUTPUT`: Enable console output (default: true)
    /// - `PIPELINE_JSON_LOGS`: Enable JSON logs (default: false in dev, true in containers)
    pub fn from_env() -> Self {
        let is_container =
            env::var("KUBERNETES_SERVICE_HOST").is_ok() || env::var("DOCKER_CONTAINER").is_ok();

        Self::from_lookup(|key| env::var(key).ok(), is_container)
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>, is_container: bool) -> Self {
        Self {
            service_name: lookup("PIPELINE_SERVICE_NAME")
                .unwrap_or_else(|| "throughput-pipeline".to_string()),

            log_level: lookup("PIPELINE_LOG_LEVEL")
                .or_else(|| lookup("RUST_LOG"))
                .unwrap_or_else(|| "info".to_string()),

            console_output: lookup("PIPELINE_CONSOLE_OUTPUT")
                .map(|v| v.to_lowercase() != "false" && v != "0")
                .unwrap_or(true),

            json_logs: lookup("PIPELINE_JSON_LOGS")
                .map(|v| v.to_lowercase() == "true" || v == "1")
                .unwrap_or(is_container),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = TelemetryConfig::default();
        assert_eq!(config.service_name, "throughput-pipeline");
        assert_eq!(config.log_level, "info");
        assert!(config.console_output);
        assert!(!config.json_logs);
    }

    #[test]
    fn test_pipeline_log_level_wins_over_rust_log() {
        let config = TelemetryConfig::from_lookup(
            lookup(&[("PIPELINE_LOG_LEVEL", "debug"), ("RUST_LOG", "warn")]),
            false,
        );
        assert_eq!(config.log_level, "debug");

        let config = TelemetryConfig::from_lookup(lookup(&[("RUST_LOG", "warn")]), false);
        assert_eq!(config.log_level, "warn");
    }

    #[test]
    fn test_json_logs_default_follows_container() {
        assert!(TelemetryConfig::from_lookup(lookup(&[]), true).json_logs);
        assert!(!TelemetryConfig::from_lookup(lookup(&[("PIPELINE_JSON_LOGS", "0")]), true).json_logs);
        assert!(TelemetryConfig::from_lookup(lookup(&[("PIPELINE_JSON_LOGS", "TRUE")]), false).json_logs);
    }

    #[test]
    fn test_console_output_flag() {
        let config =
            TelemetryConfig::from_lookup(lookup(&[("PIPELINE_CONSOLE_OUTPUT", "false")]), false);
        assert!(!config.console_output);
        let config = TelemetryConfig::from_lookup(
            lookup(&[("PIPELINE_SERVICE_NAME", "tp-eu-1")]),
            false,
        );
        assert_eq!(config.service_name, "tp-eu-1");
    }
}
