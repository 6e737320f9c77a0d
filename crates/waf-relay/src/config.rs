// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::error::RelayError;

const DEFAULT_INTAKE_PORT: u16 = 8127;
const DEFAULT_MAX_REQUEST_CONTENT_LENGTH: usize = 10 * 1024 * 1024;
const DEFAULT_FORWARD_TIMEOUT_SECS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_FRESHNESS_WINDOW_SECS: u64 = 86_400;

/// Runtime configuration for the relay process.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Port the intake server listens on.
    pub intake_port: u16,
    /// Upper bound on intake request bodies.
    pub max_request_content_length: usize,
    /// Bound on one synchronous forward invocation.
    pub forward_timeout: Duration,
    /// Bound on one diagnostic probe.
    pub probe_timeout: Duration,
    /// How recent the newest stored event must be before the diagnostic
    /// engine reports "no traffic observed".
    pub freshness_window: Duration,
    /// HTTPS proxy URL for outbound calls.
    pub https_proxy: Option<String>,
    /// Log level (e.g., trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            intake_port: DEFAULT_INTAKE_PORT,
            max_request_content_length: DEFAULT_MAX_REQUEST_CONTENT_LENGTH,
            forward_timeout: Duration::from_secs(DEFAULT_FORWARD_TIMEOUT_SECS),
            probe_timeout: Duration::from_millis(DEFAULT_PROBE_TIMEOUT_MS),
            freshness_window: Duration::from_secs(DEFAULT_FRESHNESS_WINDOW_SECS),
            https_proxy: None,
            log_level: "info".to_string(),
        }
    }
}

impl RelayConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Result<Self, RelayError> {
        let defaults = RelayConfig::default();
        let intake_port = env::var("WAF_RELAY_INTAKE_PORT")
            .ok()
            .and_then(|port| port.parse::<u16>().ok())
            .unwrap_or(defaults.intake_port);
        let max_request_content_length = env::var("WAF_RELAY_MAX_CONTENT_LENGTH")
            .ok()
            .and_then(|val| val.parse::<usize>().ok())
            .unwrap_or(defaults.max_request_content_length);
        let forward_timeout = env::var("WAF_RELAY_FORWARD_TIMEOUT_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.forward_timeout, Duration::from_secs);
        let probe_timeout = env::var("WAF_RELAY_PROBE_TIMEOUT_MS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.probe_timeout, Duration::from_millis);
        let freshness_window = env::var("WAF_RELAY_FRESHNESS_WINDOW_SECS")
            .ok()
            .and_then(|val| val.parse::<u64>().ok())
            .map_or(defaults.freshness_window, Duration::from_secs);
        let https_proxy = env::var("WAF_RELAY_PROXY_HTTPS")
            .or_else(|_| env::var("HTTPS_PROXY"))
            .ok();
        let log_level = env::var("WAF_RELAY_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);

        let config = Self {
            intake_port,
            max_request_content_length,
            forward_timeout,
            probe_timeout,
            freshness_window,
            https_proxy,
            log_level,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), RelayError> {
        if self.intake_port == 0 {
            return Err(RelayError::Misconfigured(
                "intake port must be greater than 0".to_string(),
            ));
        }

        if self.max_request_content_length == 0 {
            return Err(RelayError::Misconfigured(
                "max request content length must be greater than 0".to_string(),
            ));
        }

        if self.forward_timeout.is_zero() || self.probe_timeout.is_zero() {
            return Err(RelayError::Misconfigured(
                "forward and probe timeouts must be greater than 0".to_string(),
            ));
        }

        if self.freshness_window.is_zero() {
            return Err(RelayError::Misconfigured(
                "freshness window must be greater than 0".to_string(),
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.log_level.as_str()) {
            return Err(RelayError::Misconfigured(format!(
                "invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// One logical pipeline: a source-region/target-region/event-type triple
/// plus the identifiers the diagnostic engine checks. Definitions are
/// produced by external setup tooling; the relay only reads them.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub pipeline_id: String,
    pub source_region: String,
    pub target_region: String,
    pub event_type: String,
    /// Identifier of the log source (e.g. a web ACL).
    pub source_id: String,
    /// Destination the delivery subscription is expected to target.
    pub destination_id: String,
    /// Subscription linking the source to the destination.
    pub expected_subscription_id: String,
    /// Forwarder entry point in the source region.
    pub forwarder_endpoint: String,
    /// Processor intake in the target region.
    pub processor_endpoint: String,
}

/// Parses pipeline definitions from the JSON document produced by the
/// setup tooling.
pub fn pipelines_from_json(json: &str) -> Result<Vec<PipelineConfig>, RelayError> {
    serde_json::from_str(json)
        .map_err(|e| RelayError::Misconfigured(format!("invalid pipeline definitions: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RelayConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_invalid_port() {
        let config = RelayConfig {
            intake_port: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let config = RelayConfig {
            log_level: "verbose".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_timeouts() {
        let config = RelayConfig {
            probe_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RelayConfig {
            freshness_window: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_valid_log_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            let config = RelayConfig {
                log_level: level.to_string(),
                ..Default::default()
            };
            assert!(
                config.validate().is_ok(),
                "log level '{}' should be valid",
                level
            );
        }
    }

    #[test]
    fn test_pipelines_from_json() {
        let json = r#"[{
            "pipeline_id": "waf-us-east-1-to-us-west-2",
            "source_region": "us-east-1",
            "target_region": "us-west-2",
            "event_type": "waf-traffic",
            "source_id": "waf-acl-1",
            "destination_id": "relay-intake",
            "expected_subscription_id": "sub-1",
            "forwarder_endpoint": "https://forwarder.us-east-1.example.com/api/v1/logs",
            "processor_endpoint": "https://relay.us-west-2.example.com/api/v1/logs"
        }]"#;

        let pipelines = pipelines_from_json(json).unwrap();
        assert_eq!(pipelines.len(), 1);
        assert_eq!(pipelines[0].pipeline_id, "waf-us-east-1-to-us-west-2");
        assert_eq!(pipelines[0].target_region, "us-west-2");
    }

    #[test]
    fn test_pipelines_from_invalid_json() {
        let err = pipelines_from_json("not json").unwrap_err();
        assert!(matches!(err, RelayError::Misconfigured(_)));
    }
}
