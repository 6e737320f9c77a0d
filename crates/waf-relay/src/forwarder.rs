// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-region forwarding hop.
//!
//! The log delivery mechanism can only invoke a receiver in its own region,
//! so when source and processor regions differ the forwarder re-invokes the
//! processor's intake endpoint in the target region. It serializes the
//! batch unchanged (the processor must see exactly what the source
//! emitted), performs one synchronous attempt with a bounded timeout and
//! classifies failures for the caller's retry policy. The forwarder itself
//! never retries: at-least-once semantics belong to the source adapter, and
//! the processor's idempotent ingestion makes redelivery safe.

use std::time::Duration;

use tracing::{debug, error};

use crate::error::RelayError;
use crate::event::{ForwardResult, LogBatch};

/// Processor intake in the target region.
#[derive(Debug, Clone)]
pub struct ForwardTarget {
    pub region: String,
    pub endpoint: String,
}

impl ForwardTarget {
    #[must_use]
    pub fn new(region: &str, endpoint: &str) -> Self {
        ForwardTarget {
            region: region.to_string(),
            endpoint: endpoint.to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    #[must_use]
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Forwarder { client, timeout }
    }

    /// Forwards one batch to the target processor intake.
    ///
    /// Exactly one downstream invocation, no other side effects. Transport
    /// failures, timeouts and 5xx responses come back as `Retryable`; 4xx
    /// responses (invalid target, authorization denied) as `Misconfigured`.
    pub async fn forward(&self, batch: &LogBatch, target: &ForwardTarget) -> ForwardResult {
        if batch.records.is_empty() {
            return ForwardResult {
                delivered: false,
                attempts: 0,
                last_error: Some(RelayError::Misconfigured(
                    "refusing to forward an empty batch".to_string(),
                )),
            };
        }

        debug!(
            "Forwarding {} records for pipeline {} to {} ({})",
            batch.records.len(),
            batch.pipeline_id,
            target.endpoint,
            target.region
        );

        let response = self
            .client
            .post(&target.endpoint)
            .timeout(self.timeout)
            .json(batch)
            .send()
            .await;

        let error = match response {
            Ok(resp) if resp.status().is_success() => {
                return ForwardResult {
                    delivered: true,
                    attempts: 1,
                    last_error: None,
                };
            }
            Ok(resp) => {
                let status = resp.status();
                if status.is_client_error() {
                    // Invalid target or authorization denied: permanent
                    // until an operator fixes the configuration.
                    RelayError::Misconfigured(format!(
                        "target {} rejected batch: {status}",
                        target.endpoint
                    ))
                } else {
                    RelayError::Retryable(format!(
                        "target {} answered {status}",
                        target.endpoint
                    ))
                }
            }
            Err(e) if e.is_timeout() => RelayError::Retryable(format!(
                "forward to {} timed out after {:?}",
                target.endpoint, self.timeout
            )),
            Err(e) if e.is_builder() => {
                RelayError::Misconfigured(format!("invalid target {}: {e}", target.endpoint))
            }
            Err(e) => RelayError::Retryable(format!("forward to {} failed: {e}", target.endpoint)),
        };

        error!("Forwarding failed for pipeline {}: {error}", batch.pipeline_id);
        ForwardResult {
            delivered: false,
            attempts: 1,
            last_error: Some(error),
        }
    }
}
