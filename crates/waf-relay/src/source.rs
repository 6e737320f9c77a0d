// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Event source adapter.
//!
//! Wraps the region-local log delivery mechanism. A batch headed for a
//! processor in the same region is ingested directly; a cross-region batch
//! goes through the forwarder. The retry policy lives here, not in the
//! forwarder: only `Retryable` outcomes are retried, with linear backoff,
//! and the accumulated attempt count is reported back.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::RelayError;
use crate::event::{ForwardResult, IngestResult, LogBatch};
use crate::forwarder::{ForwardTarget, Forwarder};
use crate::processor::LogProcessor;

/// Bounded retry for transient forwarding failures. Linear backoff: the
/// n-th wait is `n * backoff`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(1),
        }
    }
}

/// How a delivery ended: ingested in-region, or handed to the forwarder.
#[derive(Debug)]
pub enum DeliveryOutcome {
    Ingested(IngestResult),
    Forwarded(ForwardResult),
}

pub struct SourceAdapter {
    local_region: String,
    processor: Arc<dyn LogProcessor>,
    forwarder: Forwarder,
    retry: RetryPolicy,
}

impl SourceAdapter {
    #[must_use]
    pub fn new(
        local_region: &str,
        processor: Arc<dyn LogProcessor>,
        forwarder: Forwarder,
        retry: RetryPolicy,
    ) -> Self {
        SourceAdapter {
            local_region: local_region.to_string(),
            processor,
            forwarder,
            retry,
        }
    }

    /// Delivers one batch toward the target processor.
    ///
    /// Same-region targets skip the forwarding hop entirely. Cross-region
    /// targets are forwarded under the retry policy; redelivery of the same
    /// batch is safe because ingestion deduplicates on the deterministic
    /// event id.
    pub async fn deliver(
        &self,
        batch: &LogBatch,
        target: &ForwardTarget,
    ) -> Result<DeliveryOutcome, RelayError> {
        if target.region == self.local_region {
            debug!(
                "Target region {} is local, ingesting batch for pipeline {} directly",
                target.region, batch.pipeline_id
            );
            return Ok(DeliveryOutcome::Ingested(self.processor.ingest(batch).await?));
        }

        let mut attempts = 0;
        let mut last_error = None;

        while attempts < self.retry.max_attempts {
            let result = self.forwarder.forward(batch, target).await;
            attempts += result.attempts;

            if result.delivered {
                return Ok(DeliveryOutcome::Forwarded(ForwardResult {
                    delivered: true,
                    attempts,
                    last_error: None,
                }));
            }

            let retryable = result
                .last_error
                .as_ref()
                .is_some_and(RelayError::is_retryable);
            last_error = result.last_error;

            if !retryable {
                break;
            }
            if attempts < self.retry.max_attempts {
                let wait = self.retry.backoff * attempts;
                warn!(
                    "Forward attempt {attempts} for pipeline {} failed, retrying in {wait:?}",
                    batch.pipeline_id
                );
                tokio::time::sleep(wait).await;
            }
        }

        Ok(DeliveryOutcome::Forwarded(ForwardResult {
            delivered: false,
            attempts,
            last_error,
        }))
    }
}
