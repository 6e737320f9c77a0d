// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Region-local ingestion entry point.
//!
//! The processor parses raw WAF log records into normalized
//! [`SecurityEvent`]s, deduplicates them against the event store and
//! persists everything novel in one atomic write. One malformed record
//! never blocks its siblings; a store failure fails the whole batch as
//! `Retryable` so the caller can redeliver safely.

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::RelayError;
use crate::event::{derive_event_id, IngestResult, LogBatch, SecurityEvent, Severity, WafAction};
use crate::store::EventStore;

/// Ingestion contract of the processor entry point. Invoked either directly
/// by a co-located source adapter or via the cross-region forwarder.
#[async_trait]
pub trait LogProcessor: Send + Sync {
    async fn ingest(&self, batch: &LogBatch) -> Result<IngestResult, RelayError>;
}

/// Raw WAF log record as emitted by the log delivery mechanism. Only the
/// fields the normalized event needs are deserialized; everything else in
/// the record is ignored.
#[derive(Debug, Deserialize)]
struct RawWafRecord {
    /// Epoch milliseconds.
    timestamp: i64,
    action: WafAction,
    #[serde(rename = "terminatingRuleId")]
    terminating_rule_id: String,
    #[serde(rename = "httpRequest")]
    http_request: RawHttpRequest,
    #[serde(default)]
    labels: Vec<RawLabel>,
}

#[derive(Debug, Deserialize)]
struct RawHttpRequest {
    #[serde(rename = "clientIp")]
    client_ip: String,
}

#[derive(Debug, Deserialize)]
struct RawLabel {
    name: String,
}

pub struct WafLogProcessor {
    store: Arc<dyn EventStore>,
}

impl WafLogProcessor {
    #[must_use]
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        WafLogProcessor { store }
    }

    /// Parses one raw record into a normalized event. The event id is
    /// derived from the raw bytes before any normalization so that
    /// redelivered records always map to the same id.
    fn parse_record(batch: &LogBatch, raw: &str) -> Result<SecurityEvent, RelayError> {
        let record: RawWafRecord =
            serde_json::from_str(raw).map_err(|e| RelayError::Parse(e.to_string()))?;

        let timestamp = parse_timestamp(record.timestamp)?;
        let campaign_correlated = record
            .labels
            .iter()
            .any(|label| label.name.contains("campaign"));

        Ok(SecurityEvent {
            event_id: derive_event_id(&batch.source_id, raw),
            pipeline_id: batch.pipeline_id.clone(),
            timestamp,
            source_ip: record.http_request.client_ip,
            rule_id: record.terminating_rule_id,
            action: record.action,
            severity: Severity::classify(record.action, campaign_correlated),
            campaign_correlated,
        })
    }
}

fn parse_timestamp(millis: i64) -> Result<DateTime<Utc>, RelayError> {
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or_else(|| RelayError::Parse(format!("timestamp out of range: {millis}")))
}

#[async_trait]
impl LogProcessor for WafLogProcessor {
    async fn ingest(&self, batch: &LogBatch) -> Result<IngestResult, RelayError> {
        // Zero-record probe: acknowledge without touching the store.
        if batch.is_probe() {
            debug!("Probe batch for pipeline {}, skipping store", batch.pipeline_id);
            return Ok(IngestResult::default());
        }

        let mut result = IngestResult::default();
        let mut novel: Vec<SecurityEvent> = Vec::with_capacity(batch.records.len());
        // Guards against the same record appearing twice inside one batch.
        let mut seen_ids: HashSet<String> = HashSet::with_capacity(batch.records.len());

        for raw in &batch.records {
            let event = match Self::parse_record(batch, raw) {
                Ok(event) => event,
                Err(e) => {
                    warn!("Skipping malformed record in pipeline {}: {e}", batch.pipeline_id);
                    result.parse_errors += 1;
                    continue;
                }
            };

            if !seen_ids.insert(event.event_id.clone()) || self.store.exists(&event.event_id).await?
            {
                result.duplicates += 1;
                continue;
            }
            novel.push(event);
        }

        // One logical write for everything novel: either the whole batch
        // lands or the store error propagates and nothing is committed.
        result.accepted = novel.len();
        self.store.write_all(novel).await?;

        debug!(
            "Ingested batch for pipeline {}: accepted={} duplicates={} parse_errors={}",
            batch.pipeline_id, result.accepted, result.duplicates, result.parse_errors
        );
        Ok(result)
    }
}
