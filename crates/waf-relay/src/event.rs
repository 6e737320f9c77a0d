// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Data model for the forwarding pipeline: raw batches on the wire,
//! normalized security events in the store, and the result types returned
//! by the ingest and forward operations.

use std::hash::Hasher;

use chrono::{DateTime, Utc};
use fnv::FnvHasher;
use serde::{Deserialize, Serialize};

use crate::error::RelayError;

/// A bounded group of raw WAF log records delivered together by the
/// region-local delivery mechanism.
///
/// Immutable once received; the forwarding hop serializes it unchanged so
/// the processor in the target region sees exactly what the source emitted.
/// A batch with zero records is the health probe payload and is answered
/// without touching the event store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBatch {
    pub pipeline_id: String,
    pub source_region: String,
    pub source_id: String,
    pub delivered_at: DateTime<Utc>,
    pub records: Vec<String>,
}

impl LogBatch {
    #[must_use]
    pub fn new(
        pipeline_id: &str,
        source_region: &str,
        source_id: &str,
        records: Vec<String>,
    ) -> Self {
        LogBatch {
            pipeline_id: pipeline_id.to_string(),
            source_region: source_region.to_string(),
            source_id: source_id.to_string(),
            delivered_at: Utc::now(),
            records,
        }
    }

    /// Zero-record probe payload used by health checks.
    #[must_use]
    pub fn probe(pipeline_id: &str) -> Self {
        LogBatch::new(pipeline_id, "", "", Vec::new())
    }

    #[must_use]
    pub fn is_probe(&self) -> bool {
        self.records.is_empty()
    }
}

/// Traffic decision taken by the WAF for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WafAction {
    Allow,
    Block,
    Count,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Classification policy: blocks are High, counted matches Medium,
    /// allows Low. Campaign-correlated events are raised one level.
    #[must_use]
    pub fn classify(action: WafAction, campaign_correlated: bool) -> Self {
        let base = match action {
            WafAction::Block => Severity::High,
            WafAction::Count => Severity::Medium,
            WafAction::Allow => Severity::Low,
        };
        if campaign_correlated {
            match base {
                Severity::Low => Severity::Medium,
                Severity::Medium => Severity::High,
                Severity::High | Severity::Critical => Severity::Critical,
            }
        } else {
            base
        }
    }
}

/// Normalized WAF traffic decision as persisted for dashboarding.
///
/// `event_id` is derived deterministically from the raw record content (see
/// [`derive_event_id`]), never generated randomly: re-ingesting the same raw
/// record yields the same id, which is what makes cross-region redelivery
/// idempotent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event_id: String,
    pub pipeline_id: String,
    pub timestamp: DateTime<Utc>,
    pub source_ip: String,
    pub rule_id: String,
    pub action: WafAction,
    pub severity: Severity,
    pub campaign_correlated: bool,
}

/// Derives the deduplication identifier for one logical log occurrence.
///
/// FNV-1a 64 over the source identifier and the raw record bytes, hex
/// encoded. Two deliveries of the same record from the same source always
/// collide on purpose; records from different sources never share an id
/// stream.
#[must_use]
pub fn derive_event_id(source_id: &str, raw_record: &str) -> String {
    let mut hasher = FnvHasher::default();
    hasher.write(source_id.as_bytes());
    hasher.write(raw_record.as_bytes());
    format!("{:016x}", hasher.finish())
}

/// Outcome of ingesting one batch. Record-level parse failures are counted
/// here rather than failing the batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestResult {
    pub accepted: usize,
    pub duplicates: usize,
    pub parse_errors: usize,
}

/// Outcome of one forwarding call (or a caller-driven sequence of retries).
///
/// When `delivered` is false, `last_error` carries the classification the
/// caller's retry policy keys off: `Retryable` may be retried with the same
/// batch, `Misconfigured` is permanent until an operator intervenes.
#[derive(Debug)]
pub struct ForwardResult {
    pub delivered: bool,
    pub attempts: u32,
    pub last_error: Option<RelayError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_id_deterministic() {
        let a = derive_event_id("waf-acl-1", r#"{"timestamp":1}"#);
        let b = derive_event_id("waf-acl-1", r#"{"timestamp":1}"#);
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_event_id_varies_by_source() {
        let a = derive_event_id("waf-acl-1", r#"{"timestamp":1}"#);
        let b = derive_event_id("waf-acl-2", r#"{"timestamp":1}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_event_id_varies_by_record() {
        let a = derive_event_id("waf-acl-1", r#"{"timestamp":1}"#);
        let b = derive_event_id("waf-acl-1", r#"{"timestamp":2}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_probe_batch() {
        let batch = LogBatch::probe("pipeline-1");
        assert!(batch.is_probe());
        assert_eq!(batch.pipeline_id, "pipeline-1");
    }

    #[test]
    fn test_batch_round_trips_unchanged() {
        let batch = LogBatch::new(
            "pipeline-1",
            "us-east-1",
            "waf-acl-1",
            vec![r#"{"raw":"record"}"#.to_string()],
        );
        let json = serde_json::to_string(&batch).unwrap();
        let back: LogBatch = serde_json::from_str(&json).unwrap();
        assert_eq!(back.records, batch.records);
        assert_eq!(back.source_id, batch.source_id);
    }

    #[test]
    fn test_severity_classification() {
        assert_eq!(Severity::classify(WafAction::Block, false), Severity::High);
        assert_eq!(Severity::classify(WafAction::Count, false), Severity::Medium);
        assert_eq!(Severity::classify(WafAction::Allow, false), Severity::Low);
        assert_eq!(
            Severity::classify(WafAction::Block, true),
            Severity::Critical
        );
        assert_eq!(Severity::classify(WafAction::Allow, true), Severity::Medium);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_waf_action_wire_format() {
        assert_eq!(
            serde_json::from_str::<WafAction>("\"BLOCK\"").unwrap(),
            WafAction::Block
        );
        assert_eq!(serde_json::to_string(&WafAction::Allow).unwrap(), "\"ALLOW\"");
    }
}
