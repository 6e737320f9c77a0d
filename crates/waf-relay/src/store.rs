// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only persistence for normalized events, keyed by the
//! deterministic event id so redelivered batches never create duplicate
//! rows.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::RelayError;
use crate::event::SecurityEvent;

/// Persistence contract consumed by the processor and the diagnostic
/// engine.
///
/// `write_all` must be atomic per call: either every event in the slice is
/// durably stored, or none are. It must also be conditional on the event id
/// (unique-constraint semantics) so that concurrent writers racing on the
/// same batch cannot break the deduplication invariant.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn exists(&self, event_id: &str) -> Result<bool, RelayError>;

    async fn write_all(&self, events: Vec<SecurityEvent>) -> Result<(), RelayError>;

    /// Most recent write for a pipeline, used by the diagnostic engine's
    /// freshness check.
    async fn last_event_at(&self, pipeline_id: &str) -> Result<Option<DateTime<Utc>>, RelayError>;
}

#[derive(Default)]
struct StoreInner {
    events: HashMap<String, SecurityEvent>,
    last_write: HashMap<String, DateTime<Utc>>,
}

/// In-memory event store.
///
/// A single mutex over the whole map gives `write_all` its atomicity and
/// makes the conditional insert race-free. A SQL-backed store would get the
/// same guarantees from a unique constraint on the event id plus a
/// transaction per batch.
#[derive(Default)]
pub struct MemoryEventStore {
    inner: Mutex<StoreInner>,
}

impl MemoryEventStore {
    #[must_use]
    pub fn new() -> Self {
        MemoryEventStore::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.events.is_empty()
    }

    pub async fn get(&self, event_id: &str) -> Option<SecurityEvent> {
        self.inner.lock().await.events.get(event_id).cloned()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn exists(&self, event_id: &str) -> Result<bool, RelayError> {
        Ok(self.inner.lock().await.events.contains_key(event_id))
    }

    async fn write_all(&self, events: Vec<SecurityEvent>) -> Result<(), RelayError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut inner = self.inner.lock().await;
        let now = Utc::now();
        for event in events {
            inner
                .last_write
                .insert(event.pipeline_id.clone(), now);
            // Conditional insert: a concurrent writer that got here first
            // wins, and the event is simply already stored.
            inner.events.entry(event.event_id.clone()).or_insert(event);
        }
        Ok(())
    }

    async fn last_event_at(&self, pipeline_id: &str) -> Result<Option<DateTime<Utc>>, RelayError> {
        Ok(self.inner.lock().await.last_write.get(pipeline_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Severity, WafAction};

    fn test_event(id: &str, pipeline: &str) -> SecurityEvent {
        SecurityEvent {
            event_id: id.to_string(),
            pipeline_id: pipeline.to_string(),
            timestamp: Utc::now(),
            source_ip: "198.51.100.7".to_string(),
            rule_id: "rate-limit".to_string(),
            action: WafAction::Block,
            severity: Severity::High,
            campaign_correlated: false,
        }
    }

    #[tokio::test]
    async fn test_write_then_exists() {
        let store = MemoryEventStore::new();
        store
            .write_all(vec![test_event("a", "p1")])
            .await
            .unwrap();
        assert!(store.exists("a").await.unwrap());
        assert!(!store.exists("b").await.unwrap());
    }

    #[tokio::test]
    async fn test_conditional_insert_keeps_first_write() {
        let store = MemoryEventStore::new();
        let first = test_event("a", "p1");
        let mut second = test_event("a", "p1");
        second.source_ip = "203.0.113.9".to_string();

        store.write_all(vec![first.clone()]).await.unwrap();
        store.write_all(vec![second]).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.get("a").await.unwrap().source_ip, first.source_ip);
    }

    #[tokio::test]
    async fn test_last_event_at_per_pipeline() {
        let store = MemoryEventStore::new();
        assert!(store.last_event_at("p1").await.unwrap().is_none());

        store
            .write_all(vec![test_event("a", "p1")])
            .await
            .unwrap();

        assert!(store.last_event_at("p1").await.unwrap().is_some());
        assert!(store.last_event_at("p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_write_is_noop() {
        let store = MemoryEventStore::new();
        store.write_all(Vec::new()).await.unwrap();
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_preserve_dedup() {
        use std::sync::Arc;

        let store = Arc::new(MemoryEventStore::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .write_all(vec![test_event("same-id", "p1")])
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(store.len().await, 1);
    }
}
