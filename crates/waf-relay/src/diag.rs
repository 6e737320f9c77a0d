// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Diagnostic engine.
//!
//! Walks every stage of one pipeline and reports a health verdict per
//! stage. Diagnostics exist to surface the failures the data path cannot
//! self-report: delivery disabled at the source, a subscription pointing at
//! the wrong destination, an unreachable hop, or a pipeline that is wired
//! correctly but has seen no traffic. A later stage is always evaluated
//! even when an earlier one is unhealthy, so the operator gets the complete
//! picture in one pass.
//!
//! The engine sits off the data path: its only side effects are the
//! lightweight zero-record probes against the forwarder and processor
//! endpoints.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::error::RelayError;
use crate::event::LogBatch;
use crate::store::EventStore;

/// One inspectable link in a pipeline, in fixed report order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PipelineStage {
    SourceConfig,
    DeliverySubscription,
    Forwarder,
    Processor,
    EventStore,
}

impl PipelineStage {
    pub const ALL: [PipelineStage; 5] = [
        PipelineStage::SourceConfig,
        PipelineStage::DeliverySubscription,
        PipelineStage::Forwarder,
        PipelineStage::Processor,
        PipelineStage::EventStore,
    ];
}

/// Per-stage health verdict. The derived ordering is the severity ladder
/// used for the overall verdict: Healthy < Degraded < Misconfigured <
/// Unreachable < Unknown, worst wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum HealthVerdict {
    Healthy,
    Degraded,
    Misconfigured,
    Unreachable,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageReport {
    pub stage: PipelineStage,
    pub verdict: HealthVerdict,
    pub detail: String,
    pub checked_at: DateTime<Utc>,
}

impl StageReport {
    fn new(stage: PipelineStage, verdict: HealthVerdict, detail: String) -> Self {
        StageReport {
            stage,
            verdict,
            detail,
            checked_at: Utc::now(),
        }
    }
}

/// Full report for one pipeline: one verdict per stage in fixed order,
/// overall verdict = worst stage verdict. Built fresh per run, never
/// persisted.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticReport {
    pub pipeline_id: String,
    pub stages: Vec<StageReport>,
    pub overall: HealthVerdict,
}

impl DiagnosticReport {
    fn assemble(pipeline_id: &str, stages: Vec<StageReport>) -> Self {
        let overall = stages
            .iter()
            .map(|s| s.verdict)
            .max()
            .unwrap_or(HealthVerdict::Unknown);
        DiagnosticReport {
            pipeline_id: pipeline_id.to_string(),
            stages,
            overall,
        }
    }
}

/// Read-only view of the provider-side pipeline state (source delivery
/// configuration and delivery subscriptions). Supplied by the setup
/// tooling collaborator; a provider-backed implementation queries the
/// cloud APIs, [`StaticPipelineState`] backs tests and local runs.
#[async_trait]
pub trait PipelineStateSource: Send + Sync {
    /// Does the declared log source have delivery enabled?
    async fn delivery_enabled(&self, source_id: &str) -> Result<bool, RelayError>;

    /// The destination a subscription currently targets, if the
    /// subscription exists at all.
    async fn subscription_target(&self, subscription_id: &str)
        -> Result<Option<String>, RelayError>;
}

/// Fixed in-memory pipeline state.
#[derive(Debug, Default)]
pub struct StaticPipelineState {
    enabled_sources: HashSet<String>,
    subscriptions: HashMap<String, String>,
}

impl StaticPipelineState {
    #[must_use]
    pub fn new() -> Self {
        StaticPipelineState::default()
    }

    #[must_use]
    pub fn with_delivery_enabled(mut self, source_id: &str) -> Self {
        self.enabled_sources.insert(source_id.to_string());
        self
    }

    #[must_use]
    pub fn with_subscription(mut self, subscription_id: &str, destination_id: &str) -> Self {
        self.subscriptions
            .insert(subscription_id.to_string(), destination_id.to_string());
        self
    }

    /// State in which every configured pipeline is correctly wired. Used by
    /// the server binary until a provider-backed source is plugged in.
    #[must_use]
    pub fn assume_wired(pipelines: &[PipelineConfig]) -> Self {
        let mut state = StaticPipelineState::new();
        for pipeline in pipelines {
            state.enabled_sources.insert(pipeline.source_id.clone());
            state.subscriptions.insert(
                pipeline.expected_subscription_id.clone(),
                pipeline.destination_id.clone(),
            );
        }
        state
    }
}

#[async_trait]
impl PipelineStateSource for StaticPipelineState {
    async fn delivery_enabled(&self, source_id: &str) -> Result<bool, RelayError> {
        Ok(self.enabled_sources.contains(source_id))
    }

    async fn subscription_target(
        &self,
        subscription_id: &str,
    ) -> Result<Option<String>, RelayError> {
        Ok(self.subscriptions.get(subscription_id).cloned())
    }
}

pub struct DiagnosticEngine {
    state: Arc<dyn PipelineStateSource>,
    store: Arc<dyn EventStore>,
    client: reqwest::Client,
    probe_timeout: Duration,
    freshness_window: Duration,
}

impl DiagnosticEngine {
    #[must_use]
    pub fn new(
        state: Arc<dyn PipelineStateSource>,
        store: Arc<dyn EventStore>,
        client: reqwest::Client,
        probe_timeout: Duration,
        freshness_window: Duration,
    ) -> Self {
        DiagnosticEngine {
            state,
            store,
            client,
            probe_timeout,
            freshness_window,
        }
    }

    /// Runs one diagnostic pass over the pipeline.
    ///
    /// Stage state is read fresh on every run; nothing is cached. The two
    /// endpoint probes are issued concurrently, each under its own timeout,
    /// so one unreachable stage cannot stall the report. Cancellation is
    /// honored at stage boundaries; a cancelled run returns `Cancelled`
    /// instead of a partial report.
    pub async fn diagnose(
        &self,
        pipeline: &PipelineConfig,
        cancel: &CancellationToken,
    ) -> Result<DiagnosticReport, RelayError> {
        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }
        debug!("Diagnosing pipeline {}", pipeline.pipeline_id);

        let (source_config, subscription) = tokio::join!(
            self.check_source_config(pipeline),
            self.check_subscription(pipeline),
        );

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let (forwarder, processor) = tokio::join!(
            self.probe(
                PipelineStage::Forwarder,
                &pipeline.forwarder_endpoint,
                &pipeline.pipeline_id
            ),
            self.probe(
                PipelineStage::Processor,
                &pipeline.processor_endpoint,
                &pipeline.pipeline_id
            ),
        );

        if cancel.is_cancelled() {
            return Err(RelayError::Cancelled);
        }

        let upstream_healthy = [&source_config, &subscription, &forwarder, &processor]
            .iter()
            .all(|s| s.verdict == HealthVerdict::Healthy);
        let event_store = self.check_store_freshness(pipeline, upstream_healthy).await;

        Ok(DiagnosticReport::assemble(
            &pipeline.pipeline_id,
            vec![source_config, subscription, forwarder, processor, event_store],
        ))
    }

    async fn check_source_config(&self, pipeline: &PipelineConfig) -> StageReport {
        match self.state.delivery_enabled(&pipeline.source_id).await {
            Ok(true) => StageReport::new(
                PipelineStage::SourceConfig,
                HealthVerdict::Healthy,
                format!("delivery enabled for {}", pipeline.source_id),
            ),
            Ok(false) => StageReport::new(
                PipelineStage::SourceConfig,
                HealthVerdict::Misconfigured,
                format!("delivery disabled for {}", pipeline.source_id),
            ),
            Err(e) => StageReport::new(
                PipelineStage::SourceConfig,
                HealthVerdict::Unknown,
                format!("could not read source configuration: {e}"),
            ),
        }
    }

    async fn check_subscription(&self, pipeline: &PipelineConfig) -> StageReport {
        match self
            .state
            .subscription_target(&pipeline.expected_subscription_id)
            .await
        {
            Ok(Some(destination)) if destination == pipeline.destination_id => StageReport::new(
                PipelineStage::DeliverySubscription,
                HealthVerdict::Healthy,
                format!(
                    "subscription {} targets {destination}",
                    pipeline.expected_subscription_id
                ),
            ),
            Ok(Some(destination)) => StageReport::new(
                PipelineStage::DeliverySubscription,
                HealthVerdict::Misconfigured,
                format!(
                    "subscription {} targets {destination}, expected {}",
                    pipeline.expected_subscription_id, pipeline.destination_id
                ),
            ),
            Ok(None) => StageReport::new(
                PipelineStage::DeliverySubscription,
                HealthVerdict::Misconfigured,
                format!(
                    "subscription {} does not exist",
                    pipeline.expected_subscription_id
                ),
            ),
            Err(e) => StageReport::new(
                PipelineStage::DeliverySubscription,
                HealthVerdict::Unknown,
                format!("could not read subscription state: {e}"),
            ),
        }
    }

    /// Zero-record probe against an intake endpoint. Receivers answer it
    /// without touching the event store.
    async fn probe(&self, stage: PipelineStage, endpoint: &str, pipeline_id: &str) -> StageReport {
        let request = self
            .client
            .post(endpoint)
            .timeout(self.probe_timeout)
            .json(&LogBatch::probe(pipeline_id))
            .send();

        match tokio::time::timeout(self.probe_timeout, request).await {
            Ok(Ok(resp)) if resp.status().is_success() => StageReport::new(
                stage,
                HealthVerdict::Healthy,
                format!("probe of {endpoint} succeeded"),
            ),
            Ok(Ok(resp)) => StageReport::new(
                stage,
                HealthVerdict::Unreachable,
                format!("probe of {endpoint} answered {}", resp.status()),
            ),
            Ok(Err(e)) => StageReport::new(
                stage,
                HealthVerdict::Unreachable,
                format!("probe of {endpoint} failed: {e}"),
            ),
            Err(_) => StageReport::new(
                stage,
                HealthVerdict::Unreachable,
                format!("probe of {endpoint} timed out after {:?}", self.probe_timeout),
            ),
        }
    }

    async fn check_store_freshness(
        &self,
        pipeline: &PipelineConfig,
        upstream_healthy: bool,
    ) -> StageReport {
        let last = match self.store.last_event_at(&pipeline.pipeline_id).await {
            Ok(last) => last,
            Err(e) => {
                return StageReport::new(
                    PipelineStage::EventStore,
                    HealthVerdict::Unreachable,
                    format!("could not query event store: {e}"),
                );
            }
        };

        let window = chrono::Duration::from_std(self.freshness_window)
            .unwrap_or_else(|_| chrono::Duration::days(1));
        match last {
            Some(at) if Utc::now() - at <= window => StageReport::new(
                PipelineStage::EventStore,
                HealthVerdict::Healthy,
                format!("last event written at {at}"),
            ),
            // A wired-up pipeline with no traffic is not itself a defect,
            // but the operator should know the dashboard silence is real.
            _ if upstream_healthy => StageReport::new(
                PipelineStage::EventStore,
                HealthVerdict::Degraded,
                "no traffic observed".to_string(),
            ),
            _ => StageReport::new(
                PipelineStage::EventStore,
                HealthVerdict::Degraded,
                "no recent events (upstream stage unhealthy)".to_string(),
            ),
        }
    }
}
