// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::{env, fs, sync::Arc};

use anyhow::Context;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use waf_relay::config::{pipelines_from_json, RelayConfig};
use waf_relay::diag::{DiagnosticEngine, StaticPipelineState};
use waf_relay::http_utils::build_client;
use waf_relay::intake::IntakeServer;
use waf_relay::logger;
use waf_relay::processor::WafLogProcessor;
use waf_relay::store::MemoryEventStore;

#[tokio::main]
pub async fn main() -> anyhow::Result<()> {
    let config = Arc::new(RelayConfig::from_env().context("invalid relay configuration")?);

    let env_filter = format!("h2=off,hyper=off,rustls=off,{}", config.log_level);
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_new(env_filter).context("could not parse log level in configuration")?,
        )
        .event_format(logger::Formatter)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("setting default subscriber failed")?;

    debug!("Logging subsystem enabled");

    // Pipeline definitions come from external setup tooling as a JSON
    // document; the relay only reads them.
    let pipelines = match env::var("WAF_RELAY_PIPELINES_PATH") {
        Ok(path) => {
            let json = fs::read_to_string(&path)
                .with_context(|| format!("could not read pipeline definitions at {path}"))?;
            pipelines_from_json(&json)?
        }
        Err(_) => {
            info!("WAF_RELAY_PIPELINES_PATH not set, starting with no pipeline definitions");
            Vec::new()
        }
    };
    info!("Loaded {} pipeline definition(s)", pipelines.len());

    let store = Arc::new(MemoryEventStore::new());
    let processor = Arc::new(WafLogProcessor::new(store.clone()));

    let probe_client = build_client(config.https_proxy.as_deref(), config.probe_timeout)
        .map_err(|e| anyhow::anyhow!("could not build probe client: {e}"))?;
    // A provider-backed PipelineStateSource plugs in here; the static
    // source assumes every configured pipeline is wired.
    let state = Arc::new(StaticPipelineState::assume_wired(&pipelines));
    let diagnostics = Arc::new(DiagnosticEngine::new(
        state,
        store,
        probe_client,
        config.probe_timeout,
        config.freshness_window,
    ));

    let server = IntakeServer {
        config: Arc::clone(&config),
        processor,
        diagnostics,
        pipelines: Arc::new(pipelines),
    };

    info!("Starting intake server on port {}", config.intake_port);
    tokio::spawn(async move {
        if let Err(e) = server.start().await {
            error!("Error running intake server: {e:?}");
        }
    });

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}
