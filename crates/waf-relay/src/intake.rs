// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! HTTP intake server: the processor's entry point plus the read-only
//! diagnostic query surface.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::service::service_fn;
use hyper::{body::Incoming, http, Method, Request, Response, StatusCode};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::config::{PipelineConfig, RelayConfig};
use crate::diag::DiagnosticEngine;
use crate::error::RelayError;
use crate::event::LogBatch;
use crate::http_utils::{log_and_create_http_response, verify_request_content_length, HttpResponse};
use crate::processor::LogProcessor;

pub const LOGS_ENDPOINT_PATH: &str = "/api/v1/logs";
pub const DIAGNOSE_ENDPOINT_PREFIX: &str = "/api/v1/diagnose/";
pub const INFO_ENDPOINT_PATH: &str = "/info";

pub struct IntakeServer {
    pub config: Arc<RelayConfig>,
    pub processor: Arc<dyn LogProcessor>,
    pub diagnostics: Arc<DiagnosticEngine>,
    pub pipelines: Arc<Vec<PipelineConfig>>,
}

impl IntakeServer {
    /// Binds the configured port and serves until the process is stopped.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.intake_port));
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        debug!("Intake server started: listening on port {}", self.config.intake_port);
        self.serve(listener).await
    }

    /// Serves on an already-bound listener (tests bind port 0 themselves).
    pub async fn serve(
        &self,
        listener: tokio::net::TcpListener,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let config = Arc::clone(&self.config);
        let processor = Arc::clone(&self.processor);
        let diagnostics = Arc::clone(&self.diagnostics);
        let pipelines = Arc::clone(&self.pipelines);

        let service = service_fn(move |req| {
            // called for each http request
            let config = Arc::clone(&config);
            let processor = Arc::clone(&processor);
            let diagnostics = Arc::clone(&diagnostics);
            let pipelines = Arc::clone(&pipelines);

            IntakeServer::endpoint_handler(config, req, processor, diagnostics, pipelines)
        });

        let server = hyper::server::conn::http1::Builder::new();
        let mut joinset = tokio::task::JoinSet::new();

        loop {
            let conn = tokio::select! {
                con_res = listener.accept() => match con_res {
                    Err(e)
                        if matches!(
                            e.kind(),
                            io::ErrorKind::ConnectionAborted
                                | io::ErrorKind::ConnectionReset
                                | io::ErrorKind::ConnectionRefused
                        ) =>
                    {
                        continue;
                    }
                    Err(e) => {
                        error!("Server error: {e}");
                        return Err(e.into());
                    }
                    Ok((conn, _)) => conn,
                },
                finished = async {
                    match joinset.join_next().await {
                        Some(finished) => finished,
                        None => std::future::pending().await,
                    }
                } => match finished {
                    Err(e) if e.is_panic() => {
                        // Don't kill server on panic - log and continue
                        error!("Connection handler panicked: {:?}", e);
                        continue;
                    },
                    Ok(()) | Err(_) => continue,
                },
            };
            let conn = hyper_util::rt::TokioIo::new(conn);
            let server = server.clone();
            let service = service.clone();
            joinset.spawn(async move {
                if let Err(e) = server.serve_connection(conn, service).await {
                    error!("Connection error: {e}");
                }
            });
        }
    }

    async fn endpoint_handler(
        config: Arc<RelayConfig>,
        req: Request<Incoming>,
        processor: Arc<dyn LogProcessor>,
        diagnostics: Arc<DiagnosticEngine>,
        pipelines: Arc<Vec<PipelineConfig>>,
    ) -> http::Result<HttpResponse> {
        match (req.method(), req.uri().path()) {
            (&Method::PUT | &Method::POST, LOGS_ENDPOINT_PATH) => {
                match Self::logs_handler(config, req, processor).await {
                    Ok(res) => Ok(res),
                    Err(err) => log_and_create_http_response(
                        &format!("Error processing logs: {err}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
            (&Method::GET, path) if path.starts_with(DIAGNOSE_ENDPOINT_PREFIX) => {
                let pipeline_id = path.trim_start_matches(DIAGNOSE_ENDPOINT_PREFIX);
                match Self::diagnose_handler(diagnostics, pipelines, pipeline_id).await {
                    Ok(res) => Ok(res),
                    Err(err) => log_and_create_http_response(
                        &format!("Error diagnosing pipeline: {err}"),
                        StatusCode::INTERNAL_SERVER_ERROR,
                    ),
                }
            }
            (_, INFO_ENDPOINT_PATH) => match Self::info_handler(config.intake_port) {
                Ok(res) => Ok(res),
                Err(err) => log_and_create_http_response(
                    &format!("Info endpoint error: {err}"),
                    StatusCode::INTERNAL_SERVER_ERROR,
                ),
            },
            _ => {
                let mut not_found = Response::new(Full::new(Bytes::new()));
                *not_found.status_mut() = StatusCode::NOT_FOUND;
                Ok(not_found)
            }
        }
    }

    async fn logs_handler(
        config: Arc<RelayConfig>,
        req: Request<Incoming>,
        processor: Arc<dyn LogProcessor>,
    ) -> http::Result<HttpResponse> {
        debug!("Received logs to process");
        let (parts, body) = req.into_parts();

        if let Some(response) = verify_request_content_length(
            &parts.headers,
            config.max_request_content_length,
            "Error processing logs",
        ) {
            return response;
        }

        let body_bytes = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error reading logs request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        let batch: LogBatch = match serde_json::from_slice(&body_bytes) {
            Ok(batch) => batch,
            Err(e) => {
                return log_and_create_http_response(
                    &format!("Error deserializing log batch from request body: {e}"),
                    StatusCode::BAD_REQUEST,
                );
            }
        };

        // Health-check probe: acknowledge without touching the event store.
        if batch.is_probe() {
            return log_and_create_http_response("Probe acknowledged", StatusCode::OK);
        }

        match processor.ingest(&batch).await {
            Ok(result) => {
                let body = json!(result).to_string();
                Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "application/json")
                    .body(Full::new(Bytes::from(body)))
            }
            Err(e) if e.is_retryable() => log_and_create_http_response(
                &format!("Batch not committed, caller may retry: {e}"),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            Err(e) => log_and_create_http_response(
                &format!("Error ingesting batch: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    async fn diagnose_handler(
        diagnostics: Arc<DiagnosticEngine>,
        pipelines: Arc<Vec<PipelineConfig>>,
        pipeline_id: &str,
    ) -> http::Result<HttpResponse> {
        let Some(pipeline) = pipelines.iter().find(|p| p.pipeline_id == pipeline_id) else {
            return log_and_create_http_response(
                &format!("Unknown pipeline: {pipeline_id}"),
                StatusCode::NOT_FOUND,
            );
        };

        match diagnostics.diagnose(pipeline, &CancellationToken::new()).await {
            Ok(report) => {
                let body = json!(report).to_string();
                Response::builder()
                    .status(StatusCode::OK)
                    .header(hyper::header::CONTENT_TYPE, "application/json")
                    .body(Full::new(Bytes::from(body)))
            }
            Err(RelayError::Cancelled) => log_and_create_http_response(
                "Diagnostic run cancelled",
                StatusCode::SERVICE_UNAVAILABLE,
            ),
            Err(e) => log_and_create_http_response(
                &format!("Error diagnosing pipeline {pipeline_id}: {e}"),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        }
    }

    fn info_handler(intake_port: u16) -> http::Result<HttpResponse> {
        let response_json = json!(
            {
                "endpoints": [
                    LOGS_ENDPOINT_PATH,
                    DIAGNOSE_ENDPOINT_PREFIX,
                    INFO_ENDPOINT_PATH
                ],
                "config": {
                    "intake_port": intake_port
                },
                "version": env!("CARGO_PKG_VERSION")
            }
        );
        Response::builder()
            .status(200)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(response_json.to_string())))
    }
}
