// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Cross-region WAF log forwarding and health diagnostics.
//!
//! The log delivery mechanism for WAF traffic decisions can only invoke a
//! receiver co-located with the log source, so when events are processed in
//! a different region a forwarding hop bridges the gap:
//!
//! ```text
//! Source Adapter ──[Forwarder]──> Processor ──> Event Store
//! ```
//!
//! Delivery is at-least-once; ingestion deduplicates on identifiers derived
//! deterministically from record content, so redelivered batches never
//! create duplicate rows. The diagnostic engine inspects every stage of a
//! pipeline out-of-band and reports a per-stage health verdict, surfacing
//! the silent failures the data path cannot report itself.

pub mod config;
pub mod diag;
pub mod error;
pub mod event;
pub mod forwarder;
pub mod http_utils;
pub mod intake;
pub mod logger;
pub mod processor;
pub mod source;
pub mod store;

pub use error::RelayError;
pub use event::{ForwardResult, IngestResult, LogBatch, SecurityEvent};
