//! Structured telemetry events.
//!
//! Sinks are best effort: `record` returns nothing, so a sink has no way to
//! fail or alter a query. Events are emitted after the outcome is known.

use crate::error::ErrorKind;
use crate::types::IdentifierKind;
use std::time::Duration;

/// Outcome of a single fetch attempt sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Final HTTP status received.
    Status(u16),
    /// No usable response; the error kind that ended the fetch.
    Failed(ErrorKind),
}

/// Cache tier that answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Shared,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    /// One call to the fetcher, including its retries.
    Fetch {
        registry: String,
        host: String,
        latency: Duration,
        attempts: u32,
        outcome: FetchOutcome,
    },
    /// Cache lookup result.
    Cache {
        key: String,
        hit: Option<CacheTier>,
    },
    /// The shared cache tier failed and the query fell back to local only.
    CacheDegraded { operation: &'static str, message: String },
    /// Bootstrap table load or refresh.
    Bootstrap {
        success: bool,
        latency: Duration,
        services: usize,
    },
    /// Completed query as seen by the caller.
    Query {
        kind: IdentifierKind,
        registry: Option<String>,
        cached: bool,
        latency: Duration,
        error: Option<ErrorKind>,
    },
}

/// Receiver of telemetry events.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Default sink: forwards every event to `tracing` at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        match event {
            TelemetryEvent::Fetch {
                registry,
                host,
                latency,
                attempts,
                outcome,
            } => {
                tracing::debug!(
                    target: "rdap::telemetry",
                    registry = %registry,
                    host = %host,
                    latency_ms = latency.as_millis() as u64,
                    attempts,
                    outcome = ?outcome,
                    "fetch"
                );
            }
            TelemetryEvent::Cache { key, hit } => {
                tracing::debug!(target: "rdap::telemetry", key = %key, hit = ?hit, "cache");
            }
            TelemetryEvent::CacheDegraded { operation, message } => {
                tracing::warn!(
                    target: "rdap::telemetry",
                    operation,
                    error = %message,
                    "shared cache degraded"
                );
            }
            TelemetryEvent::Bootstrap {
                success,
                latency,
                services,
            } => {
                tracing::info!(
                    target: "rdap::telemetry",
                    success,
                    latency_ms = latency.as_millis() as u64,
                    services,
                    "bootstrap"
                );
            }
            TelemetryEvent::Query {
                kind,
                registry,
                cached,
                latency,
                error,
            } => {
                tracing::debug!(
                    target: "rdap::telemetry",
                    kind = %kind,
                    registry = ?registry,
                    cached,
                    latency_ms = latency.as_millis() as u64,
                    error = ?error,
                    "query"
                );
            }
        }
    }
}

/// Sink that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTelemetry;

impl TelemetrySink for NoopTelemetry {
    fn record(&self, _event: &TelemetryEvent) {}
}
