//! Prometheus Metrics Module
//!
//! Exposes pipeline metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Messages**: raw messages received, events emitted by kind
//! - **Dispatch**: unmatched messages and mapping failures
//! - **Connections**: live connections and reconnects
//! - **Snapshots**: REST snapshot fetch outcomes
//!
//! # Integration
//!
//! With a non-zero port the exporter serves `/metrics` itself; with port 0
//! only the recorder is installed and the handle can render on demand.

use std::net::SocketAddr;
use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::events::EventKind;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Port 0 installs the recorder only and returns its handle; any other
/// port starts the HTTP listener. Subsequent calls are no-ops.
///
/// # Errors
///
/// Returns an error if the recorder or listener cannot be installed.
pub fn init_metrics(port: u16) -> Result<Option<PrometheusHandle>, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let builder = PrometheusBuilder::new();
    let handle = if port == 0 {
        Some(builder.install_recorder()?)
    } else {
        builder
            .with_http_listener(SocketAddr::from(([0, 0, 0, 0], port)))
            .install()?;
        None
    };

    register_metrics();
    let _ = PROMETHEUS_HANDLE.set(handle.clone());
    Ok(handle)
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized or are served by
/// the HTTP listener.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned().flatten()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "feed_normalizer_raw_messages_total",
        "Total raw messages received from exchange feeds"
    );
    describe_counter!(
        "feed_normalizer_events_total",
        "Total normalized events emitted"
    );
    describe_counter!(
        "feed_normalizer_unmatched_messages_total",
        "Total raw messages no mapper accepted"
    );
    describe_counter!(
        "feed_normalizer_mapping_failures_total",
        "Total raw messages a mapper failed to translate"
    );

    describe_gauge!(
        "feed_normalizer_live_connections",
        "Number of connections in the Live state"
    );
    describe_counter!(
        "feed_normalizer_reconnects_total",
        "Total reconnection cycles"
    );

    describe_counter!(
        "feed_normalizer_backpressure_waits_total",
        "Total sends that waited on a full output channel"
    );

    describe_counter!(
        "feed_normalizer_snapshot_fetches_total",
        "Total REST snapshot fetches by outcome"
    );

    describe_histogram!(
        "feed_normalizer_dispatch_seconds",
        "Time to dispatch one raw message through the mappers"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Outcome label for snapshot fetches.
#[derive(Debug, Clone, Copy)]
pub enum FetchOutcome {
    /// Snapshot fetched and forwarded.
    Success,
    /// Fetch failed; symbol skipped this cycle.
    Failure,
}

impl FetchOutcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }
}

/// Record a raw message entering the merged channel.
pub fn record_raw_message(exchange: &str, generated: bool) {
    counter!(
        "feed_normalizer_raw_messages_total",
        "exchange" => exchange.to_string(),
        "generated" => if generated { "true" } else { "false" }
    )
    .increment(1);
}

/// Record normalized events emitted by the dispatcher.
pub fn record_events(exchange: &str, kind: EventKind, count: u64) {
    counter!(
        "feed_normalizer_events_total",
        "exchange" => exchange.to_string(),
        "kind" => kind.as_str()
    )
    .increment(count);
}

/// Record a message no mapper accepted.
pub fn record_unmatched(exchange: &str) {
    counter!(
        "feed_normalizer_unmatched_messages_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a mapping failure.
pub fn record_mapping_failure(exchange: &str, mapper: &'static str) {
    counter!(
        "feed_normalizer_mapping_failures_total",
        "exchange" => exchange.to_string(),
        "mapper" => mapper
    )
    .increment(1);
}

/// Track a connection entering (`+1`) or leaving (`-1`) `Live`.
pub fn adjust_live_connections(exchange: &str, delta: f64) {
    gauge!(
        "feed_normalizer_live_connections",
        "exchange" => exchange.to_string()
    )
    .increment(delta);
}

/// Record a reconnection cycle.
pub fn record_reconnect(exchange: &str) {
    counter!(
        "feed_normalizer_reconnects_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a send that found the output channel full.
pub fn record_backpressure(exchange: &str) {
    counter!(
        "feed_normalizer_backpressure_waits_total",
        "exchange" => exchange.to_string()
    )
    .increment(1);
}

/// Record a snapshot fetch.
pub fn record_snapshot_fetch(exchange: &str, outcome: FetchOutcome) {
    counter!(
        "feed_normalizer_snapshot_fetches_total",
        "exchange" => exchange.to_string(),
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Record dispatch duration for one raw message.
pub fn record_dispatch_duration(exchange: &str, duration: Duration) {
    histogram!(
        "feed_normalizer_dispatch_seconds",
        "exchange" => exchange.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
