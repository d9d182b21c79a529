//! Diagnostic Sinks
//!
//! Adapters for the [`DiagnosticSink`] port.

use crate::application::ports::{Diagnostic, DiagnosticSink};

/// Reports diagnostics as `tracing` events.
///
/// Message-local problems are logged at `warn` (mapping failures, malformed
/// frames, snapshot fetch failures) or `debug` (unmatched messages, which
/// are routine on multiplexed feeds). State changes are logged at `info`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDiagnosticSink;

impl TracingDiagnosticSink {
    /// Create a sink.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DiagnosticSink for TracingDiagnosticSink {
    fn report(&self, diagnostic: Diagnostic) {
        match diagnostic {
            Diagnostic::UnmatchedMessage {
                connection_id,
                preview,
            } => {
                tracing::debug!(connection_id = %connection_id, preview = %preview, "Unmatched message dropped");
            }
            Diagnostic::MappingFailed {
                connection_id,
                mapper,
                error,
            } => {
                tracing::warn!(connection_id = %connection_id, mapper, error = %error, "Mapping failed, message dropped");
            }
            Diagnostic::MalformedFrame {
                connection_id,
                error,
            } => {
                tracing::warn!(connection_id = %connection_id, error = %error, "Malformed frame dropped");
            }
            Diagnostic::SnapshotFetchFailed {
                connection_id,
                symbol,
                error,
            } => {
                tracing::warn!(connection_id = %connection_id, symbol = %symbol, error = %error, "Snapshot fetch failed");
            }
            Diagnostic::StateChanged {
                connection_id,
                from,
                to,
                reconnect_attempts,
            } => {
                tracing::info!(
                    connection_id = %connection_id,
                    from = %from,
                    to = %to,
                    reconnect_attempts,
                    "Connection state changed"
                );
            }
        }
    }
}

/// Discards every diagnostic.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullDiagnosticSink;

impl DiagnosticSink for NullDiagnosticSink {
    fn report(&self, _diagnostic: Diagnostic) {}
}
