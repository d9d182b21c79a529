//! Message Dispatcher
//!
//! Routes each raw message to the first mapper (in declared priority order)
//! whose `can_handle` predicate accepts it.
//!
//! Predicates are structural heuristics and may overlap, so the order of
//! the mapper list is load-bearing. Unmatched messages and mapping failures
//! are reported to the diagnostic sink and dropped; neither is fatal.

use std::sync::Arc;
use std::time::Instant;

use crate::application::ports::{Diagnostic, DiagnosticSink, Mapper};
use crate::domain::events::{EventKind, NormalizedEvent};
use crate::domain::message::RawMessage;
use crate::infrastructure::metrics;

/// Longest payload preview attached to an unmatched-message diagnostic.
const PREVIEW_LEN: usize = 256;

/// Ordered (predicate, translator) dispatch over a mapper list.
pub struct MessageDispatcher {
    exchange: String,
    mappers: Vec<Arc<dyn Mapper>>,
    diagnostics: Arc<dyn DiagnosticSink>,
}

impl MessageDispatcher {
    /// Create a dispatcher. `mappers` are evaluated in the given order.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        mappers: Vec<Arc<dyn Mapper>>,
        diagnostics: Arc<dyn DiagnosticSink>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            mappers,
            diagnostics,
        }
    }

    /// Number of registered mappers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    /// Whether no mapper is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// Dispatch one raw message, returning the produced events in order.
    pub fn dispatch(&self, message: &RawMessage) -> Vec<NormalizedEvent> {
        let started = Instant::now();
        metrics::record_raw_message(&self.exchange, message.generated);

        let Some(mapper) = self.mappers.iter().find(|m| m.can_handle(message)) else {
            metrics::record_unmatched(&self.exchange);
            self.diagnostics.report(Diagnostic::UnmatchedMessage {
                connection_id: message.connection_id,
                preview: preview(&message.payload),
            });
            return Vec::new();
        };

        let events: Vec<NormalizedEvent> = match mapper.map(message, message.local_timestamp) {
            Ok(events) => events.collect(),
            Err(e) => {
                metrics::record_mapping_failure(&self.exchange, mapper.name());
                self.diagnostics.report(Diagnostic::MappingFailed {
                    connection_id: message.connection_id,
                    mapper: mapper.name(),
                    error: e.to_string(),
                });
                return Vec::new();
            }
        };

        let trades = events
            .iter()
            .filter(|e| e.kind() == EventKind::Trade)
            .count();
        let book_changes = events.len() - trades;
        if trades > 0 {
            metrics::record_events(&self.exchange, EventKind::Trade, count(trades));
        }
        if book_changes > 0 {
            metrics::record_events(&self.exchange, EventKind::BookChange, count(book_changes));
        }
        metrics::record_dispatch_duration(&self.exchange, started.elapsed());

        events
    }
}

fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

fn preview(payload: &serde_json::Value) -> String {
    let mut text = payload.to_string();
    if text.len() > PREVIEW_LEN {
        let mut cut = PREVIEW_LEN;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}
