//! Raw Wire Messages
//!
//! A [`RawMessage`] is one wire payload plus reception metadata. It is
//! produced by exactly one connection or snapshot producer and consumed
//! exactly once by the dispatcher.

use chrono::{DateTime, Utc};

use crate::domain::connection::ConnectionId;

/// Opaque wire payload with reception metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMessage {
    /// Parsed JSON payload.
    pub payload: serde_json::Value,
    /// Local wall-clock arrival (or fetch) time.
    pub local_timestamp: DateTime<Utc>,
    /// Producer identity.
    pub connection_id: ConnectionId,
    /// `true` when synthesized internally (polled or manual snapshots).
    pub generated: bool,
}

impl RawMessage {
    /// Message received from an exchange, stamped now.
    #[must_use]
    pub fn received(connection_id: ConnectionId, payload: serde_json::Value) -> Self {
        Self {
            payload,
            local_timestamp: Utc::now(),
            connection_id,
            generated: false,
        }
    }

    /// Internally generated message, stamped now.
    #[must_use]
    pub fn generated(connection_id: ConnectionId, payload: serde_json::Value) -> Self {
        Self {
            payload,
            local_timestamp: Utc::now(),
            connection_id,
            generated: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_flag() {
        let id = ConnectionId::new();
        assert!(!RawMessage::received(id, serde_json::json!({})).generated);
        assert!(RawMessage::generated(id, serde_json::json!({})).generated);
    }
}
