//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters and exchange plugins must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `HttpClient`: `GET url with timeout -> JSON`
//! - `WebSocketConnector` / `WebSocketConnection`: frame transport
//! - `DiagnosticSink`: message-local problems and state changes
//!
//! ## Plugin Ports
//!
//! - `Mapper`: wire message to canonical events
//! - `ExchangeProtocol`: subscribe payloads, control frame classification,
//!   endpoint negotiation
//! - `SnapshotSource`: out-of-band REST snapshot endpoint
//! - `ExchangeFeed`: bundles the above for one exchange

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::connection::{ConnectionId, ConnectionPlan, ConnectionState};
use crate::domain::events::NormalizedEvent;
use crate::domain::filter::{Filter, FilterError};
use crate::domain::message::RawMessage;

// =============================================================================
// Mapper
// =============================================================================

/// Finite, single-pass sequence of events produced by one `map` call.
pub type MappedEvents = Box<dyn Iterator<Item = NormalizedEvent> + Send>;

/// Errors that make a single message unmappable.
///
/// These are fatal to the message and never to the connection.
#[derive(Debug, thiserror::Error)]
pub enum MapperError {
    /// Nested payload could not be decoded or decompressed.
    #[error("payload decompression failed: {0}")]
    Decompression(String),

    /// Payload is not valid JSON.
    #[error("payload JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Payload is JSON but structurally invalid for this mapper.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Exchange- and message-kind-specific translator.
pub trait Mapper: Send + Sync {
    /// Short name used in diagnostics and metrics labels.
    fn name(&self) -> &'static str;

    /// Cheap structural predicate evaluated for every raw message.
    fn can_handle(&self, message: &RawMessage) -> bool;

    /// Subscriptions this mapper needs upstream. Symbol casing is applied
    /// here.
    fn filters(&self, symbols: &[String]) -> Vec<Filter>;

    /// Translate one message into canonical events.
    ///
    /// Missing optional fields degrade gracefully; only structurally
    /// invalid payloads fail.
    ///
    /// # Errors
    ///
    /// Returns [`MapperError`] when the payload cannot be decoded.
    fn map(
        &self,
        message: &RawMessage,
        local_timestamp: DateTime<Utc>,
    ) -> Result<MappedEvents, MapperError>;
}

// =============================================================================
// HTTP
// =============================================================================

/// HTTP client errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HttpError {
    /// The request did not complete within its timeout.
    #[error("request to {0} timed out")]
    Timeout(String),

    /// Non-success status code.
    #[error("request to {url} failed with status {status}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// Transport-level failure (DNS, TCP, TLS).
    #[error("request failed: {0}")]
    Request(String),

    /// Body was not valid JSON.
    #[error("response decode failed: {0}")]
    Decode(String),
}

/// HTTP capability used for negotiation and REST snapshots.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// `GET` a URL and parse the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] on timeout, non-success status or bad JSON.
    async fn get_json(&self, url: &str, timeout: Duration)
    -> Result<serde_json::Value, HttpError>;
}

// =============================================================================
// WebSocket
// =============================================================================

/// A WebSocket frame, independent of the underlying library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// UTF-8 text frame.
    Text(String),
    /// Binary frame.
    Binary(Vec<u8>),
    /// Ping control frame.
    Ping(Vec<u8>),
    /// Pong control frame.
    Pong(Vec<u8>),
    /// Close control frame.
    Close,
}

/// Transport errors. All of them are transport-fatal and lead to a
/// reconnect.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Socket could not be opened.
    #[error("connect failed: {0}")]
    Connect(String),

    /// Pre-connection negotiation failed.
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// Error while sending or receiving frames.
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    /// Peer closed the connection.
    #[error("connection closed")]
    Closed,
}

/// Opens WebSocket connections.
#[async_trait]
pub trait WebSocketConnector: Send + Sync {
    /// Open a connection to `url`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Connect`] when the socket cannot be opened.
    async fn connect(&self, url: &str) -> Result<Box<dyn WebSocketConnection>, TransportError>;
}

/// One open WebSocket connection.
///
/// `recv` must be cancel-safe: it is raced against timers in `select!`.
#[async_trait]
pub trait WebSocketConnection: Send {
    /// Send a frame.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError`] when the socket is broken.
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError>;

    /// Next inbound frame; `None` once the stream ended.
    async fn recv(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Close the connection, ignoring errors.
    async fn close(&mut self);
}

// =============================================================================
// Exchange Protocol
// =============================================================================

/// One subscribe invocation sent after the socket opens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeRequest {
    /// Correlation id echoed by the exchange in its acknowledgment.
    pub id: String,
    /// Text payload to send.
    pub payload: String,
    /// Exchange channels covered by this request.
    pub channels: Vec<String>,
}

/// Classification of an inbound text frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFrame {
    /// Positive acknowledgment of a subscribe request.
    Acknowledged {
        /// Correlation id of the acknowledged request.
        request_id: String,
    },
    /// Negative acknowledgment of a subscribe request.
    Rejected {
        /// Correlation id of the rejected request.
        request_id: String,
        /// Exchange supplied reason.
        reason: String,
    },
    /// Protocol-level error response.
    Error(String),
    /// Heartbeat / keep-alive frame.
    Heartbeat,
    /// Market data, forwarded to the dispatcher.
    Data,
}

/// Exchange-specific connection protocol.
#[async_trait]
pub trait ExchangeProtocol: Send + Sync {
    /// Exchange identifier.
    fn exchange(&self) -> &str;

    /// Resolve the socket URL, performing any token negotiation first.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Negotiation`] when negotiation fails.
    async fn resolve_endpoint(
        &self,
        http: &dyn HttpClient,
        timeout: Duration,
    ) -> Result<String, TransportError>;

    /// Build subscribe payloads from live-socket filters.
    ///
    /// Runs synchronously before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when a filter lacks symbols or names an
    /// unknown channel.
    fn subscribe_requests(&self, filters: &[Filter]) -> Result<Vec<SubscribeRequest>, FilterError>;

    /// Classify an inbound JSON payload.
    fn classify(&self, payload: &serde_json::Value) -> ControlFrame;

    /// Split one inbound payload into messages that are classified and
    /// dispatched independently, in order.
    ///
    /// Protocols that batch several updates into one frame unbatch them
    /// here; the default keeps the payload whole.
    fn split(&self, payload: serde_json::Value) -> Vec<serde_json::Value> {
        vec![payload]
    }
}

/// Out-of-band REST snapshot endpoint.
pub trait SnapshotSource: Send + Sync {
    /// Snapshot URL for a symbol.
    fn snapshot_url(&self, symbol: &str) -> String;

    /// Wrap a fetched response into the wire message the snapshot mapper
    /// recognises.
    fn snapshot_message(&self, symbol: &str, response: serde_json::Value) -> serde_json::Value;
}

/// Exchange plugin.
pub trait ExchangeFeed: Send + Sync {
    /// Exchange identifier.
    fn exchange(&self) -> &str;

    /// Mappers producing trades, in priority order.
    fn trade_mappers(&self) -> Vec<Arc<dyn Mapper>>;

    /// Mappers producing book changes, in priority order.
    fn book_change_mappers(&self) -> Vec<Arc<dyn Mapper>>;

    /// Socket protocol.
    fn protocol(&self) -> Arc<dyn ExchangeProtocol>;

    /// REST snapshot source, when the exchange needs manual snapshots.
    fn snapshot_source(&self) -> Option<Arc<dyn SnapshotSource>>;

    /// Group merged filters into connections.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] for unknown channels or when nothing is left
    /// to connect.
    fn connection_plans(
        &self,
        filters: &[Filter],
        symbols: &[String],
    ) -> Result<Vec<ConnectionPlan>, FilterError>;
}

// =============================================================================
// Diagnostics
// =============================================================================

/// Diagnostic reported by the pipeline. Never affects control flow.
#[derive(Debug, Clone, PartialEq)]
pub enum Diagnostic {
    /// No mapper accepted the message.
    UnmatchedMessage {
        /// Producer.
        connection_id: ConnectionId,
        /// Payload preview.
        preview: String,
    },
    /// A mapper accepted the message but failed to map it.
    MappingFailed {
        /// Producer.
        connection_id: ConnectionId,
        /// Mapper name.
        mapper: &'static str,
        /// Error text.
        error: String,
    },
    /// A frame could not be parsed as JSON.
    MalformedFrame {
        /// Producer.
        connection_id: ConnectionId,
        /// Error text.
        error: String,
    },
    /// A snapshot fetch failed; the symbol is skipped this cycle.
    SnapshotFetchFailed {
        /// Producer.
        connection_id: ConnectionId,
        /// Symbol.
        symbol: String,
        /// Error text.
        error: String,
    },
    /// A connection changed lifecycle state.
    StateChanged {
        /// Connection.
        connection_id: ConnectionId,
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
        /// Reconnect attempts after the change.
        reconnect_attempts: u32,
    },
}

/// Injectable diagnostic sink.
pub trait DiagnosticSink: Send + Sync {
    /// Report a diagnostic.
    fn report(&self, diagnostic: Diagnostic);
}
