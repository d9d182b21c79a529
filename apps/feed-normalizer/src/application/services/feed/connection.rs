//! Transport Connection
//!
//! Owns exactly one physical WebSocket connection to one exchange endpoint
//! and drives it through the lifecycle
//! `Connecting → Subscribing → Live → Reconnecting → Connecting …`,
//! ending in `Closed` only when the caller shuts the feed down.
//!
//! # Protocol
//!
//! 1. **Connecting**: resolve the endpoint (token negotiation, bounded by
//!    the negotiation timeout) and open the socket.
//! 2. **Subscribing**: send every subscribe request and wait for all of
//!    them to be acknowledged. A negative acknowledgment, a protocol error
//!    or the subscribe timeout tears the whole connection down.
//! 3. **Live**: data frames are forwarded in arrival order. A heartbeat
//!    watchdog force-closes the connection after a silent period.
//! 4. **Reconnecting**: acknowledgments are cleared, the attempt counter
//!    increments and the backoff delay elapses before the next attempt.
//!
//! # Snapshot Splicing
//!
//! When a snapshot gate is attached, data frames are held back from the
//! moment subscriptions are sent until the snapshot injector reports that
//! the snapshots for the current live epoch were pushed. The held frames
//! are then released in arrival order, so the merged sequence carries
//! snapshot-then-deltas. The hold buffer is bounded; overflowing it is
//! transport-fatal.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatState};
use super::reconnect::{ReconnectConfig, ReconnectPolicy};
use super::FeedRuntime;
use crate::application::ports::{
    ControlFrame, Diagnostic, DiagnosticSink, ExchangeProtocol, Frame, HttpClient,
    SubscribeRequest, TransportError, WebSocketConnection, WebSocketConnector,
};
use crate::domain::connection::{ConnectionId, ConnectionSession, ConnectionState};
use crate::domain::filter::{Filter, FilterError};
use crate::domain::message::RawMessage;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::metrics;

// =============================================================================
// Error Type
// =============================================================================

/// Reasons a connection cycle ended.
///
/// Everything except [`ConnectionError::Cancelled`] and
/// [`ConnectionError::OutputClosed`] leads to a reconnect.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Transport failure (connect, negotiation, socket error, close).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The exchange rejected a subscribe request.
    #[error("subscription {request_id} rejected: {reason}")]
    SubscriptionRejected {
        /// Correlation id of the rejected request.
        request_id: String,
        /// Exchange supplied reason.
        reason: String,
    },

    /// Not every subscribe request was acknowledged in time.
    #[error("subscriptions not acknowledged within {0:?}")]
    SubscribeTimeout(Duration),

    /// The exchange sent a protocol error.
    #[error("exchange error: {0}")]
    Protocol(String),

    /// Nothing was received within the heartbeat timeout.
    #[error("heartbeat timeout")]
    HeartbeatTimeout,

    /// The snapshot hold buffer overflowed.
    #[error("snapshot hold buffer exceeded {0} messages")]
    SpliceOverflow(usize),

    /// The merged output channel was dropped.
    #[error("output channel closed")]
    OutputClosed,

    /// Shutdown was requested.
    #[error("cancelled")]
    Cancelled,
}

impl ConnectionError {
    /// Whether this error ends the connection for good.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Cancelled | Self::OutputClosed)
    }
}

// =============================================================================
// Transport Connection
// =============================================================================

/// One physical connection and its lifecycle state machine.
pub struct TransportConnection {
    id: ConnectionId,
    protocol: Arc<dyn ExchangeProtocol>,
    connector: Arc<dyn WebSocketConnector>,
    http: Arc<dyn HttpClient>,
    diagnostics: Arc<dyn DiagnosticSink>,
    settings: FeedSettings,
    requests: Vec<SubscribeRequest>,
    output: mpsc::Sender<RawMessage>,
    session_tx: watch::Sender<ConnectionSession>,
    snapshot_gate: Option<watch::Receiver<u64>>,
    cancel: CancellationToken,
}

impl TransportConnection {
    /// Create a connection for a set of live-socket filters.
    ///
    /// Subscribe payloads are built here, before any network I/O.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when a filter has no symbols or names a
    /// channel the protocol does not know.
    pub fn new(
        protocol: Arc<dyn ExchangeProtocol>,
        filters: &[Filter],
        runtime: &FeedRuntime,
        output: mpsc::Sender<RawMessage>,
        cancel: CancellationToken,
    ) -> Result<Self, FilterError> {
        let requests = protocol.subscribe_requests(filters)?;
        let id = ConnectionId::new();
        let (session_tx, _) = watch::channel(ConnectionSession::new(id));

        Ok(Self {
            id,
            protocol,
            connector: Arc::clone(&runtime.connector),
            http: Arc::clone(&runtime.http),
            diagnostics: Arc::clone(&runtime.diagnostics),
            settings: runtime.settings.clone(),
            requests,
            output,
            session_tx,
            snapshot_gate: None,
            cancel,
        })
    }

    /// Connection identity.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Subscribe to published session updates.
    #[must_use]
    pub fn session(&self) -> watch::Receiver<ConnectionSession> {
        self.session_tx.subscribe()
    }

    /// Hold data frames until `done` reaches the current live epoch.
    pub fn attach_snapshot_gate(&mut self, done: watch::Receiver<u64>) {
        self.snapshot_gate = Some(done);
    }

    /// Run the connection until cancelled or the output channel closes.
    pub async fn run(self) {
        let mut policy =
            ReconnectPolicy::new(ReconnectConfig::from_websocket_settings(&self.settings.websocket));

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.transition(ConnectionSession::begin_connecting);

            match self.connect_and_run(&mut policy).await {
                Ok(()) => break,
                Err(e) if e.is_terminal() => {
                    tracing::debug!(connection_id = %self.id, reason = %e, "Connection stopping");
                    break;
                }
                Err(e) => {
                    tracing::warn!(
                        connection_id = %self.id,
                        exchange = self.protocol.exchange(),
                        error = %e,
                        "Connection error"
                    );
                    self.transition(ConnectionSession::begin_reconnecting);
                    metrics::record_reconnect(self.protocol.exchange());

                    let delay = policy.next_delay();
                    tracing::info!(
                        connection_id = %self.id,
                        attempt = policy.attempt_count(),
                        delay_ms = delay.as_millis(),
                        "Reconnecting"
                    );

                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.transition(ConnectionSession::close);
        tracing::info!(connection_id = %self.id, "Connection closed");
    }

    /// Connect, subscribe and pump frames until an error or cancellation.
    async fn connect_and_run(&self, policy: &mut ReconnectPolicy) -> Result<(), ConnectionError> {
        let negotiate_timeout = self.settings.websocket.negotiate_timeout;
        let url = tokio::select! {
            () = self.cancel.cancelled() => return Err(ConnectionError::Cancelled),
            resolved = tokio::time::timeout(
                negotiate_timeout,
                self.protocol.resolve_endpoint(self.http.as_ref(), negotiate_timeout),
            ) => resolved.map_err(|_| {
                TransportError::Negotiation(format!("timed out after {negotiate_timeout:?}"))
            })??,
        };

        tracing::info!(connection_id = %self.id, url = %url, "Connecting");
        let mut socket = tokio::select! {
            () = self.cancel.cancelled() => return Err(ConnectionError::Cancelled),
            socket = self.connector.connect(&url) => socket?,
        };

        let result = self.pump(socket.as_mut(), policy).await;
        socket.close().await;
        result
    }

    async fn pump(
        &self,
        socket: &mut dyn WebSocketConnection,
        policy: &mut ReconnectPolicy,
    ) -> Result<(), ConnectionError> {
        self.transition(ConnectionSession::begin_subscribing);

        let mut pending: HashMap<String, &SubscribeRequest> = HashMap::new();
        for request in &self.requests {
            tracing::debug!(
                connection_id = %self.id,
                request_id = %request.id,
                channels = ?request.channels,
                "Sending subscribe request"
            );
            socket.send(Frame::Text(request.payload.clone())).await?;
            pending.insert(request.id.clone(), request);
        }

        let mut live = false;
        let mut epoch = 0;
        if pending.is_empty() {
            epoch = self.go_live(policy);
            live = true;
        }

        let mut gate = self.snapshot_gate.clone();
        let mut gated = gate.is_some();
        let mut held: VecDeque<RawMessage> = VecDeque::new();

        let subscribe_timeout = self.settings.websocket.subscribe_timeout;
        let subscribe_deadline = tokio::time::sleep(subscribe_timeout);
        tokio::pin!(subscribe_deadline);

        let heartbeat_state = Arc::new(HeartbeatState::new());
        let mut heartbeat_running = true;
        let (heartbeat_tx, mut heartbeat_rx) = mpsc::channel::<HeartbeatEvent>(10);
        let heartbeat_cancel = self.cancel.child_token();
        let _heartbeat_guard = heartbeat_cancel.clone().drop_guard();
        tokio::spawn(
            HeartbeatManager::new(
                HeartbeatConfig::from_websocket_settings(&self.settings.websocket),
                Arc::clone(&heartbeat_state),
                heartbeat_tx,
                heartbeat_cancel,
            )
            .run(),
        );

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return Err(ConnectionError::Cancelled),
                () = &mut subscribe_deadline, if !live => {
                    return Err(ConnectionError::SubscribeTimeout(subscribe_timeout));
                }
                event = heartbeat_rx.recv(), if heartbeat_running => match event {
                    Some(HeartbeatEvent::SendPing) => socket.send(Frame::Ping(Vec::new())).await?,
                    Some(HeartbeatEvent::Timeout) => return Err(ConnectionError::HeartbeatTimeout),
                    None => {
                        tracing::debug!(connection_id = %self.id, "Heartbeat channel closed");
                        heartbeat_running = false;
                    }
                },
                opened = wait_for_snapshots(gate.as_mut(), epoch), if gated && live => {
                    if !opened {
                        tracing::debug!(connection_id = %self.id, "Snapshot injector gone, releasing held frames");
                    }
                    gated = false;
                    while let Some(message) = held.pop_front() {
                        self.forward(message, &heartbeat_state).await?;
                    }
                }
                frame = socket.recv() => {
                    let payload = match frame {
                        Some(Ok(Frame::Text(text))) => {
                            heartbeat_state.record_activity();
                            serde_json::from_str::<serde_json::Value>(&text)
                        }
                        Some(Ok(Frame::Binary(bytes))) => {
                            heartbeat_state.record_activity();
                            serde_json::from_slice::<serde_json::Value>(&bytes)
                        }
                        Some(Ok(Frame::Ping(data))) => {
                            heartbeat_state.record_activity();
                            socket.send(Frame::Pong(data)).await?;
                            continue;
                        }
                        Some(Ok(Frame::Pong(_))) => {
                            heartbeat_state.record_activity();
                            self.record_heartbeat();
                            continue;
                        }
                        Some(Ok(Frame::Close)) => {
                            tracing::info!(connection_id = %self.id, "Server sent close frame");
                            return Err(TransportError::Closed.into());
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => {
                            tracing::info!(connection_id = %self.id, "WebSocket stream ended");
                            return Err(TransportError::Closed.into());
                        }
                    };

                    let payload = match payload {
                        Ok(payload) => payload,
                        Err(e) => {
                            self.diagnostics.report(Diagnostic::MalformedFrame {
                                connection_id: self.id,
                                error: e.to_string(),
                            });
                            continue;
                        }
                    };

                    for payload in self.protocol.split(payload) {
                        match self.protocol.classify(&payload) {
                            ControlFrame::Data => {
                                let message = RawMessage::received(self.id, payload);
                                if gated {
                                    if held.len() >= self.settings.max_buffered_messages {
                                        return Err(ConnectionError::SpliceOverflow(
                                            self.settings.max_buffered_messages,
                                        ));
                                    }
                                    held.push_back(message);
                                } else {
                                    self.forward(message, &heartbeat_state).await?;
                                }
                            }
                            ControlFrame::Heartbeat => self.record_heartbeat(),
                            ControlFrame::Acknowledged { request_id } => {
                                if let Some(request) = pending.remove(&request_id) {
                                    tracing::debug!(
                                        connection_id = %self.id,
                                        request_id = %request_id,
                                        "Subscription acknowledged"
                                    );
                                    self.session_tx.send_modify(|session| {
                                        for channel in &request.channels {
                                            session.acknowledge(channel.clone());
                                        }
                                    });
                                }
                                if !live && pending.is_empty() {
                                    epoch = self.go_live(policy);
                                    live = true;
                                }
                            }
                            ControlFrame::Rejected { request_id, reason } => {
                                return Err(ConnectionError::SubscriptionRejected { request_id, reason });
                            }
                            ControlFrame::Error(message) => {
                                return Err(ConnectionError::Protocol(message));
                            }
                        }
                    }
                }
            }
        }
    }

    /// Forward one message to the merged channel, blocking while it is
    /// full.
    ///
    /// The socket is not read while the send waits, so liveness checks are
    /// suspended until the consumer catches up.
    async fn forward(
        &self,
        message: RawMessage,
        heartbeat: &HeartbeatState,
    ) -> Result<(), ConnectionError> {
        let message = match self.output.try_send(message) {
            Ok(()) => return Ok(()),
            Err(mpsc::error::TrySendError::Closed(_)) => return Err(ConnectionError::OutputClosed),
            Err(mpsc::error::TrySendError::Full(message)) => message,
        };

        metrics::record_backpressure(self.protocol.exchange());
        let _paused = heartbeat.pause();
        tokio::select! {
            () = self.cancel.cancelled() => Err(ConnectionError::Cancelled),
            sent = self.output.send(message) => sent.map_err(|_| ConnectionError::OutputClosed),
        }
    }

    fn go_live(&self, policy: &mut ReconnectPolicy) -> u64 {
        policy.reset();
        self.transition(ConnectionSession::go_live);
        let epoch = self.session_tx.borrow().live_epoch;
        tracing::info!(
            connection_id = %self.id,
            exchange = self.protocol.exchange(),
            epoch,
            "Connection live"
        );
        epoch
    }

    fn record_heartbeat(&self) {
        let now = Utc::now();
        self.session_tx.send_if_modified(|session| {
            session.record_heartbeat(now);
            false
        });
    }

    /// Apply a lifecycle change, publish it and report state transitions.
    fn transition(&self, change: impl FnOnce(&mut ConnectionSession)) {
        let mut from = ConnectionState::Closed;
        let mut to = ConnectionState::Closed;
        let mut attempts = 0;
        self.session_tx.send_modify(|session| {
            from = session.state;
            change(session);
            to = session.state;
            attempts = session.reconnect_attempts;
        });

        if from == to {
            return;
        }

        let exchange = self.protocol.exchange();
        if to == ConnectionState::Live {
            metrics::adjust_live_connections(exchange, 1.0);
        } else if from == ConnectionState::Live {
            metrics::adjust_live_connections(exchange, -1.0);
        }

        self.diagnostics.report(Diagnostic::StateChanged {
            connection_id: self.id,
            from,
            to,
            reconnect_attempts: attempts,
        });
    }
}

/// Resolves once the injector has pushed the snapshots for `epoch`.
///
/// Returns `false` if the injector is gone.
async fn wait_for_snapshots(gate: Option<&mut watch::Receiver<u64>>, epoch: u64) -> bool {
    match gate {
        Some(done) => done.wait_for(|served| *served >= epoch).await.is_ok(),
        None => std::future::pending().await,
    }
}
