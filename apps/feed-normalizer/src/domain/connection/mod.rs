//! Connection Lifecycle Types
//!
//! State carried by one physical connection and the strategy used to
//! open it.
//!
//! # State Machine
//!
//! ```text
//!              ┌────────────┐   open ok   ┌─────────────┐  all acked  ┌──────┐
//!   start ───► │ Connecting │ ──────────► │ Subscribing │ ──────────► │ Live │
//!              └────────────┘             └─────────────┘             └──────┘
//!                 ▲    │ fail                   │ nack / timeout         │ heartbeat timeout,
//!                 │    ▼                        ▼                        │ close, protocol error
//!              ┌──────────────┐ ◄───────────────┴────────────────────────┘
//!              │ Reconnecting │
//!              └──────────────┘      any state ── shutdown ──► Closed
//! ```
//!
//! A session is mutated only by the event loop of the connection that owns
//! it; everybody else observes published copies.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::filter::Filter;

// =============================================================================
// Identity
// =============================================================================

/// Identity of a connection or snapshot producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    /// Generate a new random id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

// =============================================================================
// State
// =============================================================================

/// Lifecycle state of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Establishing the physical transport (including negotiation).
    #[default]
    Connecting,
    /// Subscribe payloads sent, waiting for acknowledgments.
    Subscribing,
    /// All subscriptions acknowledged, data flowing.
    Live,
    /// Transport torn down, waiting for the backoff delay.
    Reconnecting,
    /// Shut down by the caller. Terminal.
    Closed,
}

impl ConnectionState {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Subscribing => "subscribing",
            Self::Live => "live",
            Self::Reconnecting => "reconnecting",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-connection session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSession {
    /// Connection identity.
    pub id: ConnectionId,
    /// Current lifecycle state.
    pub state: ConnectionState,
    /// Channels the exchange acknowledged on the current transport.
    pub acknowledged: BTreeSet<String>,
    /// Reconnects since the connection was last `Live`.
    pub reconnect_attempts: u32,
    /// Last heartbeat (or pong) observed.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Increments every time the connection reaches `Live`.
    pub live_epoch: u64,
}

impl ConnectionSession {
    /// Fresh session in the `Connecting` state.
    #[must_use]
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: ConnectionState::Connecting,
            acknowledged: BTreeSet::new(),
            reconnect_attempts: 0,
            last_heartbeat: None,
            live_epoch: 0,
        }
    }

    /// Record a positive acknowledgment for a channel.
    pub fn acknowledge(&mut self, channel: impl Into<String>) {
        self.acknowledged.insert(channel.into());
    }

    /// Whether every expected channel has been acknowledged.
    #[must_use]
    pub fn all_acknowledged<'a>(&self, expected: impl IntoIterator<Item = &'a String>) -> bool {
        expected.into_iter().all(|c| self.acknowledged.contains(c))
    }

    /// Enter `Subscribing`.
    pub fn begin_subscribing(&mut self) {
        self.state = ConnectionState::Subscribing;
    }

    /// Enter `Live`: the attempt counter resets and a new epoch starts.
    pub fn go_live(&mut self) {
        self.state = ConnectionState::Live;
        self.reconnect_attempts = 0;
        self.live_epoch += 1;
    }

    /// Enter `Reconnecting`: acknowledgments are cleared and the attempt
    /// counter increments by one.
    pub fn begin_reconnecting(&mut self) {
        self.state = ConnectionState::Reconnecting;
        self.acknowledged.clear();
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
    }

    /// Enter `Connecting` (first attempt or after the backoff delay).
    pub fn begin_connecting(&mut self) {
        self.state = ConnectionState::Connecting;
        self.acknowledged.clear();
    }

    /// Enter the terminal `Closed` state.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Record heartbeat liveness.
    pub fn record_heartbeat(&mut self, at: DateTime<Utc>) {
        self.last_heartbeat = Some(at);
    }
}

// =============================================================================
// Strategy
// =============================================================================

/// How a group of filters is served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStrategy {
    /// Exchange pushes everything over one socket.
    SocketPushed,
    /// No incremental protocol; snapshots are polled on a fixed interval.
    Polling {
        /// Symbols to poll.
        symbols: Vec<String>,
        /// Delay between polling cycles.
        interval: Duration,
    },
    /// Socket deltas plus an out-of-band snapshot spliced in after every
    /// successful subscription.
    HybridWithManualSnapshot {
        /// Symbols to fetch snapshots for.
        snapshot_symbols: Vec<String>,
    },
}

impl ConnectionStrategy {
    /// Label value.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::SocketPushed => "socket",
            Self::Polling { .. } => "polling",
            Self::HybridWithManualSnapshot { .. } => "hybrid",
        }
    }
}

/// One connection to open, and the filters it serves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionPlan {
    /// Connection strategy.
    pub strategy: ConnectionStrategy,
    /// Live-socket filters subscribed on this connection (empty for polling).
    pub filters: Vec<Filter>,
}

impl ConnectionPlan {
    /// Socket-pushed plan.
    #[must_use]
    pub const fn socket(filters: Vec<Filter>) -> Self {
        Self {
            strategy: ConnectionStrategy::SocketPushed,
            filters,
        }
    }

    /// Polling plan.
    #[must_use]
    pub const fn polling(symbols: Vec<String>, interval: Duration) -> Self {
        Self {
            strategy: ConnectionStrategy::Polling { symbols, interval },
            filters: Vec::new(),
        }
    }

    /// Hybrid plan.
    #[must_use]
    pub const fn hybrid(filters: Vec<Filter>, snapshot_symbols: Vec<String>) -> Self {
        Self {
            strategy: ConnectionStrategy::HybridWithManualSnapshot { snapshot_symbols },
            filters,
        }
    }
}
