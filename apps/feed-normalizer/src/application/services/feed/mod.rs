//! Feed Connections
//!
//! Connection lifecycle, heartbeat supervision, reconnect backoff, snapshot
//! injection and the multi-connection fan-in.

mod connection;
mod heartbeat;
mod multi;
mod reconnect;
mod snapshot;

use std::sync::Arc;

pub use connection::{ConnectionError, TransportConnection};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatEvent, HeartbeatManager, HeartbeatPause, HeartbeatState,
};
pub use multi::MultiConnectionFeed;
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use snapshot::{InjectOutcome, SnapshotInjector};

use crate::application::ports::{DiagnosticSink, HttpClient, WebSocketConnector};
use crate::infrastructure::config::FeedSettings;

/// Adapters and tunables shared by every task of a feed.
#[derive(Clone)]
pub struct FeedRuntime {
    /// Opens WebSocket connections.
    pub connector: Arc<dyn WebSocketConnector>,
    /// Performs REST requests (negotiation, snapshots).
    pub http: Arc<dyn HttpClient>,
    /// Receives dropped-message and lifecycle diagnostics.
    pub diagnostics: Arc<dyn DiagnosticSink>,
    /// Timeouts, backoff and buffer limits.
    pub settings: FeedSettings,
}

impl std::fmt::Debug for FeedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedRuntime")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
