//! Heartbeat Manager
//!
//! Verifies socket liveness independently of the read loop. Every inbound
//! frame counts as activity. On each check a socket that has been quiet for
//! at least one interval gets a ping; once nothing has arrived for the
//! timeout the connection is declared dead. Checks are suspended while the
//! read loop is paused on a full output channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::infrastructure::config::WebSocketSettings;

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Interval between liveness checks (and pings).
    pub check_interval: Duration,
    /// Silence tolerated before the connection is considered dead.
    pub timeout: Duration,
}

impl HeartbeatConfig {
    /// Create a new configuration with custom values.
    #[must_use]
    pub const fn new(check_interval: Duration, timeout: Duration) -> Self {
        Self {
            check_interval,
            timeout,
        }
    }

    /// Create configuration from `WebSocketSettings`.
    #[must_use]
    pub const fn from_websocket_settings(settings: &WebSocketSettings) -> Self {
        Self {
            check_interval: settings.heartbeat_interval,
            timeout: settings.heartbeat_timeout,
        }
    }
}

/// Events emitted by the heartbeat manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeartbeatEvent {
    /// The socket is quiet; send a ping frame.
    SendPing,
    /// Nothing was received within the timeout.
    Timeout,
}

/// Last-activity timestamp shared between the manager and the read loop.
#[derive(Debug)]
pub struct HeartbeatState {
    last_activity: RwLock<Instant>,
    pauses: AtomicUsize,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_activity: RwLock::new(Instant::now()),
            pauses: AtomicUsize::new(0),
        }
    }

    /// Record inbound activity.
    pub fn record_activity(&self) {
        *self.last_activity.write() = Instant::now();
    }

    /// Time since the last inbound activity.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_activity.read().elapsed()
    }

    /// Suspend liveness checks until the returned guard is dropped.
    ///
    /// Dropping the guard counts as activity, so the idle clock restarts
    /// when reading resumes.
    #[must_use]
    pub fn pause(&self) -> HeartbeatPause<'_> {
        self.pauses.fetch_add(1, Ordering::AcqRel);
        HeartbeatPause { state: self }
    }

    /// Whether any pause guard is alive.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.pauses.load(Ordering::Acquire) > 0
    }
}

/// Guard returned by [`HeartbeatState::pause`].
#[derive(Debug)]
pub struct HeartbeatPause<'a> {
    state: &'a HeartbeatState,
}

impl Drop for HeartbeatPause<'_> {
    fn drop(&mut self) {
        self.state.record_activity();
        self.state.pauses.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Heartbeat manager that monitors connection health.
pub struct HeartbeatManager {
    config: HeartbeatConfig,
    state: Arc<HeartbeatState>,
    event_tx: mpsc::Sender<HeartbeatEvent>,
    cancel: CancellationToken,
}

impl HeartbeatManager {
    /// Create a new heartbeat manager.
    #[must_use]
    pub const fn new(
        config: HeartbeatConfig,
        state: Arc<HeartbeatState>,
        event_tx: mpsc::Sender<HeartbeatEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            state,
            event_tx,
            cancel,
        }
    }

    /// Run until cancelled or a timeout is detected.
    pub async fn run(self) {
        // `interval` panics on a zero period.
        let mut interval =
            tokio::time::interval(self.config.check_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately.
        interval.tick().await;

        loop {
            tokio::select! {
                () = self.cancel.cancelled() => {
                    tracing::debug!("Heartbeat manager cancelled");
                    break;
                }
                _ = interval.tick() => {
                    if !self.check_and_ping().await {
                        break;
                    }
                }
            }
        }
    }

    /// Returns `false` once the loop should exit.
    async fn check_and_ping(&self) -> bool {
        if self.state.is_paused() {
            return true;
        }

        let idle = self.state.idle_for();
        let event = if idle > self.config.timeout {
            tracing::warn!(
                idle_ms = idle.as_millis(),
                timeout_ms = self.config.timeout.as_millis(),
                "Heartbeat timeout detected"
            );
            HeartbeatEvent::Timeout
        } else if idle >= self.config.check_interval {
            HeartbeatEvent::SendPing
        } else {
            return true;
        };

        let timed_out = event == HeartbeatEvent::Timeout;
        if self.event_tx.send(event).await.is_err() {
            tracing::debug!("Event channel closed, stopping heartbeat");
            return false;
        }
        !timed_out
    }
}
