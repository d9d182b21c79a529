//! Feed Normalizer Configuration Settings
//!
//! Configuration types for the feed engine, loaded from environment variables.

use std::time::Duration;

/// WebSocket connection settings.
#[derive(Debug, Clone)]
pub struct WebSocketSettings {
    /// Heartbeat check (and ping) interval.
    pub heartbeat_interval: Duration,
    /// Silence tolerated before the connection is considered dead.
    pub heartbeat_timeout: Duration,
    /// Initial reconnection delay.
    pub reconnect_delay_initial: Duration,
    /// Maximum reconnection delay.
    pub reconnect_delay_max: Duration,
    /// Reconnection delay multiplier for exponential backoff.
    pub reconnect_delay_multiplier: f64,
    /// Time allowed for all subscribe acknowledgments.
    pub subscribe_timeout: Duration,
    /// Time allowed for the pre-connection negotiation request.
    pub negotiate_timeout: Duration,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(30),
            reconnect_delay_initial: Duration::from_millis(1000),
            reconnect_delay_max: Duration::from_secs(30),
            reconnect_delay_multiplier: 2.0,
            subscribe_timeout: Duration::from_secs(10),
            negotiate_timeout: Duration::from_millis(5000),
        }
    }
}

/// REST snapshot settings.
#[derive(Debug, Clone)]
pub struct SnapshotSettings {
    /// Symbols fetched concurrently per batch.
    pub batch_size: usize,
    /// Per-request timeout.
    pub fetch_timeout: Duration,
    /// Default interval for polling feeds.
    pub polling_interval: Duration,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            batch_size: 10,
            fetch_timeout: Duration::from_millis(2000),
            polling_interval: Duration::from_secs(30),
        }
    }
}

/// Engine settings shared by every connection of a session.
#[derive(Debug, Clone)]
pub struct FeedSettings {
    /// WebSocket settings.
    pub websocket: WebSocketSettings,
    /// Snapshot settings.
    pub snapshot: SnapshotSettings,
    /// Messages held per connection while a manual snapshot is pending.
    pub max_buffered_messages: usize,
    /// Capacity of the merged raw message channel.
    pub channel_capacity: usize,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            websocket: WebSocketSettings::default(),
            snapshot: SnapshotSettings::default(),
            max_buffered_messages: 10_000,
            channel_capacity: 10_000,
        }
    }
}

impl FeedSettings {
    /// Load engine settings from environment variables, falling back to
    /// defaults for anything missing or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let ws = WebSocketSettings::default();
        let websocket = WebSocketSettings {
            heartbeat_interval: parse_env_duration_secs(
                "FEED_HEARTBEAT_INTERVAL_SECS",
                ws.heartbeat_interval,
            ),
            heartbeat_timeout: parse_env_duration_secs(
                "FEED_HEARTBEAT_TIMEOUT_SECS",
                ws.heartbeat_timeout,
            ),
            reconnect_delay_initial: parse_env_duration_millis(
                "FEED_RECONNECT_DELAY_INITIAL_MS",
                ws.reconnect_delay_initial,
            ),
            reconnect_delay_max: parse_env_duration_secs(
                "FEED_RECONNECT_DELAY_MAX_SECS",
                ws.reconnect_delay_max,
            ),
            reconnect_delay_multiplier: parse_env_f64(
                "FEED_RECONNECT_DELAY_MULTIPLIER",
                ws.reconnect_delay_multiplier,
            ),
            subscribe_timeout: parse_env_duration_secs(
                "FEED_SUBSCRIBE_TIMEOUT_SECS",
                ws.subscribe_timeout,
            ),
            negotiate_timeout: parse_env_duration_millis(
                "FEED_NEGOTIATE_TIMEOUT_MS",
                ws.negotiate_timeout,
            ),
        };

        let snap = SnapshotSettings::default();
        let snapshot = SnapshotSettings {
            batch_size: parse_env_usize("FEED_SNAPSHOT_BATCH_SIZE", snap.batch_size).max(1),
            fetch_timeout: parse_env_duration_millis("FEED_SNAPSHOT_TIMEOUT_MS", snap.fetch_timeout),
            polling_interval: parse_env_duration_secs(
                "FEED_POLLING_INTERVAL_SECS",
                snap.polling_interval,
            ),
        };

        let defaults = Self::default();
        Self {
            websocket,
            snapshot,
            max_buffered_messages: parse_env_usize(
                "FEED_MAX_BUFFERED_MESSAGES",
                defaults.max_buffered_messages,
            ),
            channel_capacity: parse_env_usize("FEED_CHANNEL_CAPACITY", defaults.channel_capacity)
                .max(1),
        }
    }
}

/// Complete binary configuration.
#[derive(Debug, Clone)]
pub struct NormalizerConfig {
    /// Exchange identifier.
    pub exchange: String,
    /// Symbols to stream.
    pub symbols: Vec<String>,
    /// Order book depth.
    pub book_depth: u32,
    /// Poll REST snapshots instead of subscribing to socket book deltas.
    pub book_polling: bool,
    /// Prometheus metrics port (0 = recorder only).
    pub metrics_port: u16,
    /// Engine settings.
    pub feed: FeedSettings,
}

impl NormalizerConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if `FEED_SYMBOLS` is missing or empty.
    pub fn from_env() -> Result<Self, ConfigError> {
        let raw_symbols = std::env::var("FEED_SYMBOLS")
            .map_err(|_| ConfigError::MissingEnvVar("FEED_SYMBOLS".to_string()))?;

        let symbols = parse_symbols(&raw_symbols);
        if symbols.is_empty() {
            return Err(ConfigError::EmptyValue("FEED_SYMBOLS".to_string()));
        }

        let exchange = std::env::var("FEED_EXCHANGE")
            .ok()
            .map(|v| v.trim().to_lowercase())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "bittrex".to_string());

        Ok(Self {
            exchange,
            symbols,
            book_depth: parse_env_u32("FEED_BOOK_DEPTH", 25),
            book_polling: parse_env_bool("FEED_BOOK_POLLING", false),
            metrics_port: parse_env_u16("FEED_METRICS_PORT", 0),
            feed: FeedSettings::from_env(),
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
}

/// Split a comma separated symbol list, dropping blanks.
fn parse_symbols(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

fn parse_env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map_or(default, |v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
}

fn parse_env_u16(key: &str, default: u16) -> u16 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn parse_env_duration_secs(key: &str, default: Duration) -> Duration {
    let parsed = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    non_zero_or_default(key, parsed, default)
}

fn parse_env_duration_millis(key: &str, default: Duration) -> Duration {
    let parsed = std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis);
    non_zero_or_default(key, parsed, default)
}

/// Intervals and timeouts must be positive; zero falls back to the default.
fn non_zero_or_default(key: &str, parsed: Option<Duration>, default: Duration) -> Duration {
    match parsed {
        Some(duration) if duration.is_zero() => {
            tracing::warn!(
                key,
                default_ms = default.as_millis(),
                "Zero duration is not allowed, using default"
            );
            default
        }
        Some(duration) => duration,
        None => default,
    }
}
