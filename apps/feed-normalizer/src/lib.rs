#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::match_same_arms,
        clippy::needless_pass_by_value,
        clippy::needless_collect,
        clippy::option_if_let_else,
        clippy::default_trait_access,
        clippy::items_after_statements,
        clippy::or_fun_call
    )
)]

//! Feed Normalizer - Exchange Feed Connections and Canonical Events
//!
//! Keeps streaming connections to exchange feeds alive and maps their wire
//! messages into canonical trades and order book changes.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Canonical events, filters, connection state
//!   - `events`: [`Trade`], [`BookChange`] and lenient number parsing
//!   - `filter`: Channel and symbol subscriptions with validation
//!   - `connection`: Session lifecycle and connection plans
//!   - `message`: Raw messages tagged with their source connection
//!
//! - **Application**: Ports and the feed engine
//!   - `ports`: Mapper, protocol, transport and snapshot traits
//!   - `services`: Dispatcher, connection lifecycle, snapshot splicing,
//!     multi-connection merge and the normalization entry point
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `exchanges`: Exchange plugins (Bittrex)
//!   - `transport`: `tokio-tungstenite` and `reqwest` adapters
//!   - `codec`: base64 + raw-deflate payload decoding
//!   - `config`, `metrics`, `telemetry`, `diagnostics`
//!
//! # Data Flow
//!
//! ```text
//! socket 1 ──┐            ┌────────────┐     ┌────────────┐
//!            ├── merge ──►│ Dispatcher │────►│   Stages   │──► caller
//! socket N ──┤            │ (mappers)  │     └────────────┘
//! REST poll ─┘            └────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Canonical types with no I/O.
pub mod domain;

/// Application layer - Ports and the feed engine.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::connection::{ConnectionPlan, ConnectionSession, ConnectionState};
pub use domain::events::{BookChange, BookPriceLevel, EventKind, NormalizedEvent, Side, Trade};
pub use domain::filter::{Filter, FilterError};

// Normalization entry point
pub use application::services::feed::FeedRuntime;
pub use application::services::normalize::{
    NormalizeError, NormalizedStream, Normalizer, StreamConfig, normalize_book_changes,
    normalize_trades, stream_normalized,
};
pub use application::services::registry::{ExchangeOptions, ExchangeRegistry, RegistryError};

// Exchanges
pub use infrastructure::exchanges::default_registry;

// Infrastructure config
pub use infrastructure::config::{
    ConfigError, FeedSettings, NormalizerConfig, SnapshotSettings, WebSocketSettings,
};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{
    LogFormat, TelemetryConfig, TelemetryGuard, init as init_telemetry,
};
