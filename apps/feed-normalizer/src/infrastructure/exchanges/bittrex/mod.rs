//! Bittrex Exchange Plugin
//!
//! # Channels
//!
//! | Channel | Transport | Mapper |
//! |---|---|---|
//! | `trade` | socket (`trade_{SYMBOL}`) | [`BittrexTradesMapper`] |
//! | `orderBook` | socket (`orderbook_{SYMBOL}_{depth}`) | [`BittrexBookChangeMapper`] |
//! | `orderBookSnapshot` | REST `GET /markets/{SYMBOL}/orderbook` | [`BittrexBookSnapshotMapper`] |
//!
//! # Connection Plans
//!
//! - Socket book deltas plus snapshots: one hybrid connection, the REST
//!   snapshots are spliced in after every successful subscription.
//! - Polling mode ([`ExchangeOptions::polling_interval`]): book deltas are not
//!   subscribed; snapshots are polled on the interval and trades (if any)
//!   stream over their own socket.
//! - Snapshots without a book socket: polled on the default interval.

mod mappers;
pub mod messages;
mod protocol;

use std::sync::Arc;
use std::time::Duration;

pub use mappers::{BittrexBookChangeMapper, BittrexBookSnapshotMapper, BittrexTradesMapper};
pub use protocol::BittrexProtocol;

use crate::application::ports::{ExchangeFeed, ExchangeProtocol, Mapper, SnapshotSource};
use crate::application::services::registry::ExchangeOptions;
use crate::domain::connection::ConnectionPlan;
use crate::domain::filter::{Filter, FilterError};

/// Registry id.
pub const EXCHANGE: &str = "bittrex";

/// Live trade channel.
pub const TRADE_CHANNEL: &str = "trade";
/// Live order book delta channel.
pub const BOOK_CHANNEL: &str = "orderBook";
/// REST order book snapshot channel.
pub const SNAPSHOT_CHANNEL: &str = "orderBookSnapshot";

const SNAPSHOT_STREAM_SUFFIX: &str = "@orderBook";

const DEFAULT_HTTP_URL: &str = "https://api.bittrex.com/v3";
const DEFAULT_SOCKET_URL: &str = "https://socket-v3.bittrex.com/signalr";
const DEFAULT_SOCKET_DEPTH: u32 = 25;
const DEFAULT_SNAPSHOT_DEPTH: u32 = 500;
const DEFAULT_POLLING_INTERVAL: Duration = Duration::from_secs(30);

/// Hub method names used to tell message kinds apart.
///
/// The socket framing has changed between protocol revisions, so the
/// discriminators are configuration rather than constants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BittrexHubMethods {
    /// Trade batches.
    pub trade: String,
    /// Order book deltas.
    pub order_book: String,
    /// Keep-alive invocations and subscribe channel.
    pub heartbeat: String,
}

impl Default for BittrexHubMethods {
    fn default() -> Self {
        Self {
            trade: "trade".to_string(),
            order_book: "orderBook".to_string(),
            heartbeat: "heartbeat".to_string(),
        }
    }
}

// =============================================================================
// Snapshot Source
// =============================================================================

/// REST order book endpoint.
#[derive(Debug, Clone)]
pub struct BittrexSnapshotSource {
    http_url: String,
    depth: u32,
}

impl BittrexSnapshotSource {
    /// Create a source for a REST base URL.
    #[must_use]
    pub fn new(http_url: impl Into<String>, depth: u32) -> Self {
        Self {
            http_url: http_url.into(),
            depth,
        }
    }
}

impl SnapshotSource for BittrexSnapshotSource {
    fn snapshot_url(&self, symbol: &str) -> String {
        format!(
            "{}/markets/{}/orderbook?depth={}",
            self.http_url.trim_end_matches('/'),
            symbol.to_uppercase(),
            self.depth
        )
    }

    fn snapshot_message(&self, symbol: &str, response: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "stream": format!("{}{SNAPSHOT_STREAM_SUFFIX}", symbol.to_lowercase()),
            "generated": true,
            "data": response,
        })
    }
}

// =============================================================================
// Feed
// =============================================================================

/// Bittrex plugin.
#[derive(Debug, Clone)]
pub struct BittrexFeed {
    methods: Arc<BittrexHubMethods>,
    protocol: Arc<BittrexProtocol>,
    snapshots: Arc<BittrexSnapshotSource>,
    polling_interval: Option<Duration>,
}

impl BittrexFeed {
    /// Create the plugin with default hub methods.
    #[must_use]
    pub fn new(options: &ExchangeOptions) -> Self {
        Self::with_methods(options, BittrexHubMethods::default())
    }

    /// Create the plugin with custom hub method discriminators.
    #[must_use]
    pub fn with_methods(options: &ExchangeOptions, methods: BittrexHubMethods) -> Self {
        let protocol = BittrexProtocol::new(
            EXCHANGE,
            options.socket_url.as_deref().unwrap_or(DEFAULT_SOCKET_URL),
            options.depth.unwrap_or(DEFAULT_SOCKET_DEPTH),
            methods.clone(),
        );
        let snapshots = BittrexSnapshotSource::new(
            options.http_url.as_deref().unwrap_or(DEFAULT_HTTP_URL),
            options.depth.unwrap_or(DEFAULT_SNAPSHOT_DEPTH),
        );

        Self {
            methods: Arc::new(methods),
            protocol: Arc::new(protocol),
            snapshots: Arc::new(snapshots),
            polling_interval: options.polling_interval,
        }
    }
}

impl ExchangeFeed for BittrexFeed {
    fn exchange(&self) -> &str {
        EXCHANGE
    }

    fn trade_mappers(&self) -> Vec<Arc<dyn Mapper>> {
        vec![Arc::new(BittrexTradesMapper::new(
            EXCHANGE,
            Arc::clone(&self.methods),
        ))]
    }

    fn book_change_mappers(&self) -> Vec<Arc<dyn Mapper>> {
        vec![
            Arc::new(BittrexBookSnapshotMapper::new(EXCHANGE)),
            Arc::new(BittrexBookChangeMapper::new(
                EXCHANGE,
                Arc::clone(&self.methods),
            )),
        ]
    }

    fn protocol(&self) -> Arc<dyn ExchangeProtocol> {
        self.protocol.clone()
    }

    fn snapshot_source(&self) -> Option<Arc<dyn SnapshotSource>> {
        Some(self.snapshots.clone())
    }

    fn connection_plans(
        &self,
        filters: &[Filter],
        symbols: &[String],
    ) -> Result<Vec<ConnectionPlan>, FilterError> {
        let configured: Vec<String> = symbols.iter().map(|s| s.to_uppercase()).collect();
        let mut socket: Vec<Filter> = Vec::new();
        let mut snapshot_symbols: Vec<String> = Vec::new();

        for filter in filters {
            match filter.channel.as_str() {
                TRADE_CHANNEL => socket.push(filter.clone()),
                BOOK_CHANNEL if self.polling_interval.is_none() => socket.push(filter.clone()),
                BOOK_CHANNEL => {
                    tracing::debug!(exchange = EXCHANGE, "Polling mode, book deltas not subscribed");
                }
                SNAPSHOT_CHANNEL => {
                    for symbol in filter.resolve_symbols(&configured) {
                        if !snapshot_symbols.contains(&symbol) {
                            snapshot_symbols.push(symbol);
                        }
                    }
                }
                other => {
                    return Err(FilterError::UnknownChannel {
                        exchange: EXCHANGE.to_string(),
                        channel: other.to_string(),
                    });
                }
            }
        }

        let streams_book = socket.iter().any(|f| f.channel == BOOK_CHANNEL);
        let mut plans = Vec::new();

        match (self.polling_interval, snapshot_symbols.is_empty()) {
            (_, true) => {
                if !socket.is_empty() {
                    plans.push(ConnectionPlan::socket(socket));
                }
            }
            (Some(interval), false) => {
                if !socket.is_empty() {
                    plans.push(ConnectionPlan::socket(socket));
                }
                plans.push(ConnectionPlan::polling(snapshot_symbols, interval));
            }
            (None, false) if streams_book => {
                plans.push(ConnectionPlan::hybrid(socket, snapshot_symbols));
            }
            (None, false) => {
                if !socket.is_empty() {
                    plans.push(ConnectionPlan::socket(socket));
                }
                plans.push(ConnectionPlan::polling(
                    snapshot_symbols,
                    DEFAULT_POLLING_INTERVAL,
                ));
            }
        }

        if plans.is_empty() {
            return Err(FilterError::Empty(EXCHANGE.to_string()));
        }
        Ok(plans)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::ConnectionStrategy;
    use crate::domain::filter::merge_filters;

    fn symbols() -> Vec<String> {
        vec!["eth-usd".to_string(), "ETH-BTC".to_string()]
    }

    /// Filters the way the orchestrator resolves them from mappers.
    fn filters(mappers: &[Arc<dyn Mapper>]) -> Vec<Filter> {
        merge_filters(mappers.iter().flat_map(|m| m.filters(&symbols())))
    }

    fn all_mappers(feed: &BittrexFeed) -> Vec<Arc<dyn Mapper>> {
        let mut mappers = feed.trade_mappers();
        mappers.extend(feed.book_change_mappers());
        mappers
    }

    #[test]
    fn book_with_snapshots_is_one_hybrid_connection() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let plans = feed
            .connection_plans(&filters(&all_mappers(&feed)), &symbols())
            .unwrap();

        assert_eq!(plans.len(), 1);
        assert_eq!(
            plans[0].strategy,
            ConnectionStrategy::HybridWithManualSnapshot {
                snapshot_symbols: vec!["ETH-USD".to_string(), "ETH-BTC".to_string()]
            }
        );
        let channels: Vec<_> = plans[0].filters.iter().map(|f| f.channel.as_str()).collect();
        assert_eq!(channels, vec![TRADE_CHANNEL, BOOK_CHANNEL]);
    }

    #[test]
    fn trades_only_is_a_socket_connection() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let plans = feed
            .connection_plans(&filters(&feed.trade_mappers()), &symbols())
            .unwrap();
        assert_eq!(plans, vec![ConnectionPlan::socket(filters(&feed.trade_mappers()))]);
    }

    #[test]
    fn polling_mode_skips_book_deltas() {
        let interval = Duration::from_secs(5);
        let feed = BittrexFeed::new(&ExchangeOptions {
            polling_interval: Some(interval),
            ..ExchangeOptions::default()
        });
        let plans = feed
            .connection_plans(&filters(&all_mappers(&feed)), &symbols())
            .unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].strategy, ConnectionStrategy::SocketPushed);
        assert_eq!(plans[0].filters.len(), 1);
        assert_eq!(plans[0].filters[0].channel, TRADE_CHANNEL);
        assert_eq!(
            plans[1],
            ConnectionPlan::polling(vec!["ETH-USD".to_string(), "ETH-BTC".to_string()], interval)
        );
    }

    #[test]
    fn snapshot_channel_without_symbols_uses_configured() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let plans = feed
            .connection_plans(&[Filter::channel(SNAPSHOT_CHANNEL)], &symbols())
            .unwrap();
        assert_eq!(
            plans,
            vec![ConnectionPlan::polling(
                vec!["ETH-USD".to_string(), "ETH-BTC".to_string()],
                DEFAULT_POLLING_INTERVAL
            )]
        );
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let err = feed
            .connection_plans(&[Filter::with_symbols("ticker", ["ETH-USD"])], &symbols())
            .unwrap_err();
        assert!(matches!(err, FilterError::UnknownChannel { .. }));
    }

    #[test]
    fn nothing_to_connect_is_rejected() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let err = feed
            .connection_plans(&[Filter::channel(SNAPSHOT_CHANNEL)], &[])
            .unwrap_err();
        assert_eq!(err, FilterError::Empty(EXCHANGE.to_string()));
    }

    #[test]
    fn snapshot_source_urls_and_envelope() {
        let source = BittrexSnapshotSource::new("http://rest/v3/", 500);
        assert_eq!(
            source.snapshot_url("eth-usd"),
            "http://rest/v3/markets/ETH-USD/orderbook?depth=500"
        );

        let message = source.snapshot_message("ETH-USD", serde_json::json!({"bid": []}));
        assert_eq!(message["stream"], "eth-usd@orderBook");
        assert_eq!(message["generated"], true);
        assert_eq!(message["data"]["bid"], serde_json::json!([]));
    }

    #[test]
    fn book_mappers_put_snapshots_first() {
        let feed = BittrexFeed::new(&ExchangeOptions::default());
        let names: Vec<_> = feed.book_change_mappers().iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["bittrex_book_snapshots", "bittrex_book_changes"]);
    }
}
