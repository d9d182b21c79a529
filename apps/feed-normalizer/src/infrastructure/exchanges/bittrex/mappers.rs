//! Bittrex Mappers
//!
//! # Priority
//!
//! Within the book normalizer the snapshot mapper is evaluated before the
//! delta mapper. Generated REST snapshots are recognised by their `stream`
//! marker and socket deltas by the hub method of the first invocation; a
//! frame carrying both markers is a snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;

use super::messages::{BookLevel, HubInvocation, OrderBookDelta, OrderBookSnapshot, TradeBatch};
use super::{BittrexHubMethods, BOOK_CHANNEL, SNAPSHOT_CHANNEL, SNAPSHOT_STREAM_SUFFIX, TRADE_CHANNEL};
use crate::application::ports::{MappedEvents, Mapper, MapperError};
use crate::domain::events::{BookChange, BookPriceLevel, NormalizedEvent, Side, Trade, parse_number};
use crate::domain::filter::Filter;
use crate::domain::message::RawMessage;
use crate::infrastructure::codec::decode_compressed;

// =============================================================================
// Helpers
// =============================================================================

/// Bittrex symbols are upper case on every channel.
fn upper(symbols: &[String]) -> impl Iterator<Item = String> + '_ {
    symbols.iter().map(|s| s.to_uppercase())
}

/// Method of the first hub invocation, without allocating.
fn first_method(payload: &Value) -> Option<&str> {
    payload.get("M")?.get(0)?.get("M")?.as_str()
}

/// Decode every invocation of `method` in the envelope.
fn decode_invocations(payload: &Value, method: &str) -> Result<Vec<Value>, MapperError> {
    let invocations: Vec<HubInvocation> = serde_json::from_value(
        payload
            .get("M")
            .cloned()
            .ok_or_else(|| MapperError::Malformed("missing invocation list".to_string()))?,
    )?;

    invocations
        .iter()
        .filter(|invocation| invocation.method.eq_ignore_ascii_case(method))
        .map(|invocation| {
            let encoded = invocation
                .arguments
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    MapperError::Malformed(format!("{method} invocation without payload"))
                })?;
            Ok(decode_compressed(encoded)?)
        })
        .collect()
}

/// Parse levels, dropping those whose price or quantity is not numeric.
fn levels(raw: &[BookLevel]) -> Vec<BookPriceLevel> {
    raw.iter()
        .map(|level| BookPriceLevel::new(parse_number(&level.rate), parse_number(&level.quantity)))
        .filter(BookPriceLevel::is_valid)
        .collect()
}

fn executed_at(raw: Option<&str>, fallback: DateTime<Utc>) -> DateTime<Utc> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or(fallback, |t| t.with_timezone(&Utc))
}

// =============================================================================
// Trades
// =============================================================================

/// `trade` hub invocations to [`Trade`] events, one per delta.
#[derive(Debug, Clone)]
pub struct BittrexTradesMapper {
    exchange: String,
    methods: Arc<BittrexHubMethods>,
}

impl BittrexTradesMapper {
    /// Create the mapper.
    #[must_use]
    pub fn new(exchange: impl Into<String>, methods: Arc<BittrexHubMethods>) -> Self {
        Self {
            exchange: exchange.into(),
            methods,
        }
    }
}

impl Mapper for BittrexTradesMapper {
    fn name(&self) -> &'static str {
        "bittrex_trades"
    }

    fn can_handle(&self, message: &RawMessage) -> bool {
        first_method(&message.payload).is_some_and(|m| m.eq_ignore_ascii_case(&self.methods.trade))
    }

    fn filters(&self, symbols: &[String]) -> Vec<Filter> {
        vec![Filter::with_symbols(TRADE_CHANNEL, upper(symbols))]
    }

    fn map(
        &self,
        message: &RawMessage,
        local_timestamp: DateTime<Utc>,
    ) -> Result<MappedEvents, MapperError> {
        let batches = decode_invocations(&message.payload, &self.methods.trade)?
            .into_iter()
            .map(serde_json::from_value::<TradeBatch>)
            .collect::<Result<Vec<_>, _>>()?;

        let exchange = self.exchange.clone();
        Ok(Box::new(batches.into_iter().flat_map(move |batch| {
            let exchange = exchange.clone();
            let symbol = batch.market_symbol;
            batch.deltas.into_iter().filter_map(move |delta| {
                let price = parse_number(&delta.rate);
                let amount = parse_number(&delta.quantity);
                if price.is_nan() || amount.is_nan() {
                    tracing::debug!(symbol = %symbol, id = ?delta.id, "Dropping trade with non-numeric price or amount");
                    return None;
                }

                Some(NormalizedEvent::from(Trade {
                    symbol: symbol.clone(),
                    exchange: exchange.clone(),
                    id: delta.id,
                    price,
                    amount,
                    side: Side::from_taker_side(delta.taker_side.as_deref()),
                    timestamp: executed_at(delta.executed_at.as_deref(), local_timestamp),
                    local_timestamp,
                }))
            })
        })))
    }
}

// =============================================================================
// Book Deltas
// =============================================================================

/// `orderBook` hub invocations to incremental [`BookChange`] events.
#[derive(Debug, Clone)]
pub struct BittrexBookChangeMapper {
    exchange: String,
    methods: Arc<BittrexHubMethods>,
}

impl BittrexBookChangeMapper {
    /// Create the mapper.
    #[must_use]
    pub fn new(exchange: impl Into<String>, methods: Arc<BittrexHubMethods>) -> Self {
        Self {
            exchange: exchange.into(),
            methods,
        }
    }
}

impl Mapper for BittrexBookChangeMapper {
    fn name(&self) -> &'static str {
        "bittrex_book_changes"
    }

    fn can_handle(&self, message: &RawMessage) -> bool {
        first_method(&message.payload)
            .is_some_and(|m| m.eq_ignore_ascii_case(&self.methods.order_book))
    }

    fn filters(&self, symbols: &[String]) -> Vec<Filter> {
        vec![Filter::with_symbols(BOOK_CHANNEL, upper(symbols))]
    }

    fn map(
        &self,
        message: &RawMessage,
        local_timestamp: DateTime<Utc>,
    ) -> Result<MappedEvents, MapperError> {
        let deltas = decode_invocations(&message.payload, &self.methods.order_book)?
            .into_iter()
            .map(serde_json::from_value::<OrderBookDelta>)
            .collect::<Result<Vec<_>, _>>()?;

        let exchange = self.exchange.clone();
        Ok(Box::new(deltas.into_iter().map(move |delta| {
            NormalizedEvent::from(BookChange {
                symbol: delta.market_symbol,
                exchange: exchange.clone(),
                is_snapshot: false,
                bids: levels(&delta.bid_deltas),
                asks: levels(&delta.ask_deltas),
                timestamp: local_timestamp,
                local_timestamp,
            })
        })))
    }
}

// =============================================================================
// Book Snapshots
// =============================================================================

/// Generated REST snapshots to full-replacement [`BookChange`] events.
#[derive(Debug, Clone)]
pub struct BittrexBookSnapshotMapper {
    exchange: String,
}

impl BittrexBookSnapshotMapper {
    /// Create the mapper.
    #[must_use]
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
        }
    }
}

impl Mapper for BittrexBookSnapshotMapper {
    fn name(&self) -> &'static str {
        "bittrex_book_snapshots"
    }

    fn can_handle(&self, message: &RawMessage) -> bool {
        message
            .payload
            .get("stream")
            .and_then(Value::as_str)
            .is_some_and(|s| s.ends_with(SNAPSHOT_STREAM_SUFFIX))
    }

    fn filters(&self, symbols: &[String]) -> Vec<Filter> {
        vec![Filter::with_symbols(SNAPSHOT_CHANNEL, upper(symbols))]
    }

    fn map(
        &self,
        message: &RawMessage,
        local_timestamp: DateTime<Utc>,
    ) -> Result<MappedEvents, MapperError> {
        let stream = message
            .payload
            .get("stream")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let symbol = stream
            .strip_suffix(SNAPSHOT_STREAM_SUFFIX)
            .unwrap_or(stream)
            .to_uppercase();

        let data = message
            .payload
            .get("data")
            .cloned()
            .ok_or_else(|| MapperError::Malformed("snapshot without data".to_string()))?;
        let snapshot: OrderBookSnapshot = serde_json::from_value(data)?;

        let change = BookChange {
            symbol,
            exchange: self.exchange.clone(),
            is_snapshot: true,
            bids: levels(&snapshot.bid),
            asks: levels(&snapshot.ask),
            timestamp: local_timestamp,
            local_timestamp,
        };
        Ok(Box::new(std::iter::once(change.into())))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;
    use test_case::test_case;

    use super::*;
    use crate::domain::connection::ConnectionId;
    use crate::infrastructure::codec::encode_compressed;

    fn methods() -> Arc<BittrexHubMethods> {
        Arc::new(BittrexHubMethods::default())
    }

    fn envelope(method: &str, payload: &Value) -> Value {
        json!({
            "C": "d-1",
            "M": [{"H": "C3", "M": method, "A": [encode_compressed(payload).unwrap()]}]
        })
    }

    fn received(payload: Value) -> RawMessage {
        RawMessage::received(ConnectionId::new(), payload)
    }

    fn trade_batch() -> Value {
        json!({
            "marketSymbol": "ETH-USD",
            "deltas": [
                {"id": "t1", "executedAt": "2021-03-04T10:00:00.123Z", "quantity": "0.5", "rate": "1500.25", "takerSide": "BUY"},
                {"id": "t2", "executedAt": "2021-03-04T10:00:01Z", "quantity": "1", "rate": "1500.5", "takerSide": "SELL"},
                {"id": "t3", "quantity": "2", "rate": "1499"}
            ]
        })
    }

    fn trades(events: MappedEvents) -> Vec<Trade> {
        events
            .map(|e| match e {
                NormalizedEvent::Trade(t) => t,
                NormalizedEvent::BookChange(_) => panic!("expected trade"),
            })
            .collect()
    }

    fn book_changes(events: MappedEvents) -> Vec<BookChange> {
        events
            .map(|e| match e {
                NormalizedEvent::BookChange(b) => b,
                NormalizedEvent::Trade(_) => panic!("expected book change"),
            })
            .collect()
    }

    #[test]
    fn trade_batch_yields_one_trade_per_delta() {
        let mapper = BittrexTradesMapper::new("bittrex", methods());
        let message = received(envelope("trade", &trade_batch()));
        assert!(mapper.can_handle(&message));

        let local = Utc::now();
        let trades = trades(mapper.map(&message, local).unwrap());
        assert_eq!(trades.len(), 3);

        let sides: Vec<_> = trades.iter().map(|t| t.side).collect();
        assert_eq!(sides, vec![Side::Buy, Side::Sell, Side::Unknown]);

        assert_eq!(trades[0].id.as_deref(), Some("t1"));
        assert!((trades[0].price - 1500.25).abs() < f64::EPSILON);
        assert!((trades[0].amount - 0.5).abs() < f64::EPSILON);
        assert_eq!(trades[0].symbol, "ETH-USD");
        assert_eq!(trades[0].exchange, "bittrex");
        assert_eq!(trades[0].timestamp.timestamp_subsec_millis(), 123);
        assert_eq!(trades[2].timestamp, local);
        assert!(trades.iter().all(|t| t.local_timestamp == local));
    }

    #[test]
    fn non_numeric_trade_is_dropped() {
        let mapper = BittrexTradesMapper::new("bittrex", methods());
        let batch = json!({
            "marketSymbol": "ETH-USD",
            "deltas": [
                {"id": "bad", "quantity": "1", "rate": "n/a"},
                {"id": "ok", "quantity": "1", "rate": "2"}
            ]
        });
        let trades = trades(
            mapper
                .map(&received(envelope("trade", &batch)), Utc::now())
                .unwrap(),
        );
        assert_eq!(trades.len(), 1);
        assert_eq!(trades[0].id.as_deref(), Some("ok"));
    }

    #[test]
    fn compressed_delta_maps_to_incremental_change() {
        let mapper = BittrexBookChangeMapper::new("bittrex", methods());
        let delta = json!({
            "marketSymbol": "ETH-BTC",
            "depth": 25,
            "sequence": 7,
            "bidDeltas": [{"quantity": "0", "rate": "0.031"}, {"quantity": "2", "rate": "0.030"}],
            "askDeltas": [{"quantity": "1.1", "rate": "0.032"}]
        });
        let message = received(envelope("orderBook", &delta));
        assert!(mapper.can_handle(&message));

        let changes = book_changes(mapper.map(&message, Utc::now()).unwrap());
        assert_eq!(changes.len(), 1);
        let change = &changes[0];
        assert!(!change.is_snapshot);
        assert_eq!(change.symbol, "ETH-BTC");
        assert_eq!(change.bids.len(), 2);
        assert_eq!(change.asks.len(), 1);
        assert!(change.bids[0].amount.abs() < f64::EPSILON);
        assert_eq!(change.timestamp, change.local_timestamp);
    }

    #[test]
    fn rest_snapshot_maps_to_full_replacement() {
        let mapper = BittrexBookSnapshotMapper::new("bittrex");
        let message = RawMessage::generated(
            ConnectionId::new(),
            json!({
                "stream": "eth-usd@orderBook",
                "generated": true,
                "data": {
                    "bid": [{"quantity": "1", "rate": "1500"}, {"quantity": "2", "rate": "1499"}],
                    "ask": [{"quantity": "3", "rate": "1501"}]
                }
            }),
        );
        assert!(mapper.can_handle(&message));

        let changes = book_changes(mapper.map(&message, Utc::now()).unwrap());
        assert_eq!(changes.len(), 1);
        assert!(changes[0].is_snapshot);
        assert_eq!(changes[0].symbol, "ETH-USD");
        assert_eq!(changes[0].bids.len(), 2);
        assert_eq!(changes[0].asks.len(), 1);
    }

    #[test]
    fn snapshot_drops_non_numeric_levels() {
        let mapper = BittrexBookSnapshotMapper::new("bittrex");
        let message = received(json!({
            "stream": "eth-usd@orderBook",
            "data": {"bid": [{"quantity": "x", "rate": "1"}], "ask": []}
        }));
        let changes = book_changes(mapper.map(&message, Utc::now()).unwrap());
        assert!(changes[0].bids.is_empty());
    }

    #[test_case(json!({"stream": "eth-usd@orderBook"}), [false, false, true]; "generated snapshot")]
    #[test_case(json!({"M": [{"M": "trade"}]}), [true, false, false]; "trade invocation")]
    #[test_case(json!({"M": [{"M": "orderBook"}]}), [false, true, false]; "book invocation")]
    #[test_case(json!({"M": [{"M": "heartbeat"}]}), [false, false, false]; "heartbeat invocation")]
    #[test_case(json!({"M": []}), [false, false, false]; "empty envelope")]
    #[test_case(json!({"stream": "eth-usd@trade"}), [false, false, false]; "other stream")]
    fn discriminators_are_disjoint(payload: Value, expected: [bool; 3]) {
        let message = received(payload);
        let actual = [
            BittrexTradesMapper::new("bittrex", methods()).can_handle(&message),
            BittrexBookChangeMapper::new("bittrex", methods()).can_handle(&message),
            BittrexBookSnapshotMapper::new("bittrex").can_handle(&message),
        ];
        assert_eq!(actual, expected);
    }

    #[test]
    fn corrupt_payload_is_a_mapping_error() {
        let mapper = BittrexTradesMapper::new("bittrex", methods());
        let message = received(json!({"M": [{"M": "trade", "A": ["%%%"]}]}));
        assert!(matches!(
            mapper.map(&message, Utc::now()),
            Err(MapperError::Decompression(_))
        ));
    }

    #[test]
    fn invocation_without_payload_is_malformed() {
        let mapper = BittrexBookChangeMapper::new("bittrex", methods());
        let message = received(json!({"M": [{"M": "orderBook", "A": []}]}));
        assert!(matches!(
            mapper.map(&message, Utc::now()),
            Err(MapperError::Malformed(_))
        ));
    }

    #[test]
    fn custom_hub_methods_change_the_discriminator() {
        let methods = Arc::new(BittrexHubMethods {
            trade: "trades".to_string(),
            ..BittrexHubMethods::default()
        });
        let mapper = BittrexTradesMapper::new("bittrex", methods);
        assert!(mapper.can_handle(&received(json!({"M": [{"M": "trades"}]}))));
        assert!(!mapper.can_handle(&received(json!({"M": [{"M": "trade"}]}))));
    }

    #[test]
    fn filters_upper_case_symbols() {
        let symbols = vec!["eth-usd".to_string(), "ETH-BTC".to_string()];
        let filters = BittrexTradesMapper::new("bittrex", methods()).filters(&symbols);
        assert_eq!(
            filters,
            vec![Filter::with_symbols(TRADE_CHANNEL, ["ETH-USD", "ETH-BTC"])]
        );
        assert_eq!(
            BittrexBookSnapshotMapper::new("bittrex").filters(&symbols)[0].channel,
            SNAPSHOT_CHANNEL
        );
    }

    proptest! {
        #[test]
        fn trade_mapping_is_deterministic(
            rates in prop::collection::vec((1_u32..1_000_000, 1_u32..1_000), 1..10),
        ) {
            let deltas: Vec<_> = rates
                .iter()
                .enumerate()
                .map(|(i, (rate, qty))| json!({
                    "id": format!("t{i}"),
                    "rate": format!("{rate}.5"),
                    "quantity": qty.to_string(),
                    "takerSide": if i % 2 == 0 { "BUY" } else { "SELL" },
                }))
                .collect();
            let message = received(envelope("trade", &json!({"marketSymbol": "ETH-USD", "deltas": deltas})));
            let mapper = BittrexTradesMapper::new("bittrex", methods());
            let local = Utc::now();

            let first: Vec<_> = mapper.map(&message, local).unwrap().collect();
            let second: Vec<_> = mapper.map(&message, local).unwrap().collect();
            prop_assert_eq!(first.len(), rates.len());
            prop_assert_eq!(first, second);
        }
    }
}
