//! Bittrex Wire Message Types
//!
//! # SignalR Envelope (socket, hub `c3`)
//!
//! - Invocation result: `{"R": [{"Success": true, "ErrorCode": null}], "I": "1"}`
//! - Invocation error: `{"E": "...", "I": "1"}`
//! - Keep-alive: `{}` or an envelope whose `M` is empty or only carries
//!   `heartbeat` invocations
//! - Data: `{"C": "...", "M": [{"H": "C3", "M": "trade", "A": ["<payload>"]}]}`
//!   where `<payload>` is base64 text wrapping raw-deflate JSON
//!
//! # Decoded Payloads
//!
//! - `trade`: [`TradeBatch`]
//! - `orderBook`: [`OrderBookDelta`]
//!
//! # REST
//!
//! - `GET /markets/{SYMBOL}/orderbook?depth=N`: [`OrderBookSnapshot`]
//!
//! Numeric fields are kept as raw JSON values and parsed leniently by the
//! mappers, so a malformed literal yields `NaN` instead of failing the whole
//! message.

use serde::Deserialize;
use serde_json::Value;

// =============================================================================
// SignalR Envelope
// =============================================================================

/// One hub invocation inside a data envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct HubInvocation {
    /// Hub name.
    #[serde(rename = "H", default)]
    pub hub: String,
    /// Hub method, used as the message kind discriminator.
    #[serde(rename = "M", default)]
    pub method: String,
    /// Invocation arguments; market data carries one compressed payload.
    #[serde(rename = "A", default)]
    pub arguments: Vec<Value>,
}

/// Outcome of one channel in a `Subscribe` invocation result.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SubscribeOutcome {
    /// Whether the channel was subscribed.
    pub success: bool,
    /// Error code when it was not.
    #[serde(default)]
    pub error_code: Option<String>,
}

// =============================================================================
// Socket Payloads
// =============================================================================

/// Batch of trades for one market.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeBatch {
    /// Market symbol, e.g. `ETH-USD`.
    pub market_symbol: String,
    /// Trades in execution order.
    #[serde(default)]
    pub deltas: Vec<TradeDelta>,
}

/// One executed trade.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeDelta {
    /// Exchange trade id.
    #[serde(default)]
    pub id: Option<String>,
    /// RFC 3339 execution time.
    #[serde(default)]
    pub executed_at: Option<String>,
    /// Executed quantity.
    #[serde(default)]
    pub quantity: Value,
    /// Execution price.
    #[serde(default)]
    pub rate: Value,
    /// `BUY` or `SELL`.
    #[serde(default)]
    pub taker_side: Option<String>,
}

/// Incremental order book update for one market.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderBookDelta {
    /// Market symbol.
    pub market_symbol: String,
    /// Subscribed depth.
    #[serde(default)]
    pub depth: Option<u32>,
    /// Book sequence number.
    #[serde(default)]
    pub sequence: Option<u64>,
    /// Changed bid levels; a zero quantity removes the level.
    #[serde(default)]
    pub bid_deltas: Vec<BookLevel>,
    /// Changed ask levels; a zero quantity removes the level.
    #[serde(default)]
    pub ask_deltas: Vec<BookLevel>,
}

/// A price level.
#[derive(Debug, Clone, Deserialize)]
pub struct BookLevel {
    /// Level quantity.
    #[serde(default)]
    pub quantity: Value,
    /// Level price.
    #[serde(default)]
    pub rate: Value,
}

// =============================================================================
// REST Payloads
// =============================================================================

/// Full order book returned by the REST endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderBookSnapshot {
    /// Bid levels, best first.
    #[serde(default)]
    pub bid: Vec<BookLevel>,
    /// Ask levels, best first.
    #[serde(default)]
    pub ask: Vec<BookLevel>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn trade_delta_tolerates_missing_optional_fields() {
        let batch: TradeBatch = serde_json::from_value(json!({
            "marketSymbol": "ETH-USD",
            "deltas": [{"quantity": "1", "rate": "2"}]
        }))
        .unwrap();
        assert_eq!(batch.deltas.len(), 1);
        assert!(batch.deltas[0].taker_side.is_none());
        assert!(batch.deltas[0].id.is_none());
    }

    #[test]
    fn subscribe_outcome_reads_pascal_case() {
        let outcome: SubscribeOutcome =
            serde_json::from_value(json!({"Success": false, "ErrorCode": "INVALID_CHANNEL"}))
                .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.error_code.as_deref(), Some("INVALID_CHANNEL"));
    }

    #[test]
    fn snapshot_defaults_missing_sides() {
        let snapshot: OrderBookSnapshot = serde_json::from_value(json!({"bid": []})).unwrap();
        assert!(snapshot.ask.is_empty());
    }
}
