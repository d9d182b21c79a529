//! Canonical Market Data Events
//!
//! Exchange-independent representation of the two event kinds the
//! normalizer emits: trades and order book changes.
//!
//! # Book Change Semantics
//!
//! - `is_snapshot = true`: full replacement of the book for the symbol.
//! - `is_snapshot = false`: incremental delta applied on top of the most
//!   recent snapshot. A level with `amount == 0` removes that price level.
//!
//! A consumer that has not yet seen a snapshot for a symbol must treat
//! incremental deltas for that symbol as unusable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// =============================================================================
// Numeric Parsing
// =============================================================================

/// Parse a price or amount from its wire representation.
///
/// Accepts JSON numbers and numeric strings. Never fails: anything that is
/// not a finite-looking numeric literal yields `f64::NAN`, and it is the
/// mapper's job to reject `NaN` values where correctness matters.
#[must_use]
pub fn parse_number(value: &serde_json::Value) -> f64 {
    match value {
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(f64::NAN),
        serde_json::Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
        _ => f64::NAN,
    }
}

// =============================================================================
// Trade
// =============================================================================

/// Aggressor side of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Taker bought.
    Buy,
    /// Taker sold.
    Sell,
    /// Exchange did not report the taker side.
    #[default]
    Unknown,
}

impl Side {
    /// Parse a taker side marker case-insensitively.
    ///
    /// Anything other than `buy`/`sell` (including an absent marker)
    /// degrades to [`Side::Unknown`].
    #[must_use]
    pub fn from_taker_side(marker: Option<&str>) -> Self {
        match marker.map(str::to_ascii_lowercase).as_deref() {
            Some("buy") => Self::Buy,
            Some("sell") => Self::Sell,
            _ => Self::Unknown,
        }
    }

    /// Wire name of the side.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Buy => "buy",
            Self::Sell => "sell",
            Self::Unknown => "unknown",
        }
    }
}

/// A single executed trade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trade {
    /// Exchange symbol as reported by the mapper.
    pub symbol: String,
    /// Exchange identifier.
    pub exchange: String,
    /// Exchange trade id, when the exchange provides one.
    pub id: Option<String>,
    /// Execution price.
    pub price: f64,
    /// Executed amount.
    pub amount: f64,
    /// Taker side.
    pub side: Side,
    /// Exchange event time.
    pub timestamp: DateTime<Utc>,
    /// Local receipt time.
    pub local_timestamp: DateTime<Utc>,
}

// =============================================================================
// Book Change
// =============================================================================

/// One price level of an order book change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BookPriceLevel {
    /// Level price.
    pub price: f64,
    /// Level amount (0 removes the level in a delta).
    pub amount: f64,
}

impl BookPriceLevel {
    /// Create a level.
    #[must_use]
    pub const fn new(price: f64, amount: f64) -> Self {
        Self { price, amount }
    }

    /// Whether both price and amount parsed to numbers.
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        !self.price.is_nan() && !self.amount.is_nan()
    }
}

/// Order book snapshot or incremental delta for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookChange {
    /// Exchange symbol.
    pub symbol: String,
    /// Exchange identifier.
    pub exchange: String,
    /// Full replacement (`true`) or incremental delta (`false`).
    pub is_snapshot: bool,
    /// Bid levels in wire order.
    pub bids: Vec<BookPriceLevel>,
    /// Ask levels in wire order.
    pub asks: Vec<BookPriceLevel>,
    /// Exchange event time, or the local receipt time when the exchange
    /// does not stamp one.
    pub timestamp: DateTime<Utc>,
    /// Local receipt time.
    pub local_timestamp: DateTime<Utc>,
}

// =============================================================================
// Normalized Event
// =============================================================================

/// Kind of a normalized event, used for metrics labels and filtering stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`NormalizedEvent::Trade`].
    Trade,
    /// [`NormalizedEvent::BookChange`].
    BookChange,
}

impl EventKind {
    /// Label value.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Trade => "trade",
            Self::BookChange => "book_change",
        }
    }
}

/// Canonical event emitted to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    /// A trade.
    Trade(Trade),
    /// An order book snapshot or delta.
    BookChange(BookChange),
}

impl NormalizedEvent {
    /// Event kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Trade(_) => EventKind::Trade,
            Self::BookChange(_) => EventKind::BookChange,
        }
    }

    /// Symbol the event refers to.
    #[must_use]
    pub fn symbol(&self) -> &str {
        match self {
            Self::Trade(t) => &t.symbol,
            Self::BookChange(b) => &b.symbol,
        }
    }

    /// Exchange the event came from.
    #[must_use]
    pub fn exchange(&self) -> &str {
        match self {
            Self::Trade(t) => &t.exchange,
            Self::BookChange(b) => &b.exchange,
        }
    }

    /// Local receipt time.
    #[must_use]
    pub const fn local_timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Trade(t) => t.local_timestamp,
            Self::BookChange(b) => b.local_timestamp,
        }
    }
}

impl From<Trade> for NormalizedEvent {
    fn from(trade: Trade) -> Self {
        Self::Trade(trade)
    }
}

impl From<BookChange> for NormalizedEvent {
    fn from(change: BookChange) -> Self {
        Self::BookChange(change)
    }
}
