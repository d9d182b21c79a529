//! Subscription Filters
//!
//! A [`Filter`] is a declarative subscription request: a channel name plus
//! an optional set of symbols.
//!
//! # Design
//!
//! - Live-socket channels must carry a non-empty symbol set; this is checked
//!   when subscribe payloads are built, before any network I/O.
//! - A filter without symbols is only legal on polling / manual snapshot
//!   channels, where it means "all configured symbols".
//! - Filters requested by several mappers for the same channel are merged,
//!   keeping the first-seen channel order.

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Configuration-fatal filter errors.
///
/// These are programmer errors raised synchronously at subscribe
/// construction time and are never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FilterError {
    /// A live-socket channel was requested without symbols.
    #[error("channel '{channel}' is streamed over a live socket and requires at least one symbol")]
    MissingSymbols {
        /// Offending channel.
        channel: String,
    },

    /// The exchange does not know the channel.
    #[error("exchange '{exchange}' does not support channel '{channel}'")]
    UnknownChannel {
        /// Exchange id.
        exchange: String,
        /// Offending channel.
        channel: String,
    },

    /// No filters were resolved at all.
    #[error("no subscription filters resolved for exchange '{0}'")]
    Empty(String),

    /// A snapshot channel was requested from an exchange without a
    /// snapshot endpoint.
    #[error("exchange '{0}' has no snapshot source")]
    SnapshotUnsupported(String),
}

// =============================================================================
// Filter
// =============================================================================

/// A subscription request for one channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Channel name, exchange specific.
    pub channel: String,
    /// Symbols for the channel; `None` means all configured symbols.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbols: Option<Vec<String>>,
}

impl Filter {
    /// Filter for a channel with no explicit symbols.
    #[must_use]
    pub fn channel(channel: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            symbols: None,
        }
    }

    /// Filter for a channel and symbol set.
    ///
    /// Duplicate symbols are removed, keeping first occurrence order. An
    /// empty symbol list is stored as `None`.
    #[must_use]
    pub fn with_symbols<I, S>(channel: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for symbol in symbols {
            let symbol = symbol.into();
            if !unique.contains(&symbol) {
                unique.push(symbol);
            }
        }

        Self {
            channel: channel.into(),
            symbols: if unique.is_empty() { None } else { Some(unique) },
        }
    }

    /// Whether the filter carries an explicit, non-empty symbol set.
    #[must_use]
    pub fn has_symbols(&self) -> bool {
        self.symbols.as_ref().is_some_and(|s| !s.is_empty())
    }

    /// Symbols required by a live-socket channel.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::MissingSymbols`] when the symbol set is absent
    /// or empty.
    pub fn require_symbols(&self) -> Result<&[String], FilterError> {
        match self.symbols.as_deref() {
            Some(symbols) if !symbols.is_empty() => Ok(symbols),
            _ => Err(FilterError::MissingSymbols {
                channel: self.channel.clone(),
            }),
        }
    }

    /// Symbols for a polling / snapshot channel, falling back to the
    /// configured symbols when the filter has none.
    #[must_use]
    pub fn resolve_symbols(&self, configured: &[String]) -> Vec<String> {
        match self.symbols.as_deref() {
            Some(symbols) if !symbols.is_empty() => symbols.to_vec(),
            _ => configured.to_vec(),
        }
    }
}

/// Merge filters requested for the same channel.
///
/// Symbol sets are unioned; a filter without symbols ("all") absorbs any
/// explicit set for the same channel.
#[must_use]
pub fn merge_filters(filters: impl IntoIterator<Item = Filter>) -> Vec<Filter> {
    let mut merged: Vec<Filter> = Vec::new();

    for filter in filters {
        let Some(existing) = merged.iter_mut().find(|f| f.channel == filter.channel) else {
            merged.push(filter);
            continue;
        };

        match (&mut existing.symbols, filter.symbols) {
            (Some(current), Some(incoming)) => {
                for symbol in incoming {
                    if !current.contains(&symbol) {
                        current.push(symbol);
                    }
                }
            }
            (slot, _) => *slot = None,
        }
    }

    merged
}
