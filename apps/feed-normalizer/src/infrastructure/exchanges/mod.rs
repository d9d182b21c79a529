//! Exchange Plugins
//!
//! Concrete [`ExchangeFeed`](crate::application::ports::ExchangeFeed)
//! implementations and the default registry wiring them up.

pub mod bittrex;

use std::sync::Arc;

use crate::application::services::registry::ExchangeRegistry;

/// Registry with every built-in exchange.
#[must_use]
pub fn default_registry() -> ExchangeRegistry {
    let mut registry = ExchangeRegistry::new();
    registry.register(bittrex::EXCHANGE, |options| {
        Arc::new(bittrex::BittrexFeed::new(options))
    });
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::services::registry::ExchangeOptions;

    #[test]
    fn registers_bittrex() {
        let registry = default_registry();
        assert!(registry.supports("bittrex"));
        let feed = registry
            .create("bittrex", &ExchangeOptions::default())
            .unwrap();
        assert_eq!(feed.exchange(), "bittrex");
        assert!(feed.snapshot_source().is_some());
    }

    #[test]
    fn unknown_exchange_is_unsupported() {
        assert!(default_registry().create("ftx", &ExchangeOptions::default()).is_err());
    }
}
