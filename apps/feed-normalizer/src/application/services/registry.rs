//! Exchange Registry
//!
//! Maps exchange ids to plugin factories. Callers may register a custom
//! factory for a new exchange or override a built-in one.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::application::ports::ExchangeFeed;

/// Per-exchange options supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExchangeOptions {
    /// Order book depth for subscriptions and REST snapshots.
    pub depth: Option<u32>,
    /// When set, order book snapshots are polled on this interval instead
    /// of streaming socket deltas.
    pub polling_interval: Option<Duration>,
    /// Override of the REST base URL.
    pub http_url: Option<String>,
    /// Override of the socket base URL.
    pub socket_url: Option<String>,
}

/// Factory producing an exchange plugin.
pub type FeedFactory = Arc<dyn Fn(&ExchangeOptions) -> Arc<dyn ExchangeFeed> + Send + Sync>;

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// No factory registered for the id.
    #[error("not supported exchange: {0}")]
    UnsupportedExchange(String),
}

/// Exchange id to factory mapping.
#[derive(Clone, Default)]
pub struct ExchangeRegistry {
    factories: HashMap<String, FeedFactory>,
}

impl std::fmt::Debug for ExchangeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("ExchangeRegistry")
            .field("exchanges", &ids)
            .finish()
    }
}

impl ExchangeRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the factory for an exchange id.
    pub fn register<F>(&mut self, exchange: impl Into<String>, factory: F)
    where
        F: Fn(&ExchangeOptions) -> Arc<dyn ExchangeFeed> + Send + Sync + 'static,
    {
        self.factories.insert(exchange.into(), Arc::new(factory));
    }

    /// Whether an exchange id is registered.
    #[must_use]
    pub fn supports(&self, exchange: &str) -> bool {
        self.factories.contains_key(exchange)
    }

    /// Factory for an exchange id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedExchange`] for unknown ids.
    pub fn get(&self, exchange: &str) -> Result<FeedFactory, RegistryError> {
        self.factories
            .get(exchange)
            .cloned()
            .ok_or_else(|| RegistryError::UnsupportedExchange(exchange.to_string()))
    }

    /// Instantiate the plugin for an exchange id.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::UnsupportedExchange`] for unknown ids.
    pub fn create(
        &self,
        exchange: &str,
        options: &ExchangeOptions,
    ) -> Result<Arc<dyn ExchangeFeed>, RegistryError> {
        Ok(self.get(exchange)?(options))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::{ExchangeProtocol, Mapper, SnapshotSource};
    use crate::domain::connection::ConnectionPlan;
    use crate::domain::filter::{Filter, FilterError};

    struct StubFeed(String);

    impl ExchangeFeed for StubFeed {
        fn exchange(&self) -> &str {
            &self.0
        }

        fn trade_mappers(&self) -> Vec<Arc<dyn Mapper>> {
            Vec::new()
        }

        fn book_change_mappers(&self) -> Vec<Arc<dyn Mapper>> {
            Vec::new()
        }

        fn protocol(&self) -> Arc<dyn ExchangeProtocol> {
            unimplemented!("not used by registry tests")
        }

        fn snapshot_source(&self) -> Option<Arc<dyn SnapshotSource>> {
            None
        }

        fn connection_plans(
            &self,
            _filters: &[Filter],
            _symbols: &[String],
        ) -> Result<Vec<ConnectionPlan>, FilterError> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn unknown_exchange_is_rejected() {
        let registry = ExchangeRegistry::new();
        let err = registry
            .create("nope", &ExchangeOptions::default())
            .err()
            .unwrap();
        assert_eq!(err, RegistryError::UnsupportedExchange("nope".to_string()));
        assert_eq!(err.to_string(), "not supported exchange: nope");
    }

    #[test]
    fn register_and_override() {
        let mut registry = ExchangeRegistry::new();
        registry.register("x", |_| Arc::new(StubFeed("first".to_string())));
        assert_eq!(
            registry
                .create("x", &ExchangeOptions::default())
                .unwrap()
                .exchange(),
            "first"
        );

        registry.register("x", |_| Arc::new(StubFeed("second".to_string())));
        assert_eq!(
            registry
                .create("x", &ExchangeOptions::default())
                .unwrap()
                .exchange(),
            "second"
        );
        assert!(registry.supports("x"));
        assert!(!registry.supports("y"));
    }

    #[test]
    fn factory_receives_options() {
        let mut registry = ExchangeRegistry::new();
        registry.register("x", |options: &ExchangeOptions| {
            Arc::new(StubFeed(format!("depth-{}", options.depth.unwrap_or(0))))
        });

        let options = ExchangeOptions {
            depth: Some(500),
            ..ExchangeOptions::default()
        };
        assert_eq!(registry.create("x", &options).unwrap().exchange(), "depth-500");
    }
}
