//! Application Layer - Use cases and port definitions.
//!
//! Ports describe what the feed pipeline needs from the outside world
//! (sockets, HTTP, exchange protocols, mappers); services compose them into
//! a normalized event stream.

/// Port interfaces implemented by infrastructure adapters and exchange plugins.
pub mod ports;

/// Dispatching, connection management and stream orchestration.
pub mod services;
