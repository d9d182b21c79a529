//! Domain Layer - Core feed types and business rules.
//!
//! This layer contains the canonical event model, subscription filters,
//! connection lifecycle state and raw message envelopes. It performs no
//! I/O.

/// Canonical trade and book change events.
pub mod events;

/// Subscription filters.
pub mod filter;

/// Connection identity, lifecycle state and strategies.
pub mod connection;

/// Raw wire message envelopes.
pub mod message;
