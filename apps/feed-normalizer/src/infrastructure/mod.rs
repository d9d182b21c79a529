//! Infrastructure Layer - Adapters and external integrations.
//!
//! Concrete implementations of the application ports, the built-in
//! exchange plugins and the ambient stack (configuration, metrics,
//! telemetry).

/// Base64 + raw deflate payload codec.
pub mod codec;

/// Configuration loaded from the environment.
pub mod config;

/// Diagnostic sink adapters.
pub mod diagnostics;

/// Built-in exchange plugins.
pub mod exchanges;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;

/// WebSocket and HTTP adapters.
pub mod transport;
