//! Transport Adapters
//!
//! Production implementations of the socket and HTTP ports.

mod http;
mod websocket;

use std::sync::Arc;

pub use http::ReqwestHttpClient;
pub use websocket::TungsteniteConnector;

use crate::application::ports::HttpError;
use crate::application::services::feed::FeedRuntime;
use crate::infrastructure::config::FeedSettings;
use crate::infrastructure::diagnostics::TracingDiagnosticSink;

impl FeedRuntime {
    /// Runtime backed by `tokio-tungstenite`, `reqwest` and diagnostics
    /// reported through `tracing`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if the HTTP client cannot be built.
    pub fn production(settings: FeedSettings) -> Result<Self, HttpError> {
        Ok(Self {
            connector: Arc::new(TungsteniteConnector::new()),
            http: Arc::new(ReqwestHttpClient::new()?),
            diagnostics: Arc::new(TracingDiagnosticSink::new()),
            settings,
        })
    }
}
