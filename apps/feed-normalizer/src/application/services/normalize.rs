//! Normalized Streams
//!
//! [`stream_normalized`] is the caller-facing entry point. It resolves the
//! exchange plugin, collects mappers from the requested normalizers, turns
//! their filters into connection plans, opens the feed and exposes the
//! dispatched canonical events as a [`futures::Stream`].
//!
//! # Ordering
//!
//! Normalizers contribute mappers in the order they are passed, and each
//! plugin returns its mappers in its own declared priority order. The
//! concatenation is the dispatcher's evaluation order.
//!
//! # Failure
//!
//! Only configuration problems are surfaced, and only from
//! [`stream_normalized`] itself, before any connection is attempted. Once the
//! stream is open, transport failures are retried internally and message
//! problems go to the diagnostic sink.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};

use futures::Stream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::dispatcher::MessageDispatcher;
use super::feed::{FeedRuntime, MultiConnectionFeed};
use super::registry::{ExchangeOptions, ExchangeRegistry, RegistryError};
use crate::application::ports::{ExchangeFeed, Mapper};
use crate::domain::connection::ConnectionSession;
use crate::domain::events::NormalizedEvent;
use crate::domain::filter::{FilterError, merge_filters};
use crate::domain::message::RawMessage;

// =============================================================================
// Normalizers
// =============================================================================

/// Selects a family of mappers from an exchange plugin.
pub type Normalizer = fn(&dyn ExchangeFeed) -> Vec<Arc<dyn Mapper>>;

/// Trade mappers of the exchange.
#[must_use]
pub fn normalize_trades(feed: &dyn ExchangeFeed) -> Vec<Arc<dyn Mapper>> {
    feed.trade_mappers()
}

/// Order book snapshot and delta mappers of the exchange.
#[must_use]
pub fn normalize_book_changes(feed: &dyn ExchangeFeed) -> Vec<Arc<dyn Mapper>> {
    feed.book_change_mappers()
}

// =============================================================================
// Configuration
// =============================================================================

/// What to stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamConfig {
    /// Registered exchange id.
    pub exchange: String,
    /// Symbols in exchange notation; casing is left to the mappers.
    pub symbols: Vec<String>,
    /// Per-exchange options.
    pub options: ExchangeOptions,
}

impl StreamConfig {
    /// Config for an exchange and symbol list with default options.
    #[must_use]
    pub fn new<I, S>(exchange: impl Into<String>, symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exchange: exchange.into(),
            symbols: symbols.into_iter().map(Into::into).collect(),
            options: ExchangeOptions::default(),
        }
    }

    /// Replace the exchange options.
    #[must_use]
    pub fn with_options(mut self, options: ExchangeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Errors raised before any connection is opened.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    /// Unknown exchange id.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Invalid subscription configuration.
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// No normalizer was given, or none produced a mapper.
    #[error("no mappers selected for exchange '{0}'")]
    NoMappers(String),
}

// =============================================================================
// Entry Point
// =============================================================================

/// Open a normalized event stream.
///
/// # Errors
///
/// Returns [`NormalizeError`] for an unknown exchange, an empty normalizer
/// selection, or a configuration-fatal filter. No network I/O happens in
/// those cases.
pub fn stream_normalized(
    registry: &ExchangeRegistry,
    runtime: &FeedRuntime,
    config: &StreamConfig,
    normalizers: &[Normalizer],
) -> Result<NormalizedStream, NormalizeError> {
    let feed = registry.create(&config.exchange, &config.options)?;

    let mappers: Vec<Arc<dyn Mapper>> = normalizers
        .iter()
        .flat_map(|normalize| normalize(feed.as_ref()))
        .collect();
    if mappers.is_empty() {
        return Err(NormalizeError::NoMappers(config.exchange.clone()));
    }

    let filters = merge_filters(mappers.iter().flat_map(|m| m.filters(&config.symbols)));
    let plans = feed.connection_plans(&filters, &config.symbols)?;

    tracing::debug!(
        exchange = %config.exchange,
        mappers = ?mappers.iter().map(|m| m.name()).collect::<Vec<_>>(),
        filters = ?filters,
        "Resolved subscriptions"
    );

    let (multi, raw) = MultiConnectionFeed::open(
        feed.as_ref(),
        plans,
        runtime,
        CancellationToken::new(),
    )?;
    let dispatcher = MessageDispatcher::new(
        feed.exchange(),
        mappers,
        Arc::clone(&runtime.diagnostics),
    );

    Ok(NormalizedStream {
        raw,
        dispatcher,
        pending: VecDeque::new(),
        stages: Vec::new(),
        feed: Some(multi),
    })
}

// =============================================================================
// Normalized Stream
// =============================================================================

/// Transform stage applied to every canonical event; `None` drops it.
pub type Stage = Box<dyn Fn(NormalizedEvent) -> Option<NormalizedEvent> + Send + Sync>;

/// Unbounded stream of canonical events.
///
/// Ends only after [`NormalizedStream::close`]. Dropping the stream cancels
/// every connection and snapshot task.
pub struct NormalizedStream {
    raw: mpsc::Receiver<RawMessage>,
    dispatcher: MessageDispatcher,
    pending: VecDeque<NormalizedEvent>,
    stages: Vec<Stage>,
    feed: Option<MultiConnectionFeed>,
}

impl NormalizedStream {
    /// Append a transform stage. Stages run in the order they are added.
    #[must_use]
    pub fn with_stage<F>(mut self, stage: F) -> Self
    where
        F: Fn(NormalizedEvent) -> Option<NormalizedEvent> + Send + Sync + 'static,
    {
        self.stages.push(Box::new(stage));
        self
    }

    /// Session observers, one per transport connection. Empty once closed.
    #[must_use]
    pub fn sessions(&self) -> &[watch::Receiver<ConnectionSession>] {
        match &self.feed {
            Some(feed) => feed.sessions(),
            None => &[],
        }
    }

    /// Whether [`NormalizedStream::close`] was called.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.feed.is_none()
    }

    /// Stop every task and end the stream.
    pub async fn close(&mut self) {
        if let Some(feed) = self.feed.take() {
            tracing::info!("Closing normalized stream");
            feed.shutdown().await;
        }
        self.raw.close();
        self.pending.clear();
    }

    fn apply_stages(&self, event: NormalizedEvent) -> Option<NormalizedEvent> {
        self.stages
            .iter()
            .try_fold(event, |event, stage| stage(event))
    }
}

impl Stream for NormalizedStream {
    type Item = NormalizedEvent;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.feed.is_none() {
            return Poll::Ready(None);
        }

        loop {
            while let Some(event) = this.pending.pop_front() {
                if let Some(event) = this.apply_stages(event) {
                    return Poll::Ready(Some(event));
                }
            }

            match ready!(this.raw.poll_recv(cx)) {
                Some(message) => this.pending.extend(this.dispatcher.dispatch(&message)),
                None => return Poll::Ready(None),
            }
        }
    }
}

impl std::fmt::Debug for NormalizedStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NormalizedStream")
            .field("mappers", &self.dispatcher.len())
            .field("stages", &self.stages.len())
            .field("pending", &self.pending.len())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
