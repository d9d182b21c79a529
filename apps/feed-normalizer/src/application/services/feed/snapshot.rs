//! Snapshot Injector
//!
//! Fetches full order book snapshots over HTTP and pushes them into the
//! merged raw message channel as `generated` messages.
//!
//! # Modes
//!
//! - **Spliced**: runs beside a [`TransportConnection`](super::TransportConnection).
//!   Every time the connection reaches `Live` (a new live epoch), the
//!   snapshots are fetched and pushed, then the epoch is published so the
//!   connection releases the deltas it held back.
//! - **Polling**: for snapshot-only feeds, the fetch cycle re-runs on a
//!   fixed interval for as long as the feed is open.
//!
//! Symbols are fetched in bounded-parallel batches and forwarded in symbol
//! order. A failed fetch skips that symbol for the current cycle. The abort
//! check runs before every symbol.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::FeedRuntime;
use crate::application::ports::{Diagnostic, DiagnosticSink, HttpClient, HttpError, SnapshotSource};
use crate::domain::connection::{ConnectionId, ConnectionSession, ConnectionState};
use crate::domain::message::RawMessage;
use crate::infrastructure::config::SnapshotSettings;
use crate::infrastructure::metrics::{self, FetchOutcome};

/// Result of one fetch cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectOutcome {
    /// Every symbol was attempted.
    Completed {
        /// Snapshots pushed.
        pushed: usize,
        /// Symbols skipped after a failed fetch.
        failed: usize,
    },
    /// The abort check fired; the cycle was abandoned.
    Aborted,
    /// Shutdown was requested or the output channel closed.
    Stopped,
}

/// Out-of-band snapshot producer for a set of symbols.
pub struct SnapshotInjector {
    id: ConnectionId,
    exchange: String,
    source: Arc<dyn SnapshotSource>,
    http: Arc<dyn HttpClient>,
    diagnostics: Arc<dyn DiagnosticSink>,
    symbols: Vec<String>,
    settings: SnapshotSettings,
    output: mpsc::Sender<RawMessage>,
    cancel: CancellationToken,
}

impl SnapshotInjector {
    /// Create an injector.
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        source: Arc<dyn SnapshotSource>,
        symbols: Vec<String>,
        runtime: &FeedRuntime,
        output: mpsc::Sender<RawMessage>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id: ConnectionId::new(),
            exchange: exchange.into(),
            source,
            http: Arc::clone(&runtime.http),
            diagnostics: Arc::clone(&runtime.diagnostics),
            symbols,
            settings: runtime.settings.snapshot.clone(),
            output,
            cancel,
        }
    }

    /// Producer identity stamped on generated messages.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Fetch and push one snapshot per symbol.
    ///
    /// `abort` is consulted before each symbol fetch and before each push.
    pub async fn inject_once(&self, abort: impl Fn() -> bool) -> InjectOutcome {
        let mut pushed = 0;
        let mut failed = 0;

        for batch in self.symbols.chunks(self.settings.batch_size.max(1)) {
            let mut fetches = Vec::with_capacity(batch.len());
            for symbol in batch {
                if self.cancel.is_cancelled() {
                    return InjectOutcome::Stopped;
                }
                if abort() {
                    return InjectOutcome::Aborted;
                }
                fetches.push(self.fetch(symbol));
            }

            let results = tokio::select! {
                () = self.cancel.cancelled() => return InjectOutcome::Stopped,
                results = join_all(fetches) => results,
            };

            for (symbol, result) in batch.iter().zip(results) {
                match result {
                    Ok(response) => {
                        if abort() {
                            return InjectOutcome::Aborted;
                        }
                        metrics::record_snapshot_fetch(&self.exchange, FetchOutcome::Success);
                        let payload = self.source.snapshot_message(symbol, response);
                        let message = RawMessage::generated(self.id, payload);
                        let sent = tokio::select! {
                            () = self.cancel.cancelled() => false,
                            sent = self.output.send(message) => sent.is_ok(),
                        };
                        if !sent {
                            return InjectOutcome::Stopped;
                        }
                        pushed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            exchange = %self.exchange,
                            symbol = %symbol,
                            error = %e,
                            "Snapshot fetch failed, skipping symbol"
                        );
                        metrics::record_snapshot_fetch(&self.exchange, FetchOutcome::Failure);
                        self.diagnostics.report(Diagnostic::SnapshotFetchFailed {
                            connection_id: self.id,
                            symbol: symbol.clone(),
                            error: e.to_string(),
                        });
                        failed += 1;
                    }
                }
            }
        }

        InjectOutcome::Completed { pushed, failed }
    }

    /// Inject snapshots once per live epoch of the owning connection, then
    /// publish the epoch on `done`.
    pub async fn run_spliced(
        self,
        mut session: watch::Receiver<ConnectionSession>,
        done: watch::Sender<u64>,
    ) {
        let mut served = 0_u64;

        loop {
            let epoch = tokio::select! {
                () = self.cancel.cancelled() => return,
                live = session.wait_for(|s| s.state == ConnectionState::Live && s.live_epoch > served) => {
                    match live {
                        Ok(s) => s.live_epoch,
                        Err(_) => return,
                    }
                }
            };

            let still_live = || {
                let current = session.borrow();
                current.state == ConnectionState::Live && current.live_epoch == epoch
            };

            match self.inject_once(still_live).await {
                InjectOutcome::Completed { pushed, failed } => {
                    tracing::info!(
                        exchange = %self.exchange,
                        epoch,
                        pushed,
                        failed,
                        "Snapshots spliced"
                    );
                    done.send_replace(epoch);
                    served = epoch;
                }
                InjectOutcome::Aborted => {
                    tracing::debug!(exchange = %self.exchange, epoch, "Snapshot run aborted by reconnect");
                    served = epoch;
                }
                InjectOutcome::Stopped => return,
            }
        }
    }

    /// Re-run the fetch cycle every `interval` until shutdown.
    pub async fn run_polling(self, interval: Duration) {
        loop {
            if self.inject_once(|| false).await == InjectOutcome::Stopped {
                return;
            }

            tokio::select! {
                () = self.cancel.cancelled() => return,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn fetch(&self, symbol: &str) -> Result<serde_json::Value, HttpError> {
        let url = self.source.snapshot_url(symbol);
        let timeout = self.settings.fetch_timeout;
        tokio::time::timeout(timeout, self.http.get_json(&url, timeout))
            .await
            .map_err(|_| HttpError::Timeout(url.clone()))?
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::application::ports::MockHttpClient;
    use crate::application::services::testing::{
        RecordingSink, ScriptedConnector, UrlSource, runtime,
    };
    use crate::infrastructure::config::FeedSettings;

    fn symbols(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("S{i}")).collect()
    }

    fn injector(
        http: MockHttpClient,
        symbols: Vec<String>,
        sink: Arc<RecordingSink>,
    ) -> (SnapshotInjector, mpsc::Receiver<RawMessage>, CancellationToken) {
        let runtime = runtime(
            Arc::new(ScriptedConnector::default()),
            http,
            sink,
            FeedSettings::default(),
        );
        let (tx, rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();
        let injector =
            SnapshotInjector::new("test", Arc::new(UrlSource), symbols, &runtime, tx, cancel.clone());
        (injector, rx, cancel)
    }

    fn drain(rx: &mut mpsc::Receiver<RawMessage>) -> Vec<RawMessage> {
        let mut out = Vec::new();
        while let Ok(message) = rx.try_recv() {
            out.push(message);
        }
        out
    }

    #[tokio::test]
    async fn fetches_every_symbol_in_order_across_batches() {
        let mut http = MockHttpClient::new();
        http.expect_get_json()
            .times(12)
            .returning(|url, _| Ok(json!({"url": url})));

        let (injector, mut rx, _cancel) =
            injector(http, symbols(12), Arc::new(RecordingSink::default()));
        let outcome = injector.inject_once(|| false).await;
        assert_eq!(outcome, InjectOutcome::Completed { pushed: 12, failed: 0 });

        let messages = drain(&mut rx);
        let order: Vec<_> = messages
            .iter()
            .map(|m| m.payload["symbol"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, symbols(12));
        assert!(messages.iter().all(|m| m.generated));
        assert_eq!(messages[0].payload["data"]["url"], "http://rest/S0");
    }

    #[tokio::test]
    async fn failed_symbol_is_skipped() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().returning(|url, _| {
            if url.ends_with("S1") {
                Err(HttpError::Timeout(url.to_string()))
            } else {
                Ok(json!({}))
            }
        });

        let sink = Arc::new(RecordingSink::default());
        let (injector, mut rx, _cancel) = injector(http, symbols(3), sink.clone());
        let outcome = injector.inject_once(|| false).await;
        assert_eq!(outcome, InjectOutcome::Completed { pushed: 2, failed: 1 });

        let order: Vec<_> = drain(&mut rx)
            .iter()
            .map(|m| m.payload["symbol"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(order, vec!["S0", "S2"]);
        assert!(matches!(
            &sink.0.lock()[0],
            Diagnostic::SnapshotFetchFailed { symbol, .. } if symbol == "S1"
        ));
    }

    #[tokio::test]
    async fn abort_check_runs_before_fetching() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().times(0);

        let (injector, mut rx, _cancel) =
            injector(http, symbols(3), Arc::new(RecordingSink::default()));
        assert_eq!(injector.inject_once(|| true).await, InjectOutcome::Aborted);
        assert!(drain(&mut rx).is_empty());
    }

    #[tokio::test]
    async fn cancelled_injector_stops() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().times(0);

        let (injector, _rx, cancel) =
            injector(http, symbols(3), Arc::new(RecordingSink::default()));
        cancel.cancel();
        assert_eq!(injector.inject_once(|| false).await, InjectOutcome::Stopped);
    }

    #[tokio::test]
    async fn spliced_run_publishes_epoch_after_push() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().returning(|_, _| Ok(json!({})));

        let (injector, mut rx, cancel) =
            injector(http, symbols(2), Arc::new(RecordingSink::default()));
        let (session_tx, session_rx) = watch::channel(ConnectionSession::new(ConnectionId::new()));
        let (done_tx, mut done_rx) = watch::channel(0_u64);

        let handle = tokio::spawn(injector.run_spliced(session_rx, done_tx));

        session_tx.send_modify(ConnectionSession::go_live);
        done_rx.wait_for(|served| *served == 1).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 2);

        // A reconnect produces a new epoch and a new injection.
        session_tx.send_modify(|s| {
            s.begin_reconnecting();
            s.go_live();
        });
        done_rx.wait_for(|served| *served == 2).await.unwrap();
        assert_eq!(drain(&mut rx).len(), 2);

        cancel.cancel();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn polling_repeats_on_interval() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().returning(|_, _| Ok(json!({})));

        let (injector, mut rx, cancel) =
            injector(http, symbols(1), Arc::new(RecordingSink::default()));
        let handle = tokio::spawn(injector.run_polling(Duration::from_millis(10)));

        for _ in 0..3 {
            let message = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(message.generated);
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
