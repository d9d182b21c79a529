//! Multi-Connection Feed
//!
//! Fans connection plans out into concurrent tasks (one per transport
//! connection, one per snapshot injector) that all push into one bounded
//! merged channel. Producers block while the channel is full.
//!
//! Every task is constructed before any is spawned, so configuration
//! errors surface before the first network call.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};

use super::connection::TransportConnection;
use super::snapshot::SnapshotInjector;
use super::FeedRuntime;
use crate::application::ports::ExchangeFeed;
use crate::domain::connection::{ConnectionPlan, ConnectionSession, ConnectionStrategy};
use crate::domain::filter::FilterError;
use crate::domain::message::RawMessage;

/// Task waiting to be spawned.
enum Task {
    Connection(TransportConnection),
    Spliced {
        injector: SnapshotInjector,
        session: watch::Receiver<ConnectionSession>,
        done: watch::Sender<u64>,
    },
    Polling {
        injector: SnapshotInjector,
        interval: std::time::Duration,
    },
}

/// Running set of connections and snapshot producers for one session.
pub struct MultiConnectionFeed {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    sessions: Vec<watch::Receiver<ConnectionSession>>,
    _guard: DropGuard,
}

impl MultiConnectionFeed {
    /// Validate every plan, then spawn its tasks.
    ///
    /// Returns the feed and the receiving end of the merged raw channel.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] when a plan has invalid filters or needs a
    /// snapshot source the exchange does not provide. No task is spawned
    /// in that case.
    pub fn open(
        feed: &dyn ExchangeFeed,
        plans: Vec<ConnectionPlan>,
        runtime: &FeedRuntime,
        cancel: CancellationToken,
    ) -> Result<(Self, mpsc::Receiver<RawMessage>), FilterError> {
        let (output, raw_rx) = mpsc::channel(runtime.settings.channel_capacity.max(1));
        let snapshot_source = || {
            feed.snapshot_source()
                .ok_or_else(|| FilterError::SnapshotUnsupported(feed.exchange().to_string()))
        };

        let mut pending = Vec::new();
        let mut sessions = Vec::new();

        for plan in plans {
            match plan.strategy {
                ConnectionStrategy::SocketPushed => {
                    let connection = TransportConnection::new(
                        feed.protocol(),
                        &plan.filters,
                        runtime,
                        output.clone(),
                        cancel.clone(),
                    )?;
                    sessions.push(connection.session());
                    pending.push(Task::Connection(connection));
                }
                ConnectionStrategy::HybridWithManualSnapshot { snapshot_symbols } => {
                    let mut connection = TransportConnection::new(
                        feed.protocol(),
                        &plan.filters,
                        runtime,
                        output.clone(),
                        cancel.clone(),
                    )?;
                    let injector = SnapshotInjector::new(
                        feed.exchange(),
                        snapshot_source()?,
                        snapshot_symbols,
                        runtime,
                        output.clone(),
                        cancel.clone(),
                    );
                    let (done, gate) = watch::channel(0_u64);
                    connection.attach_snapshot_gate(gate);
                    let session = connection.session();
                    sessions.push(session.clone());
                    pending.push(Task::Connection(connection));
                    pending.push(Task::Spliced {
                        injector,
                        session,
                        done,
                    });
                }
                ConnectionStrategy::Polling { symbols, interval } => {
                    let injector = SnapshotInjector::new(
                        feed.exchange(),
                        snapshot_source()?,
                        symbols,
                        runtime,
                        output.clone(),
                        cancel.clone(),
                    );
                    pending.push(Task::Polling { injector, interval });
                }
            }
        }

        if pending.is_empty() {
            return Err(FilterError::Empty(feed.exchange().to_string()));
        }

        // The merged channel closes once every producer task has exited.
        drop(output);

        tracing::info!(
            exchange = feed.exchange(),
            tasks = pending.len(),
            connections = sessions.len(),
            "Opening feed"
        );

        let tasks = pending
            .into_iter()
            .map(|task| match task {
                Task::Connection(connection) => tokio::spawn(connection.run()),
                Task::Spliced {
                    injector,
                    session,
                    done,
                } => tokio::spawn(injector.run_spliced(session, done)),
                Task::Polling { injector, interval } => {
                    tokio::spawn(injector.run_polling(interval))
                }
            })
            .collect();

        Ok((
            Self {
                _guard: cancel.clone().drop_guard(),
                cancel,
                tasks,
                sessions,
            },
            raw_rx,
        ))
    }

    /// Session observers, one per transport connection.
    #[must_use]
    pub fn sessions(&self) -> &[watch::Receiver<ConnectionSession>] {
        &self.sessions
    }

    /// Signal every task to stop without waiting.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Signal every task to stop and wait for them to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Feed task ended abnormally");
            }
        }
    }
}
