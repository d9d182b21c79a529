//! In-memory fakes shared by the service unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::application::ports::{
    ControlFrame, Diagnostic, DiagnosticSink, ExchangeFeed, ExchangeProtocol, Frame, HttpClient,
    Mapper, MockHttpClient, SnapshotSource, SubscribeRequest, TransportError,
    WebSocketConnection, WebSocketConnector,
};
use crate::application::services::feed::FeedRuntime;
use crate::domain::connection::ConnectionPlan;
use crate::domain::filter::{Filter, FilterError};
use crate::infrastructure::config::{FeedSettings, WebSocketSettings};

/// Collects every diagnostic.
#[derive(Default)]
pub struct RecordingSink(pub Mutex<Vec<Diagnostic>>);

impl DiagnosticSink for RecordingSink {
    fn report(&self, diagnostic: Diagnostic) {
        self.0.lock().push(diagnostic);
    }
}

/// One subscribe request per filter; frames are classified by their `t`
/// field (`ack`, `nack`, `hb`, `err`, anything else is data).
pub struct TestProtocol;

#[async_trait]
impl ExchangeProtocol for TestProtocol {
    fn exchange(&self) -> &str {
        "test"
    }

    async fn resolve_endpoint(
        &self,
        _http: &dyn HttpClient,
        _timeout: Duration,
    ) -> Result<String, TransportError> {
        Ok("ws://test".to_string())
    }

    fn subscribe_requests(&self, filters: &[Filter]) -> Result<Vec<SubscribeRequest>, FilterError> {
        filters
            .iter()
            .enumerate()
            .map(|(i, filter)| {
                filter.require_symbols()?;
                Ok(SubscribeRequest {
                    id: i.to_string(),
                    payload: json!({"sub": filter.channel, "id": i}).to_string(),
                    channels: vec![filter.channel.clone()],
                })
            })
            .collect()
    }

    fn classify(&self, payload: &Value) -> ControlFrame {
        let request_id = || payload["id"].as_str().unwrap_or_default().to_string();
        match payload["t"].as_str() {
            Some("ack") => ControlFrame::Acknowledged {
                request_id: request_id(),
            },
            Some("nack") => ControlFrame::Rejected {
                request_id: request_id(),
                reason: "denied".to_string(),
            },
            Some("hb") => ControlFrame::Heartbeat,
            Some("err") => ControlFrame::Error("boom".to_string()),
            _ => ControlFrame::Data,
        }
    }
}

/// Each `connect` pops the next scripted socket; frames sent by the
/// connection are logged.
#[derive(Default)]
pub struct ScriptedConnector {
    sockets: Mutex<VecDeque<mpsc::Receiver<Frame>>>,
    /// Frames sent over any socket.
    pub sent: Arc<Mutex<Vec<Frame>>>,
}

impl ScriptedConnector {
    /// Queue a socket and return the handle feeding its inbound frames.
    pub fn script(&self) -> mpsc::Sender<Frame> {
        let (tx, rx) = mpsc::channel(64);
        self.sockets.lock().push_back(rx);
        tx
    }
}

struct ScriptedSocket {
    inbound: mpsc::Receiver<Frame>,
    sent: Arc<Mutex<Vec<Frame>>>,
}

#[async_trait]
impl WebSocketConnector for ScriptedConnector {
    async fn connect(&self, _url: &str) -> Result<Box<dyn WebSocketConnection>, TransportError> {
        let inbound = self
            .sockets
            .lock()
            .pop_front()
            .ok_or_else(|| TransportError::Connect("no scripted socket".to_string()))?;
        Ok(Box::new(ScriptedSocket {
            inbound,
            sent: Arc::clone(&self.sent),
        }))
    }
}

#[async_trait]
impl WebSocketConnection for ScriptedSocket {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.sent.lock().push(frame);
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {}
}

/// Snapshot source wrapping responses as `{"symbol": .., "data": ..}`.
pub struct UrlSource;

impl SnapshotSource for UrlSource {
    fn snapshot_url(&self, symbol: &str) -> String {
        format!("http://rest/{symbol}")
    }

    fn snapshot_message(&self, symbol: &str, response: Value) -> Value {
        json!({"symbol": symbol, "data": response})
    }
}

/// Plugin assembled from test parts.
pub struct StubFeed {
    /// Trade mappers.
    pub trades: Vec<Arc<dyn Mapper>>,
    /// Book change mappers.
    pub books: Vec<Arc<dyn Mapper>>,
    /// Snapshot source.
    pub source: Option<Arc<dyn SnapshotSource>>,
    /// Plans returned regardless of filters; `None` means one socket plan
    /// over all filters.
    pub plans: Option<Vec<ConnectionPlan>>,
}

impl ExchangeFeed for StubFeed {
    fn exchange(&self) -> &str {
        "test"
    }

    fn trade_mappers(&self) -> Vec<Arc<dyn Mapper>> {
        self.trades.clone()
    }

    fn book_change_mappers(&self) -> Vec<Arc<dyn Mapper>> {
        self.books.clone()
    }

    fn protocol(&self) -> Arc<dyn ExchangeProtocol> {
        Arc::new(TestProtocol)
    }

    fn snapshot_source(&self) -> Option<Arc<dyn SnapshotSource>> {
        self.source.clone()
    }

    fn connection_plans(
        &self,
        filters: &[Filter],
        _symbols: &[String],
    ) -> Result<Vec<ConnectionPlan>, FilterError> {
        Ok(self
            .plans
            .clone()
            .unwrap_or_else(|| vec![ConnectionPlan::socket(filters.to_vec())]))
    }
}

/// Settings with short heartbeats and a long reconnect delay so tests can
/// observe `Reconnecting`.
pub fn test_settings() -> FeedSettings {
    FeedSettings {
        websocket: WebSocketSettings {
            heartbeat_interval: Duration::from_millis(20),
            heartbeat_timeout: Duration::from_secs(5),
            reconnect_delay_initial: Duration::from_secs(10),
            reconnect_delay_max: Duration::from_secs(10),
            reconnect_delay_multiplier: 1.0,
            subscribe_timeout: Duration::from_secs(5),
            negotiate_timeout: Duration::from_secs(1),
        },
        max_buffered_messages: 4,
        ..FeedSettings::default()
    }
}

/// Runtime over the given fakes.
pub fn runtime(
    connector: Arc<ScriptedConnector>,
    http: MockHttpClient,
    sink: Arc<RecordingSink>,
    settings: FeedSettings,
) -> FeedRuntime {
    FeedRuntime {
        connector,
        http: Arc::new(http),
        diagnostics: sink,
        settings,
    }
}

/// Text frame from a JSON value.
pub fn text(value: Value) -> Frame {
    Frame::Text(value.to_string())
}
