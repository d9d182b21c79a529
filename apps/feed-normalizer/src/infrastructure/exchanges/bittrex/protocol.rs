//! Bittrex SignalR Protocol
//!
//! # Connection
//!
//! 1. `GET {socket}/negotiate?clientProtocol=1.5&connectionData=[{"name":"c3"}]`
//!    returns a `ConnectionToken`.
//! 2. The socket opens at `{socket}/connect` (scheme switched to `ws`/`wss`)
//!    with the transport, protocol version, token and hub list as query
//!    parameters.
//! 3. A single `Subscribe` invocation carries `heartbeat` plus one channel per
//!    filter and symbol. The result holds one outcome per channel; any
//!    failed outcome rejects the whole request.
//!
//! # Envelopes
//!
//! A data envelope may batch invocations of different hub methods
//! (`M=[heartbeat, trade, orderBook]`). Each invocation is split into its
//! own envelope, keeping the other envelope fields, before classification.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::{Value, json};

use super::messages::SubscribeOutcome;
use super::{BOOK_CHANNEL, BittrexHubMethods, TRADE_CHANNEL};
use crate::application::ports::{
    ControlFrame, ExchangeProtocol, HttpClient, SubscribeRequest, TransportError,
};
use crate::domain::filter::{Filter, FilterError};

/// SignalR client protocol version.
const CLIENT_PROTOCOL: &str = "1.5";

/// Correlation id of the single subscribe invocation.
const SUBSCRIBE_ID: &str = "1";

/// SignalR framing for the Bittrex v3 socket.
#[derive(Debug, Clone)]
pub struct BittrexProtocol {
    exchange: String,
    socket_url: String,
    hub: String,
    depth: u32,
    methods: BittrexHubMethods,
}

impl BittrexProtocol {
    /// Create the protocol for a socket base URL (`https://.../signalr`).
    #[must_use]
    pub fn new(
        exchange: impl Into<String>,
        socket_url: impl Into<String>,
        depth: u32,
        methods: BittrexHubMethods,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            socket_url: socket_url.into(),
            hub: "c3".to_string(),
            depth,
            methods,
        }
    }

    fn connection_data(&self) -> String {
        json!([{ "name": self.hub }]).to_string()
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&self.socket_url)
            .map_err(|e| TransportError::Negotiation(format!("invalid socket url: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| TransportError::Negotiation("socket url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(path);
        url.query_pairs_mut()
            .append_pair("clientProtocol", CLIENT_PROTOCOL)
            .append_pair("connectionData", &self.connection_data());
        Ok(url)
    }

    /// Socket URL for a negotiated token.
    fn connect_url(&self, token: &str) -> Result<String, TransportError> {
        let mut url = self.endpoint("connect")?;
        url.query_pairs_mut()
            .append_pair("transport", "webSockets")
            .append_pair("connectionToken", token);

        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme).map_err(|()| {
            TransportError::Negotiation(format!("cannot switch {} to {scheme}", url.scheme()))
        })?;
        Ok(url.into())
    }

    fn channels(&self, filter: &Filter) -> Result<Vec<String>, FilterError> {
        let symbols = filter.require_symbols()?;
        match filter.channel.as_str() {
            TRADE_CHANNEL => Ok(symbols.iter().map(|s| format!("trade_{s}")).collect()),
            BOOK_CHANNEL => Ok(symbols
                .iter()
                .map(|s| format!("orderbook_{s}_{}", self.depth))
                .collect()),
            other => Err(FilterError::UnknownChannel {
                exchange: self.exchange.clone(),
                channel: other.to_string(),
            }),
        }
    }

    fn is_heartbeat(&self, payload: &Value) -> bool {
        match payload.get("M") {
            // `{}` keep-alives and bare `{"I": ..}` progress frames.
            None => payload
                .as_object()
                .is_some_and(|o| o.is_empty() || o.keys().all(|k| k == "I")),
            Some(Value::Array(invocations)) => invocations.iter().all(|invocation| {
                invocation
                    .get("M")
                    .and_then(Value::as_str)
                    .is_some_and(|m| m.eq_ignore_ascii_case(&self.methods.heartbeat))
            }),
            Some(_) => false,
        }
    }
}

#[async_trait]
impl ExchangeProtocol for BittrexProtocol {
    fn exchange(&self) -> &str {
        &self.exchange
    }

    async fn resolve_endpoint(
        &self,
        http: &dyn HttpClient,
        timeout: Duration,
    ) -> Result<String, TransportError> {
        let negotiate = self.endpoint("negotiate")?;
        let response = http
            .get_json(negotiate.as_str(), timeout)
            .await
            .map_err(|e| TransportError::Negotiation(e.to_string()))?;

        let token = response
            .get("ConnectionToken")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TransportError::Negotiation("negotiate response without ConnectionToken".to_string())
            })?;

        self.connect_url(token)
    }

    fn subscribe_requests(&self, filters: &[Filter]) -> Result<Vec<SubscribeRequest>, FilterError> {
        let mut channels = Vec::new();
        for filter in filters {
            channels.extend(self.channels(filter)?);
        }
        if channels.is_empty() {
            return Ok(Vec::new());
        }
        channels.insert(0, self.methods.heartbeat.clone());

        let payload = json!({
            "H": self.hub,
            "M": "Subscribe",
            "A": [channels],
            "I": SUBSCRIBE_ID,
        });

        Ok(vec![SubscribeRequest {
            id: SUBSCRIBE_ID.to_string(),
            payload: payload.to_string(),
            channels,
        }])
    }

    fn classify(&self, payload: &Value) -> ControlFrame {
        if let Some(error) = payload.get("E") {
            return ControlFrame::Error(
                error.as_str().map_or_else(|| error.to_string(), str::to_string),
            );
        }

        if let Some(result) = payload.get("R") {
            let request_id = match payload.get("I") {
                Some(Value::String(id)) => id.clone(),
                Some(other) => other.to_string(),
                None => String::new(),
            };

            let rejected = match result {
                Value::Bool(ok) => (!ok).then(|| "subscribe returned false".to_string()),
                Value::Array(_) => match serde_json::from_value::<Vec<SubscribeOutcome>>(result.clone()) {
                    Ok(outcomes) => outcomes.into_iter().find(|o| !o.success).map(|o| {
                        o.error_code.unwrap_or_else(|| "unknown error".to_string())
                    }),
                    Err(e) => Some(format!("unreadable subscribe result: {e}")),
                },
                other => Some(format!("unexpected subscribe result: {other}")),
            };

            return match rejected {
                Some(reason) => ControlFrame::Rejected { request_id, reason },
                None => ControlFrame::Acknowledged { request_id },
            };
        }

        if self.is_heartbeat(payload) {
            ControlFrame::Heartbeat
        } else {
            ControlFrame::Data
        }
    }

    fn split(&self, payload: Value) -> Vec<Value> {
        let mut envelope = match payload {
            Value::Object(envelope) => envelope,
            other => return vec![other],
        };

        match envelope.remove("M") {
            Some(Value::Array(invocations)) if invocations.len() > 1 => invocations
                .into_iter()
                .map(|invocation| {
                    let mut single = envelope.clone();
                    single.insert("M".to_string(), Value::Array(vec![invocation]));
                    Value::Object(single)
                })
                .collect(),
            Some(invocations) => {
                envelope.insert("M".to_string(), invocations);
                vec![Value::Object(envelope)]
            }
            None => vec![Value::Object(envelope)],
        }
    }
}

#[cfg(test)]
mod tests {
    use test_case::test_case;

    use super::*;
    use crate::application::ports::{HttpError, MockHttpClient};

    fn protocol() -> BittrexProtocol {
        BittrexProtocol::new(
            "bittrex",
            "https://socket-v3.bittrex.com/signalr",
            25,
            BittrexHubMethods::default(),
        )
    }

    #[test]
    fn subscribe_invocation_lists_every_channel() {
        let requests = protocol()
            .subscribe_requests(&[
                Filter::with_symbols(TRADE_CHANNEL, ["ETH-USD", "ETH-BTC"]),
                Filter::with_symbols(BOOK_CHANNEL, ["ETH-USD"]),
            ])
            .unwrap();
        assert_eq!(requests.len(), 1);

        let payload: Value = serde_json::from_str(&requests[0].payload).unwrap();
        assert_eq!(payload["H"], "c3");
        assert_eq!(payload["M"], "Subscribe");
        assert_eq!(payload["I"], "1");
        assert_eq!(
            payload["A"][0],
            json!(["heartbeat", "trade_ETH-USD", "trade_ETH-BTC", "orderbook_ETH-USD_25"])
        );
        assert_eq!(requests[0].channels.len(), 4);
    }

    #[test]
    fn live_channel_without_symbols_is_fatal() {
        let err = protocol()
            .subscribe_requests(&[Filter::channel(TRADE_CHANNEL)])
            .unwrap_err();
        assert_eq!(
            err,
            FilterError::MissingSymbols {
                channel: TRADE_CHANNEL.to_string()
            }
        );
    }

    #[test]
    fn unknown_channel_is_fatal() {
        let err = protocol()
            .subscribe_requests(&[Filter::with_symbols("ticker", ["ETH-USD"])])
            .unwrap_err();
        assert!(matches!(err, FilterError::UnknownChannel { .. }));
    }

    #[test_case(json!({"R": [{"Success": true}, {"Success": true}], "I": "1"}), ControlFrame::Acknowledged { request_id: "1".to_string() }; "all channels subscribed")]
    #[test_case(json!({"R": true, "I": "1"}), ControlFrame::Acknowledged { request_id: "1".to_string() }; "boolean result")]
    #[test_case(json!({"R": [{"Success": true}, {"Success": false, "ErrorCode": "INVALID_CHANNEL"}], "I": "1"}), ControlFrame::Rejected { request_id: "1".to_string(), reason: "INVALID_CHANNEL".to_string() }; "one channel rejected")]
    #[test_case(json!({"E": "Hub not found", "I": "1"}), ControlFrame::Error("Hub not found".to_string()); "invocation error")]
    #[test_case(json!({}), ControlFrame::Heartbeat; "keep alive")]
    #[test_case(json!({"C": "d-1", "S": 1, "M": []}), ControlFrame::Heartbeat; "init frame")]
    #[test_case(json!({"I": "0"}), ControlFrame::Heartbeat; "progress frame")]
    #[test_case(json!({"C": "d-2", "M": [{"H": "C3", "M": "heartbeat", "A": []}]}), ControlFrame::Heartbeat; "heartbeat invocation")]
    #[test_case(json!({"C": "d-3", "M": [{"H": "C3", "M": "trade", "A": ["x"]}]}), ControlFrame::Data; "trade invocation")]
    #[test_case(json!({"stream": "eth-usd@orderBook"}), ControlFrame::Data; "other payload")]
    fn classifies_frames(payload: Value, expected: ControlFrame) {
        assert_eq!(protocol().classify(&payload), expected);
    }

    #[test]
    fn mixed_envelope_splits_per_invocation() {
        let protocol = protocol();
        let parts = protocol.split(json!({
            "C": "d-4",
            "M": [
                {"H": "C3", "M": "heartbeat", "A": []},
                {"H": "C3", "M": "trade", "A": ["t"]},
                {"H": "C3", "M": "orderBook", "A": ["b"]}
            ]
        }));

        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p["C"] == "d-4"));
        assert_eq!(parts[1]["M"], json!([{"H": "C3", "M": "trade", "A": ["t"]}]));
        assert_eq!(parts[2]["M"][0]["M"], "orderBook");

        let kinds: Vec<_> = parts.iter().map(|p| protocol.classify(p)).collect();
        assert_eq!(
            kinds,
            vec![ControlFrame::Heartbeat, ControlFrame::Data, ControlFrame::Data]
        );
    }

    #[test_case(json!({"C": "d-5", "M": [{"H": "C3", "M": "trade", "A": ["x"]}]}); "single invocation")]
    #[test_case(json!({"R": true, "I": "1"}); "subscribe result")]
    #[test_case(json!({}); "keep alive")]
    #[test_case(json!([1, 2]); "non object")]
    fn other_payloads_stay_whole(payload: Value) {
        assert_eq!(protocol().split(payload.clone()), vec![payload]);
    }

    #[tokio::test]
    async fn negotiation_builds_socket_url() {
        let mut http = MockHttpClient::new();
        http.expect_get_json()
            .withf(|url, _| {
                url.starts_with("https://socket-v3.bittrex.com/signalr/negotiate?")
                    && url.contains("clientProtocol=1.5")
            })
            .returning(|_, _| Ok(json!({"ConnectionToken": "tok/en+1"})));

        let url = protocol()
            .resolve_endpoint(&http, Duration::from_secs(1))
            .await
            .unwrap();
        let parsed = Url::parse(&url).unwrap();
        assert_eq!(parsed.scheme(), "wss");
        assert_eq!(parsed.path(), "/signalr/connect");

        let query: std::collections::HashMap<_, _> = parsed.query_pairs().into_owned().collect();
        assert_eq!(query["connectionToken"], "tok/en+1");
        assert_eq!(query["transport"], "webSockets");
        assert_eq!(query["connectionData"], r#"[{"name":"c3"}]"#);
    }

    #[tokio::test]
    async fn negotiation_failure_is_a_transport_error() {
        let mut http = MockHttpClient::new();
        http.expect_get_json()
            .returning(|url, _| Err(HttpError::Timeout(url.to_string())));

        let err = protocol()
            .resolve_endpoint(&http, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Negotiation(_)));
    }

    #[tokio::test]
    async fn missing_token_is_a_transport_error() {
        let mut http = MockHttpClient::new();
        http.expect_get_json().returning(|_, _| Ok(json!({})));

        let err = protocol()
            .resolve_endpoint(&http, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::Negotiation(_)));
    }

    #[test]
    fn plain_http_base_switches_to_ws() {
        let protocol =
            BittrexProtocol::new("bittrex", "http://127.0.0.1:9000/signalr/", 25, BittrexHubMethods::default());
        let url = protocol.connect_url("t").unwrap();
        assert!(url.starts_with("ws://127.0.0.1:9000/signalr/connect?"));
    }
}
