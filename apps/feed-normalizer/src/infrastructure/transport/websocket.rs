//! WebSocket adapter over `tokio-tungstenite`.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::{Frame, TransportError, WebSocketConnection, WebSocketConnector};

/// Opens `ws://` and `wss://` connections.
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    /// Create a connector.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl WebSocketConnector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn WebSocketConnection>, TransportError> {
        let (stream, response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        tracing::debug!(status = %response.status(), "WebSocket handshake complete");
        Ok(Box::new(TungsteniteConnection { stream }))
    }
}

struct TungsteniteConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl WebSocketConnection for TungsteniteConnection {
    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text.into()),
            Frame::Binary(data) => Message::Binary(data.into()),
            Frame::Ping(data) => Message::Ping(data.into()),
            Frame::Pong(data) => Message::Pong(data.into()),
            Frame::Close => Message::Close(None),
        };
        self.stream
            .send(message)
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            let frame = match self.stream.next().await? {
                Ok(Message::Text(text)) => Frame::Text(text.to_string()),
                Ok(Message::Binary(data)) => Frame::Binary(data.to_vec()),
                Ok(Message::Ping(data)) => Frame::Ping(data.to_vec()),
                Ok(Message::Pong(data)) => Frame::Pong(data.to_vec()),
                Ok(Message::Close(_)) => Frame::Close,
                // Raw frames only appear when writing.
                Ok(Message::Frame(_)) => continue,
                Err(e) => return Some(Err(TransportError::WebSocket(e.to_string()))),
            };
            return Some(Ok(frame));
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::debug!(error = %e, "WebSocket close failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpListener;

    use super::*;

    /// Accepts one client, echoes its first text frame, pings, then closes.
    async fn serve_once() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    ws.send(Message::Text(format!("echo:{text}").into()))
                        .await
                        .unwrap();
                    ws.send(Message::Ping(vec![7].into())).await.unwrap();
                    ws.send(Message::Close(None)).await.unwrap();
                    break;
                }
            }
        });

        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn exchanges_frames_with_server() {
        let url = serve_once().await;
        let mut socket = TungsteniteConnector::new().connect(&url).await.unwrap();

        socket.send(Frame::Text("hi".to_string())).await.unwrap();
        assert_eq!(
            socket.recv().await.unwrap().unwrap(),
            Frame::Text("echo:hi".to_string())
        );
        assert_eq!(socket.recv().await.unwrap().unwrap(), Frame::Ping(vec![7]));
        assert_eq!(socket.recv().await.unwrap().unwrap(), Frame::Close);
        socket.close().await;
    }

    #[tokio::test]
    async fn refused_connection_is_a_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = TungsteniteConnector::new()
            .connect(&format!("ws://{addr}"))
            .await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
