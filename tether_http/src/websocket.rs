//! The `websocket` transport.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Request};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use tether_core::{Conn, Socket, SocketError, SocketReader, SocketWriter, Transport};
use tokio::sync::mpsc;

use crate::exchange::{attach_error, status};
use crate::transport::HttpTransport;

/// Full-duplex transport over an upgraded WebSocket.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl WebSocketTransport {
    /// Create the transport with explicit timeouts.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10))
    }
}

impl Transport for WebSocketTransport {
    fn resource(&self) -> &'static str {
        "websocket"
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[async_trait]
impl HttpTransport for WebSocketTransport {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        if request.method() != Method::GET {
            return status(axum::http::StatusCode::BAD_REQUEST);
        }

        let (mut parts, _body) = request.into_parts();
        let upgrade = match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
            Ok(upgrade) => upgrade,
            Err(rejection) => return rejection.into_response(),
        };

        let (in_tx, in_rx) = mpsc::channel::<Bytes>(64);
        let (out_tx, out_rx) = mpsc::channel::<Bytes>(64);

        let socket = Socket::new(
            Box::new(WsReader {
                rx: in_rx,
                read_timeout: self.read_timeout,
            }),
            Box::new(WsWriter {
                tx: Some(out_tx),
                write_timeout: self.write_timeout,
            }),
        );
        if let Err(err) = conn.attach(socket).await {
            return attach_error(&conn, &err);
        }

        upgrade.on_upgrade(move |stream| bridge(stream, in_tx, out_rx))
    }
}

/// Shovel frames between the upgraded stream and the socket channels until
/// either side ends.
async fn bridge(mut stream: WebSocket, in_tx: mpsc::Sender<Bytes>, mut out_rx: mpsc::Receiver<Bytes>) {
    loop {
        tokio::select! {
            incoming = stream.recv() => match incoming {
                Some(Ok(WsMessage::Text(text))) => {
                    if in_tx.send(Bytes::from(text.as_str().to_owned())).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Binary(data))) => {
                    if in_tx.send(data).await.is_err() {
                        break;
                    }
                }
                Some(Ok(WsMessage::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(WsMessage::Ping(_) | WsMessage::Pong(_))) => {}
            },
            outgoing = out_rx.recv() => match outgoing {
                Some(chunk) => {
                    let frame = match String::from_utf8(chunk.to_vec()) {
                        Ok(text) => WsMessage::Text(text.into()),
                        Err(_) => WsMessage::Binary(chunk),
                    };
                    if stream.send(frame).await.is_err() {
                        break;
                    }
                }
                None => {
                    let _ = stream.send(WsMessage::Close(None)).await;
                    break;
                }
            },
        }
    }
    // Dropping `in_tx` reports end-of-exchange to the read pump.
}

struct WsReader {
    rx: mpsc::Receiver<Bytes>,
    read_timeout: Duration,
}

#[async_trait]
impl SocketReader for WsReader {
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        match tokio::time::timeout(self.read_timeout, self.rx.recv()).await {
            Ok(chunk) => Ok(chunk),
            Err(_) => Err(SocketError::Timeout),
        }
    }
}

struct WsWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    write_timeout: Duration,
}

#[async_trait]
impl SocketWriter for WsWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SocketError> {
        let Some(tx) = &self.tx else {
            return Err(SocketError::Closed);
        };
        match tokio::time::timeout(self.write_timeout, tx.send(chunk)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::Closed),
            Err(_) => Err(SocketError::Timeout),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}
