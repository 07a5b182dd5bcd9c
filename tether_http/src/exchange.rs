//! Socket adapters over single HTTP exchanges, shared by the transports.

use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use tether_core::{Conn, ConnError, Socket, SocketError, SocketReader, SocketWriter};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Upper bound on a client POST body.
pub(crate) const MAX_POST_BYTES: usize = 1 << 20;

/// Reader for exchanges with no inbound stream of their own (a GET poll):
/// pends until the exchange is released, then reports end-of-exchange.
pub(crate) struct IdleReader {
    done: CancellationToken,
}

impl IdleReader {
    pub(crate) fn new(done: CancellationToken) -> Self {
        Self { done }
    }
}

#[async_trait]
impl SocketReader for IdleReader {
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        self.done.cancelled().await;
        Ok(None)
    }
}

/// Writer for one-shot polls: the first write becomes the response body and
/// releases the exchange.
pub(crate) struct OneShotWriter {
    tx: Option<oneshot::Sender<Bytes>>,
    done: CancellationToken,
}

impl OneShotWriter {
    pub(crate) fn new(tx: oneshot::Sender<Bytes>, done: CancellationToken) -> Self {
        Self { tx: Some(tx), done }
    }
}

#[async_trait]
impl SocketWriter for OneShotWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SocketError> {
        let Some(tx) = self.tx.take() else {
            return Err(SocketError::Closed);
        };
        let sent = tx.send(chunk).map_err(|_| SocketError::Closed);
        self.done.cancel();
        sent
    }

    async fn close(&mut self) {
        self.tx = None;
        self.done.cancel();
    }
}

/// Reader for an inbound POST: yields the decoded body once, signals when
/// the connection has consumed it, then reports end-of-exchange.
pub(crate) struct BodyReader {
    chunk: Option<Bytes>,
    consumed: Option<oneshot::Sender<()>>,
}

impl BodyReader {
    pub(crate) fn new(chunk: Bytes, consumed: oneshot::Sender<()>) -> Self {
        Self {
            chunk: Some(chunk),
            consumed: Some(consumed),
        }
    }
}

#[async_trait]
impl SocketReader for BodyReader {
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        match self.chunk.take() {
            Some(chunk) => Ok(Some(chunk)),
            None => {
                // The pump dispatched the chunk before asking again.
                if let Some(consumed) = self.consumed.take() {
                    let _ = consumed.send(());
                }
                Ok(None)
            }
        }
    }
}

/// Writer for exchanges whose response carries no messages: every write
/// fails so queued messages stay put for a real outbound socket.
pub(crate) struct RejectWriter;

#[async_trait]
impl SocketWriter for RejectWriter {
    async fn write(&mut self, _chunk: Bytes) -> Result<(), SocketError> {
        Err(SocketError::Closed)
    }

    async fn close(&mut self) {}
}

/// Reader for streaming GET responses: there are no inbound bytes, but the
/// exchange lives until the client drops the response stream.
pub(crate) struct GoneReader {
    tx: mpsc::Sender<Bytes>,
}

impl GoneReader {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl SocketReader for GoneReader {
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        self.tx.closed().await;
        Ok(None)
    }
}

/// Per-chunk framing for streaming transports.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Wrap {
    /// One `multipart/x-mixed-replace` part per message.
    MultipartPart,

    /// One `<script>` chunk per message, for the forever-iframe.
    HtmlScript,
}

impl Wrap {
    fn apply(self, chunk: &Bytes) -> Bytes {
        let text = String::from_utf8_lossy(chunk);
        let framed = match self {
            Self::MultipartPart => {
                format!("Content-Type: text/plain; charset=utf-8\n\n{text}\n--socketio\n")
            }
            Self::HtmlScript => {
                format!("<script>_({});</script>", js_string(&text))
            }
        };
        Bytes::from(framed)
    }
}

/// Writer for streaming GET responses: each write becomes one framed chunk
/// on the response stream.
pub(crate) struct StreamWriter {
    tx: Option<mpsc::Sender<Bytes>>,
    write_timeout: Duration,
    wrap: Wrap,
}

impl StreamWriter {
    pub(crate) fn new(tx: mpsc::Sender<Bytes>, write_timeout: Duration, wrap: Wrap) -> Self {
        Self {
            tx: Some(tx),
            write_timeout,
            wrap,
        }
    }
}

#[async_trait]
impl SocketWriter for StreamWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SocketError> {
        let Some(tx) = &self.tx else {
            return Err(SocketError::Closed);
        };
        let framed = self.wrap.apply(&chunk);
        match tokio::time::timeout(self.write_timeout, tx.send(framed)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(SocketError::Closed),
            Err(_) => Err(SocketError::Timeout),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// Quote a payload as a JavaScript string literal.
pub(crate) fn js_string(text: &str) -> String {
    serde_json::Value::String(text.to_owned()).to_string()
}

/// Attach a one-shot poll socket and wait for the next outbound payload.
///
/// Resolves with an empty payload when the poll times out quietly.
pub(crate) async fn poll_payload(conn: &Conn, poll_timeout: Duration) -> Result<Bytes, Response> {
    let done = CancellationToken::new();
    let (tx, rx) = oneshot::channel();
    let socket = Socket::new(
        Box::new(IdleReader::new(done.clone())),
        Box::new(OneShotWriter::new(tx, done.clone())),
    );

    if let Err(err) = conn.attach(socket).await {
        return Err(attach_error(conn, &err));
    }

    let payload = tokio::time::timeout(poll_timeout, rx).await;
    done.cancel();
    match payload {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(_)) | Err(_) => Ok(Bytes::new()),
    }
}

/// Attach a one-shot inbound socket carrying a POST body and wait until the
/// connection has consumed it.
pub(crate) async fn deliver_payload(conn: &Conn, headers: &HeaderMap, body: Body) -> Response {
    let bytes = match axum::body::to_bytes(body, MAX_POST_BYTES).await {
        Ok(bytes) => bytes,
        Err(_) => return status(StatusCode::BAD_REQUEST),
    };
    let payload = post_payload(headers, bytes);

    let (consumed_tx, consumed_rx) = oneshot::channel();
    let socket = Socket::new(
        Box::new(BodyReader::new(payload, consumed_tx)),
        Box::new(RejectWriter),
    );
    if let Err(err) = conn.attach(socket).await {
        return attach_error(conn, &err);
    }

    let _ = tokio::time::timeout(Duration::from_secs(5), consumed_rx).await;
    status(StatusCode::OK)
}

/// Unwrap the `data=` form field the polling clients POST, falling back to
/// the raw body.
fn post_payload(headers: &HeaderMap, body: Bytes) -> Bytes {
    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    if !is_form {
        return body;
    }

    form_urlencoded::parse(&body)
        .find(|(key, _)| key == "data")
        .map(|(_, value)| Bytes::from(value.into_owned()))
        .unwrap_or(body)
}

/// Plain status-only response.
pub(crate) fn status(code: StatusCode) -> Response {
    Response::builder()
        .status(code)
        .body(Body::empty())
        .expect("static response")
}

/// Response for a text payload.
pub(crate) fn text_response(content_type: &'static str, body: Bytes) -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .expect("static response")
}

/// Response for a request that could not be bound to its connection.
pub(crate) fn attach_error(conn: &Conn, err: &ConnError) -> Response {
    tracing::debug!(session_id = %conn.session_id(), %err, "attach rejected");
    status(StatusCode::UNAUTHORIZED)
}
