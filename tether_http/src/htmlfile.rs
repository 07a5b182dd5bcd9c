//! The `htmlfile` transport: a forever-iframe receiving one `<script>`
//! chunk per message.

use std::convert::Infallible;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::extract::Request;
use axum::http::{header, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use futures::StreamExt;
use tether_core::{Conn, Socket, Transport};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::exchange::{attach_error, deliver_payload, GoneReader, StreamWriter, Wrap};
use crate::transport::HttpTransport;

/// The document head: defines the forwarder and pads past the buffering
/// threshold of the browsers this transport exists for.
fn prelude() -> Bytes {
    let script = "<html><body><script>var _ = function (msg) { parent.s._(msg, document); };</script>";
    Bytes::from(format!("{script:<256}"))
}

/// Streaming over an iframe `document.write` channel.
#[derive(Debug, Clone)]
pub struct Htmlfile {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl Htmlfile {
    /// Create the transport with explicit timeouts.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for Htmlfile {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10))
    }
}

impl Transport for Htmlfile {
    fn resource(&self) -> &'static str {
        "htmlfile"
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[async_trait]
impl HttpTransport for Htmlfile {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        if request.method() != Method::GET {
            let (parts, body) = request.into_parts();
            return deliver_payload(&conn, &parts.headers, body).await;
        }

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        let _ = tx.try_send(prelude());

        let socket = Socket::new(
            Box::new(GoneReader::new(tx.clone())),
            Box::new(StreamWriter::new(tx, self.write_timeout, Wrap::HtmlScript)),
        );
        if let Err(err) = conn.attach(socket).await {
            return attach_error(&conn, &err);
        }

        let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
        Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .expect("static response")
    }
}
