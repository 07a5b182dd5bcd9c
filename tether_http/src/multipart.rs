//! The `xhr-multipart` transport: a streaming `multipart/x-mixed-replace`
//! response, one part per message.

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

/// Streaming XHR over multipart parts.
#[derive(Debug, Clone)]
pub struct XhrMultipart {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl XhrMultipart {
    /// Create the transport with explicit timeouts.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for XhrMultipart {
    fn default() -> Self {
        Self::new(Duration::from_secs(60), Duration::from_secs(10))
    }
}

impl Transport for XhrMultipart {
    fn resource(&self) -> &'static str {
        "xhr-multipart"
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[async_trait]
impl HttpTransport for XhrMultipart {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        if request.method() != Method::GET {
            let (parts, body) = request.into_parts();
            return deliver_payload(&conn, &parts.headers, body).await;
        }

        let (tx, rx) = mpsc::channel::<Bytes>(32);
        // Leading boundary before the first part; the channel is empty so
        // this cannot fail.
        let _ = tx.try_send(Bytes::from_static(b"--socketio\n"));

        let socket = Socket::new(
            Box::new(GoneReader::new(tx.clone())),
            Box::new(StreamWriter::new(tx, self.write_timeout, Wrap::MultipartPart)),
        );
        if let Err(err) = conn.attach(socket).await {
            return attach_error(&conn, &err);
        }

        let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
        Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                "multipart/x-mixed-replace; boundary=\"socketio\"",
            )
            .header(header::CONNECTION, "keep-alive")
            .body(Body::from_stream(stream))
            .expect("static response")
    }
}
