//! The `xhr-polling` transport: one batch per GET, inbound bytes per POST.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use tether_core::{Conn, Transport};

use crate::exchange::{deliver_payload, poll_payload, text_response};
use crate::transport::HttpTransport;

/// Long-polling over plain XHR.
#[derive(Debug, Clone)]
pub struct XhrPolling {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl XhrPolling {
    /// Create the transport with explicit timeouts. The read timeout bounds
    /// how long a GET poll hangs open; keep it under the hub's disconnect
    /// timeout.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for XhrPolling {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(10))
    }
}

impl Transport for XhrPolling {
    fn resource(&self) -> &'static str {
        "xhr-polling"
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[async_trait]
impl HttpTransport for XhrPolling {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        if request.method() == Method::GET {
            match poll_payload(&conn, self.read_timeout).await {
                Ok(payload) => text_response("text/plain; charset=utf-8", payload),
                Err(response) => response,
            }
        } else {
            let (parts, body) = request.into_parts();
            deliver_payload(&conn, &parts.headers, body).await
        }
    }
}
