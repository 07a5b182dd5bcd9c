//! The `jsonp-polling` transport: like `xhr-polling`, but payloads come
//! back wrapped in a script call for `<script>`-tag transports.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::Method;
use axum::response::Response;
use bytes::Bytes;
use tether_core::{Conn, Transport};

use crate::exchange::{deliver_payload, js_string, poll_payload, text_response};
use crate::transport::HttpTransport;

/// Long-polling via dynamically inserted script tags.
#[derive(Debug, Clone)]
pub struct JsonpPolling {
    read_timeout: Duration,
    write_timeout: Duration,
}

impl JsonpPolling {
    /// Create the transport with explicit timeouts.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
        }
    }
}

impl Default for JsonpPolling {
    fn default() -> Self {
        Self::new(Duration::from_secs(15), Duration::from_secs(10))
    }
}

impl Transport for JsonpPolling {
    fn resource(&self) -> &'static str {
        "jsonp-polling"
    }

    fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    fn write_timeout(&self) -> Duration {
        self.write_timeout
    }
}

#[async_trait]
impl HttpTransport for JsonpPolling {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        if request.method() == Method::GET {
            let index = script_index(&request);
            match poll_payload(&conn, self.read_timeout).await {
                Ok(payload) => {
                    let text = String::from_utf8_lossy(&payload);
                    let script = format!("io.JSONP[{index}]._({});", js_string(&text));
                    text_response("text/javascript; charset=utf-8", Bytes::from(script))
                }
                Err(response) => response,
            }
        } else {
            let (parts, body) = request.into_parts();
            deliver_payload(&conn, &parts.headers, body).await
        }
    }
}

/// The `i` query parameter names which client-side script slot is polling.
fn script_index(request: &Request) -> u32 {
    request
        .uri()
        .query()
        .and_then(|query| {
            form_urlencoded::parse(query.as_bytes())
                .find(|(key, _)| key == "i")
                .and_then(|(_, value)| value.parse().ok())
        })
        .unwrap_or(0)
}
