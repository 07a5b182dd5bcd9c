//! The `flashsocket` transport: the WebSocket wire protocol reached through
//! a Flash shim, so it only differs in its resource name. The companion
//! policy listener lives in [`crate::policy`].

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use tether_core::{Conn, Transport};

use crate::transport::HttpTransport;
use crate::websocket::WebSocketTransport;

/// WebSocket semantics under the `flashsocket` resource.
#[derive(Debug, Clone, Default)]
pub struct Flashsocket {
    inner: WebSocketTransport,
}

impl Flashsocket {
    /// Create the transport with explicit timeouts.
    #[must_use]
    pub const fn new(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            inner: WebSocketTransport::new(read_timeout, write_timeout),
        }
    }
}

impl Transport for Flashsocket {
    fn resource(&self) -> &'static str {
        "flashsocket"
    }

    fn read_timeout(&self) -> Duration {
        self.inner.read_timeout()
    }

    fn write_timeout(&self) -> Duration {
        self.inner.write_timeout()
    }
}

#[async_trait]
impl HttpTransport for Flashsocket {
    async fn accept(&self, conn: Conn, request: Request) -> Response {
        self.inner.accept(conn, request).await
    }
}
