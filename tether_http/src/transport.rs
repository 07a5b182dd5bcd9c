//! The HTTP face of a transport.

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::Request;
use axum::response::Response;
use tether_core::{Conn, Transport};

use crate::flashsocket::Flashsocket;
use crate::htmlfile::Htmlfile;
use crate::jsonp::JsonpPolling;
use crate::multipart::XhrMultipart;
use crate::polling::XhrPolling;
use crate::websocket::WebSocketTransport;

/// A [`Transport`] that can bind an HTTP exchange to a connection.
///
/// `accept` performs whatever upgrade the transport needs (WebSocket
/// handshake, polling headers, iframe prelude), builds the per-exchange
/// socket, attaches it to the connection, and produces the HTTP response.
#[async_trait]
pub trait HttpTransport: Transport {
    /// Bind one HTTP exchange to the given connection.
    async fn accept(&self, conn: Conn, request: Request) -> Response;
}

/// The full transport set browser clients negotiate, in registration order.
#[must_use]
pub fn default_transports() -> Vec<Arc<dyn HttpTransport>> {
    vec![
        Arc::new(XhrPolling::default()),
        Arc::new(XhrMultipart::default()),
        Arc::new(JsonpPolling::default()),
        Arc::new(Htmlfile::default()),
        Arc::new(WebSocketTransport::default()),
        Arc::new(Flashsocket::default()),
    ]
}
