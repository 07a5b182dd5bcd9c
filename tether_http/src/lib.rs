//! # tether_http
//!
//! The HTTP face of the tether server: the axum router binding that mounts
//! a [`Hub`](tether_core::Hub)'s transports under a resource prefix, the
//! browser transport adapters, and the auxiliary Flash policy listener.
//!
//! ```no_run
//! use std::sync::Arc;
//! use tether_core::{Config, Hub};
//! use tether_http::{default_transports, mux};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let hub = Hub::new(Config::default());
//! hub.on_message(|conn, message| {
//!     let _ = conn.send(message.payload().into_owned());
//! })?;
//!
//! let router = mux(&hub, "/sio/", default_transports())?;
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

mod exchange;

pub mod flashsocket;
pub mod htmlfile;
pub mod jsonp;
pub mod multipart;
pub mod mux;
pub mod policy;
pub mod polling;
pub mod transport;
pub mod websocket;

pub use flashsocket::Flashsocket;
pub use htmlfile::Htmlfile;
pub use jsonp::JsonpPolling;
pub use multipart::XhrMultipart;
pub use mux::{mux, MuxError};
pub use policy::{serve_flash_policy, PolicyServer};
pub use polling::XhrPolling;
pub use transport::{default_transports, HttpTransport};
pub use websocket::WebSocketTransport;
