//! # tether_core
//!
//! The server-side core of a bidirectional browser↔server message-delivery
//! system. A client negotiates a session once, then exchanges messages over
//! whichever HTTP-based transport its environment supports; when a transport
//! drops, the client reconnects and resumes against the same session without
//! losing messages.
//!
//! This crate owns the transport-independent pieces:
//!
//! - [`Message`] and the pluggable [`Codec`] framer
//! - the [`Socket`](socket::Socket) contract transports satisfy per exchange
//! - [`Conn`], the session state machine with its queue, pumps, and timers
//! - [`Hub`], the process-wide registry with broadcast and user callbacks
//!
//! HTTP routing and the concrete transports live in `tether_http`.

pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod message;
pub mod session;
pub mod socket;
pub mod transport;

pub use codec::{wire::WireCodec, Codec, Decoder};
pub use config::Config;
pub use connection::{Conn, ConnStats, Lifecycle};
pub use error::{ConnError, DecodeError, HubError, SocketError};
pub use hub::{Hub, HubStats};
pub use message::Message;
pub use session::SessionId;
pub use socket::{Socket, SocketReader, SocketWriter};
pub use transport::Transport;
