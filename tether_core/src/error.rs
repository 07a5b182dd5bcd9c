//! Error types surfaced by the core.

use thiserror::Error;

/// Problem mutating hub wiring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HubError {
    /// Callbacks may only be installed before the routes are mounted.
    #[error("hub wiring already bound")]
    AlreadyBound,
}

/// Problem operating on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConnError {
    /// The connection has reached its terminal state.
    #[error("connection is disconnected")]
    Disconnected,

    /// A second socket attach raced an in-progress one.
    #[error("a socket attach is already in progress")]
    AlreadyAttached,

    /// The outbound queue exceeded its soft cap; the connection was
    /// disconnected rather than dropping messages.
    #[error("outbound queue overflow")]
    QueueOverflow,
}

/// Terminal socket conditions, as reported by transport-built sockets.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SocketError {
    /// A read or write exceeded the transport's configured timeout.
    #[error("socket operation timed out")]
    Timeout,

    /// The exchange is over; no further reads or writes are possible.
    #[error("socket closed")]
    Closed,

    /// Any other transport-level failure.
    #[error("socket i/o error: {0}")]
    Io(String),
}

/// Problem decoding the inbound byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The cursor hit bytes it cannot recover from. Fatal to the connection.
    #[error("malformed frame: {0}")]
    MalformedFrame(&'static str),
}
