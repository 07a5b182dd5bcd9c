//! The socket contract between transports and connections.
//!
//! A [`Socket`] adapts one HTTP exchange (a poll, a streaming response, an
//! upgraded WebSocket) to a uniform byte-chunk duplex. Transports build the
//! reader/writer halves; the connection's pumps drive them and never see
//! transport specifics.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::SocketError;

/// Inbound half of a socket.
#[async_trait]
pub trait SocketReader: Send + 'static {
    /// Wait for the next chunk of client bytes.
    ///
    /// `Ok(None)` signals end-of-exchange, which the connection treats as a
    /// detach rather than a disconnect.
    ///
    /// # Errors
    ///
    /// [`SocketError::Timeout`] when the transport's read timeout elapses;
    /// other terminal failures as [`SocketError::Io`].
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError>;
}

/// Outbound half of a socket.
#[async_trait]
pub trait SocketWriter: Send + 'static {
    /// Transmit one encoded chunk in full.
    ///
    /// # Errors
    ///
    /// [`SocketError::Closed`] once the exchange is over (the chunk was not
    /// delivered), [`SocketError::Timeout`] on write deadline.
    async fn write(&mut self, chunk: Bytes) -> Result<(), SocketError>;

    /// Release the exchange. Idempotent.
    async fn close(&mut self);
}

/// One HTTP exchange, adapted for a connection to pump.
pub struct Socket {
    /// Inbound half.
    pub reader: Box<dyn SocketReader>,

    /// Outbound half.
    pub writer: Box<dyn SocketWriter>,
}

impl Socket {
    /// Pair a reader and writer into a socket.
    #[must_use]
    pub fn new(reader: Box<dyn SocketReader>, writer: Box<dyn SocketWriter>) -> Self {
        Self { reader, writer }
    }
}

impl std::fmt::Debug for Socket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Socket").finish_non_exhaustive()
    }
}
