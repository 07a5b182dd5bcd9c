//! Message framing.
//!
//! A [`Codec`] turns [`Message`]s into self-delimiting byte frames and back.
//! Encoding is stateless; decoding happens through a per-connection
//! [`Decoder`] cursor that accepts bytes incrementally and retains trailing
//! partial frames between calls.
//!
//! The built-in framer lives in [`wire`]; hubs accept any implementation.

pub mod wire;

use crate::error::DecodeError;
use crate::message::Message;

/// A pluggable message framer.
pub trait Codec: Send + Sync {
    /// Encode one message into a self-delimiting byte frame.
    ///
    /// Concatenating the output of several calls must yield a stream a
    /// [`Decoder`] can split back apart without shared state.
    fn encode(&self, message: &Message) -> Vec<u8>;

    /// Create a fresh decode cursor.
    fn decoder(&self) -> Box<dyn Decoder>;
}

/// A stateful decode cursor over an inbound byte stream.
pub trait Decoder: Send {
    /// Consume a chunk of bytes and return every message completed by it.
    ///
    /// Incomplete trailing frames are buffered for the next call. A cursor
    /// created mid-stream may skip forward to the next synchronization
    /// point before producing its first message.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::MalformedFrame`] when the stream cannot be
    /// recovered; the connection treats this as fatal.
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, DecodeError>;
}
