//! Protocol messages.
//!
//! Control messages (heartbeat, handshake, disconnect) are first-class kinds
//! rather than payload conventions, so the connection can act on them without
//! inspecting payload contents.

use std::borrow::Cow;

use serde_json::Value;

/// A single protocol message, produced by the codec on decode or by the
/// application on send.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Liveness probe carrying a monotonic counter.
    Heartbeat(u64),

    /// First message of a session: the session id plus negotiated timeouts.
    Handshake(String),

    /// Terminal message; either side sending it ends the session.
    Disconnect,

    /// An application text payload.
    Text(String),

    /// An application payload carrying a structured value, serialized at
    /// encode time.
    Json(Value),
}

impl Message {
    /// Build a text message.
    #[must_use]
    pub fn text(payload: impl Into<String>) -> Self {
        Self::Text(payload.into())
    }

    /// Build a JSON message from a structured value.
    #[must_use]
    pub fn json(value: impl Into<Value>) -> Self {
        Self::Json(value.into())
    }

    /// Whether this is a control message the connection consumes internally.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        matches!(
            self,
            Self::Heartbeat(_) | Self::Handshake(_) | Self::Disconnect
        )
    }

    /// The textual payload of this message.
    ///
    /// JSON payloads are serialized; heartbeat and disconnect render their
    /// control payloads.
    #[must_use]
    pub fn payload(&self) -> Cow<'_, str> {
        match self {
            Self::Heartbeat(n) => Cow::Owned(n.to_string()),
            Self::Handshake(info) => Cow::Borrowed(info),
            Self::Disconnect => Cow::Borrowed(""),
            Self::Text(s) => Cow::Borrowed(s),
            Self::Json(v) => Cow::Owned(v.to_string()),
        }
    }

    /// The structured value of a JSON message.
    #[must_use]
    pub const fn as_json(&self) -> Option<&Value> {
        match self {
            Self::Json(v) => Some(v),
            _ => None,
        }
    }

    /// Short kind name, for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Heartbeat(_) => "heartbeat",
            Self::Handshake(_) => "handshake",
            Self::Disconnect => "disconnect",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
        }
    }
}

impl From<&str> for Message {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Message {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Value> for Message {
    fn from(v: Value) -> Self {
        Self::Json(v)
    }
}
