//! The built-in framer, compatible with the browser client library this
//! server targets.
//!
//! Frames are `~m~<n>~m~<body>` where `<n>` is the decimal byte length of
//! the body, so payloads containing the delimiter bytes survive intact.
//! Control bodies carry a marker prefix:
//!
//! | marker | kind |
//! |---|---|
//! | `~h~<counter>` | heartbeat |
//! | `~j~<json>` | json |
//! | `~s~<info>` | handshake |
//! | `~d~` | disconnect |
//!
//! Anything else is a plain text message.

use crate::codec::{Codec, Decoder};
use crate::error::DecodeError;
use crate::message::Message;

const DELIM: &[u8] = b"~m~";

/// Upper bound on a single frame body. Frames claiming more are malformed.
const MAX_FRAME_BYTES: usize = 8 << 20;

/// Longest run of length digits worth scanning before giving up.
const MAX_LENGTH_DIGITS: usize = 8;

/// The default [`Codec`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec;

impl Codec for WireCodec {
    fn encode(&self, message: &Message) -> Vec<u8> {
        let body = match message {
            Message::Heartbeat(n) => format!("~h~{n}"),
            Message::Handshake(info) => format!("~s~{info}"),
            Message::Disconnect => "~d~".to_owned(),
            Message::Text(s) => s.clone(),
            Message::Json(v) => format!("~j~{v}"),
        };

        let mut out = Vec::with_capacity(body.len() + 16);
        out.extend_from_slice(DELIM);
        out.extend_from_slice(body.len().to_string().as_bytes());
        out.extend_from_slice(DELIM);
        out.extend_from_slice(body.as_bytes());
        out
    }

    fn decoder(&self) -> Box<dyn Decoder> {
        Box::new(WireDecoder::new())
    }
}

/// Incremental decode cursor for [`WireCodec`].
///
/// Until the first complete frame is produced the cursor scans forward for
/// a `~m~` synchronization point, so a cursor dropped onto the middle of a
/// stream recovers at the next frame boundary. Once anchored, any parse
/// failure is a [`DecodeError::MalformedFrame`].
#[derive(Debug, Default)]
pub struct WireDecoder {
    buf: Vec<u8>,
    anchored: bool,
}

impl WireDecoder {
    /// Create a cursor with an empty buffer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Try to parse one frame off the front of the buffer.
    ///
    /// `Ok(None)` means more bytes are needed.
    fn parse_front(&self) -> Result<Option<(Message, usize)>, DecodeError> {
        let buf = &self.buf;
        if buf.len() < DELIM.len() {
            return Ok(None);
        }
        if !buf.starts_with(DELIM) {
            return Err(DecodeError::MalformedFrame("expected frame delimiter"));
        }

        let digits_start = DELIM.len();
        let mut i = digits_start;
        while i < buf.len() && buf[i].is_ascii_digit() {
            i += 1;
        }
        if i - digits_start > MAX_LENGTH_DIGITS {
            return Err(DecodeError::MalformedFrame("frame length out of range"));
        }
        if i == buf.len() {
            return Ok(None);
        }
        if i == digits_start {
            return Err(DecodeError::MalformedFrame("missing frame length"));
        }

        let tail = &buf[i..];
        if tail.len() < DELIM.len() {
            return if DELIM.starts_with(tail) {
                Ok(None)
            } else {
                Err(DecodeError::MalformedFrame("bad length terminator"))
            };
        }
        if &tail[..DELIM.len()] != DELIM {
            return Err(DecodeError::MalformedFrame("bad length terminator"));
        }

        // Digits only, so both conversions are infallible short of overflow.
        let len: usize = std::str::from_utf8(&buf[digits_start..i])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(DecodeError::MalformedFrame("frame length out of range"))?;
        if len > MAX_FRAME_BYTES {
            return Err(DecodeError::MalformedFrame("frame length out of range"));
        }

        let body_start = i + DELIM.len();
        if buf.len() < body_start + len {
            return Ok(None);
        }

        let message = parse_body(&buf[body_start..body_start + len])?;
        Ok(Some((message, body_start + len)))
    }
}

impl Decoder for WireDecoder {
    fn feed(&mut self, bytes: &[u8]) -> Result<Vec<Message>, DecodeError> {
        self.buf.extend_from_slice(bytes);
        let mut out = Vec::new();

        loop {
            if !self.anchored {
                match find(&self.buf, DELIM) {
                    Some(pos) => {
                        self.buf.drain(..pos);
                    }
                    None => {
                        // Keep a possible delimiter prefix at the tail.
                        let keep = self.buf.len().min(DELIM.len() - 1);
                        let cut = self.buf.len() - keep;
                        self.buf.drain(..cut);
                        return Ok(out);
                    }
                }
            }

            match self.parse_front() {
                Ok(Some((message, consumed))) => {
                    self.buf.drain(..consumed);
                    self.anchored = true;
                    out.push(message);
                }
                Ok(None) => return Ok(out),
                Err(err) => {
                    if self.anchored {
                        return Err(err);
                    }
                    // Not yet synchronized: step past this candidate and
                    // keep scanning for the next frame boundary.
                    self.buf.drain(..1);
                }
            }
        }
    }
}

fn parse_body(body: &[u8]) -> Result<Message, DecodeError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| DecodeError::MalformedFrame("frame body is not utf-8"))?;

    if let Some(rest) = text.strip_prefix("~h~") {
        let counter = rest
            .parse()
            .map_err(|_| DecodeError::MalformedFrame("bad heartbeat counter"))?;
        return Ok(Message::Heartbeat(counter));
    }
    if let Some(rest) = text.strip_prefix("~j~") {
        let value = serde_json::from_str(rest)
            .map_err(|_| DecodeError::MalformedFrame("bad json payload"))?;
        return Ok(Message::Json(value));
    }
    if let Some(rest) = text.strip_prefix("~s~") {
        return Ok(Message::Handshake(rest.to_owned()));
    }
    if text == "~d~" {
        return Ok(Message::Disconnect);
    }
    Ok(Message::Text(text.to_owned()))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
