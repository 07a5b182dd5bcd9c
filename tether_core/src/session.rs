//! Session identifiers.
//!
//! Every connection is assigned a [`SessionId`] when the hub first sees it.
//! Clients present the id on later requests to reattach, so it is a bearer
//! token: minted from the OS CSPRNG and never derived from request data.

use core::fmt;

use rand::{rngs::OsRng, RngCore};

/// An opaque, unguessable session identifier.
///
/// Rendered as a 32-character lowercase hex string on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId([u8; 16]);

impl SessionId {
    /// Mint a fresh random session id.
    #[must_use]
    pub fn random() -> Self {
        let mut bytes = [0u8; 16];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build a session id from raw bytes. Intended for tests.
    #[must_use]
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Render the id as lowercase hex.
    #[must_use]
    pub fn to_hex(&self) -> String {
        use core::fmt::Write;

        let mut out = String::with_capacity(32);
        for byte in &self.0 {
            let _ = write!(out, "{byte:02x}");
        }
        out
    }

    /// Parse an id from its hex rendering.
    ///
    /// Returns `None` unless the input is exactly 32 hex digits.
    #[must_use]
    pub fn from_hex(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.is_ascii() {
            return None;
        }

        let mut bytes = [0u8; 16];
        for (slot, pair) in bytes.iter_mut().zip(s.as_bytes().chunks_exact(2)) {
            let hi = hex_digit(pair[0])?;
            let lo = hex_digit(pair[1])?;
            *slot = (hi << 4) | lo;
        }
        Some(Self(bytes))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

const fn hex_digit(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}
