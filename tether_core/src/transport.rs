//! Transport metadata.
//!
//! The core treats transports opaquely: everything transport-specific lives
//! in the [`Socket`](crate::socket::Socket) the transport builds per
//! exchange. What the core needs to know fits in this trait.

use std::time::Duration;

/// A strategy for carrying bytes between a browser and this server.
pub trait Transport: Send + Sync {
    /// URL segment this transport is mounted under.
    fn resource(&self) -> &'static str;

    /// How long a socket read may block before surfacing a timeout.
    fn read_timeout(&self) -> Duration;

    /// How long a socket write may block before surfacing a timeout.
    fn write_timeout(&self) -> Duration;
}
