//! Hub configuration.

use std::sync::Arc;
use std::time::Duration;

use crate::codec::wire::WireCodec;
use crate::codec::Codec;

/// Configuration passed at hub construction.
#[derive(Clone)]
pub struct Config {
    /// Cadence of outbound heartbeats. Zero disables them.
    pub heartbeat_interval: Duration,

    /// How long a connection may stay detached or silent before it is
    /// forcibly disconnected.
    pub disconnect_timeout: Duration,

    /// Allowed cross-origin peers as `host[:port]`, where either component
    /// may be `*`. Empty means every cross-origin request is rejected.
    pub origins: Vec<String>,

    /// The message framer. Defaults to the built-in [`WireCodec`].
    pub codec: Arc<dyn Codec>,

    /// Soft cap on the outbound queue; exceeding it disconnects the
    /// connection rather than dropping messages.
    pub queue_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            disconnect_timeout: Duration::from_secs(25),
            origins: Vec::new(),
            codec: Arc::new(WireCodec),
            queue_limit: 1024,
        }
    }
}

impl Config {
    /// Set the heartbeat cadence. Zero disables outbound heartbeats.
    #[must_use]
    pub const fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the disconnect timeout.
    #[must_use]
    pub const fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    /// Set the cross-origin allow-list.
    #[must_use]
    pub fn origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.origins = origins.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the message framer.
    #[must_use]
    pub fn codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Set the outbound queue soft cap.
    #[must_use]
    pub const fn queue_limit(mut self, limit: usize) -> Self {
        self.queue_limit = limit;
        self
    }

    /// Check a request's `Origin` header value against the allow-list.
    ///
    /// An allow-list entry matches when its host is `*` or equals the
    /// origin's host, and its port is absent, `*`, or equals the origin's
    /// port. An origin without an explicit port gets the scheme default
    /// (80 for `http`/`ws`, 443 for `https`/`wss`) before comparison.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        let Some((scheme, rest)) = origin.split_once("://") else {
            return false;
        };
        let authority = rest.split('/').next().unwrap_or("");
        if authority.is_empty() {
            return false;
        }

        let (host, port) = match authority.split_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        };

        for entry in &self.origins {
            let (allow_host, allow_port) = match entry.split_once(':') {
                Some((h, p)) => (h, Some(p)),
                None => (entry.as_str(), None),
            };

            if allow_host != "*" && allow_host != host {
                continue;
            }
            let Some(allow_port) = allow_port else {
                return true;
            };
            if allow_port == "*" {
                return true;
            }
            match port {
                Some(port) => {
                    if allow_port == port {
                        return true;
                    }
                }
                None => {
                    let default_port = match scheme {
                        "http" | "ws" => "80",
                        "https" | "wss" => "443",
                        _ => continue,
                    };
                    if allow_port == default_port {
                        return true;
                    }
                }
            }
        }

        false
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("heartbeat_interval", &self.heartbeat_interval)
            .field("disconnect_timeout", &self.disconnect_timeout)
            .field("origins", &self.origins)
            .field("queue_limit", &self.queue_limit)
            .finish_non_exhaustive()
    }
}
