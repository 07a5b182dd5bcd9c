//! The hub: process-wide session registry, broadcast, and user callbacks.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};

use crate::config::Config;
use crate::connection::Conn;
use crate::error::HubError;
use crate::message::Message;
use crate::session::SessionId;

type ConnCallback = Box<dyn Fn(&Conn) + Send + Sync>;
type MessageCallback = Box<dyn Fn(&Conn, Message) + Send + Sync>;

/// Internal dispatch seam between a connection and its hub.
///
/// Connections never reach back into the hub directly; they talk to this
/// capability set, which the hub implements.
pub(crate) trait Observer: Send + Sync {
    fn connected(&self, conn: &Conn);
    fn message(&self, conn: &Conn, message: Message);
    fn disconnected(&self, conn: &Conn);
}

/// Counter snapshot for the whole process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HubStats {
    /// Sessions ever created.
    pub total_sessions: u64,

    /// HTTP requests routed through the hub.
    pub total_requests: u64,

    /// Packets written by disconnected sessions.
    pub total_packets_sent: u64,

    /// Packets received by disconnected sessions.
    pub total_packets_received: u64,

    /// Sessions currently alive.
    pub active_sessions: usize,
}

/// The process-wide session registry.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    config: Config,
    sessions: RwLock<HashMap<SessionId, Conn>>,
    staged: Mutex<Callbacks>,
    bound: OnceLock<Callbacks>,
    total_sessions: AtomicU64,
    total_requests: AtomicU64,
    total_packets_sent: AtomicU64,
    total_packets_received: AtomicU64,
}

#[derive(Default)]
struct Callbacks {
    connect: Option<ConnCallback>,
    disconnect: Option<ConnCallback>,
    message: Option<MessageCallback>,
}

impl Hub {
    /// Create a hub with the given configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(HubInner {
                config,
                sessions: RwLock::new(HashMap::new()),
                staged: Mutex::new(Callbacks::default()),
                bound: OnceLock::new(),
                total_sessions: AtomicU64::new(0),
                total_requests: AtomicU64::new(0),
                total_packets_sent: AtomicU64::new(0),
                total_packets_received: AtomicU64::new(0),
            }),
        }
    }

    /// The hub's configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Install the on-connect callback.
    ///
    /// # Errors
    ///
    /// [`HubError::AlreadyBound`] once routes have been mounted.
    pub fn on_connect(
        &self,
        callback: impl Fn(&Conn) + Send + Sync + 'static,
    ) -> Result<(), HubError> {
        self.stage(|callbacks| callbacks.connect = Some(Box::new(callback)))
    }

    /// Install the on-disconnect callback.
    ///
    /// # Errors
    ///
    /// [`HubError::AlreadyBound`] once routes have been mounted.
    pub fn on_disconnect(
        &self,
        callback: impl Fn(&Conn) + Send + Sync + 'static,
    ) -> Result<(), HubError> {
        self.stage(|callbacks| callbacks.disconnect = Some(Box::new(callback)))
    }

    /// Install the on-message callback.
    ///
    /// # Errors
    ///
    /// [`HubError::AlreadyBound`] once routes have been mounted.
    pub fn on_message(
        &self,
        callback: impl Fn(&Conn, Message) + Send + Sync + 'static,
    ) -> Result<(), HubError> {
        self.stage(|callbacks| callbacks.message = Some(Box::new(callback)))
    }

    fn stage(&self, install: impl FnOnce(&mut Callbacks)) -> Result<(), HubError> {
        if self.inner.bound.get().is_some() {
            return Err(HubError::AlreadyBound);
        }
        install(&mut self.inner.staged.lock().expect("callback lock poisoned"));
        Ok(())
    }

    /// Freeze callback wiring. Called by the router constructor; callback
    /// installation afterwards fails with [`HubError::AlreadyBound`].
    ///
    /// # Errors
    ///
    /// [`HubError::AlreadyBound`] on a second bind.
    pub fn bind(&self) -> Result<(), HubError> {
        let staged = std::mem::take(&mut *self.inner.staged.lock().expect("callback lock poisoned"));
        self.inner
            .bound
            .set(staged)
            .map_err(|_| HubError::AlreadyBound)
    }

    /// Mint a new session connection.
    ///
    /// The session is registered with the hub (and counted) only once its
    /// first socket attach succeeds; a connection that never establishes
    /// is simply dropped.
    #[must_use]
    pub fn create_conn(&self) -> Conn {
        let id = SessionId::random();
        let observer = Arc::new(HubObserver {
            hub: Arc::downgrade(&self.inner),
        });
        let conn = Conn::new(id, &self.inner.config, observer);
        tracing::debug!(session_id = %id, "session minted");
        conn
    }

    /// Look up a live session.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Conn> {
        self.inner.sessions().get(&id).cloned()
    }

    /// Enqueue a message to every live connection.
    ///
    /// Non-blocking per connection; a slow consumer cannot stall the
    /// broadcast.
    pub fn broadcast(&self, message: impl Into<Message>) {
        self.fan_out(None, message.into());
    }

    /// Enqueue a message to every live connection except one.
    pub fn broadcast_except(&self, except: &Conn, message: impl Into<Message>) {
        self.fan_out(Some(except), message.into());
    }

    fn fan_out(&self, except: Option<&Conn>, message: Message) {
        let conns: Vec<Conn> = self.inner.sessions().values().cloned().collect();
        for conn in conns {
            if except.is_some_and(|skip| *skip == conn) {
                continue;
            }
            if let Err(err) = conn.send(message.clone()) {
                tracing::debug!(session_id = %conn.session_id(), %err, "broadcast skipped connection");
            }
        }
    }

    /// Count one routed HTTP request.
    pub fn note_request(&self) {
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    /// Check an `Origin` header value against the configured allow-list.
    #[must_use]
    pub fn origin_allowed(&self, origin: &str) -> bool {
        self.inner.config.origin_allowed(origin)
    }

    /// Counter snapshot.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        HubStats {
            total_sessions: self.inner.total_sessions.load(Ordering::Relaxed),
            total_requests: self.inner.total_requests.load(Ordering::Relaxed),
            total_packets_sent: self.inner.total_packets_sent.load(Ordering::Relaxed),
            total_packets_received: self.inner.total_packets_received.load(Ordering::Relaxed),
            active_sessions: self.inner.sessions().len(),
        }
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub")
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

impl HubInner {
    fn sessions(&self) -> RwLockReadGuard<'_, HashMap<SessionId, Conn>> {
        self.sessions.read().expect("session map lock poisoned")
    }

    fn sessions_mut(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, Conn>> {
        self.sessions.write().expect("session map lock poisoned")
    }

    fn callbacks(&self) -> Option<&Callbacks> {
        self.bound.get()
    }
}

struct HubObserver {
    hub: Weak<HubInner>,
}

impl Observer for HubObserver {
    fn connected(&self, conn: &Conn) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };

        hub.sessions_mut().insert(conn.session_id(), conn.clone());
        hub.total_sessions.fetch_add(1, Ordering::Relaxed);
        tracing::info!(session_id = %conn.session_id(), "session established");

        if let Some(callback) = hub.callbacks().and_then(|c| c.connect.as_ref()) {
            guard_callback("on_connect", || callback(conn));
        }
    }

    fn message(&self, conn: &Conn, message: Message) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };
        if let Some(callback) = hub.callbacks().and_then(|c| c.message.as_ref()) {
            guard_callback("on_message", || callback(conn, message));
        }
    }

    fn disconnected(&self, conn: &Conn) {
        let Some(hub) = self.hub.upgrade() else {
            return;
        };

        hub.sessions_mut().remove(&conn.session_id());
        let stats = conn.stats();
        hub.total_packets_sent
            .fetch_add(stats.packets_sent, Ordering::Relaxed);
        hub.total_packets_received
            .fetch_add(stats.packets_received, Ordering::Relaxed);

        if let Some(callback) = hub.callbacks().and_then(|c| c.disconnect.as_ref()) {
            guard_callback("on_disconnect", || callback(conn));
        }
    }
}

/// Run a user callback, isolating panics from the protocol.
fn guard_callback(name: &'static str, callback: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(callback)).is_err() {
        tracing::error!(callback = name, "user callback panicked");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bytes::Bytes;

    use crate::error::SocketError;
    use crate::socket::{Socket, SocketReader, SocketWriter};

    struct SilentReader;

    #[async_trait]
    impl SocketReader for SilentReader {
        async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
            Ok(None)
        }
    }

    struct SinkWriter;

    #[async_trait]
    impl SocketWriter for SinkWriter {
        async fn write(&mut self, _chunk: Bytes) -> Result<(), SocketError> {
            Ok(())
        }

        async fn close(&mut self) {}
    }

    fn test_socket() -> Socket {
        Socket::new(Box::new(SilentReader), Box::new(SinkWriter))
    }

    #[test]
    fn callbacks_reject_installation_after_bind() {
        let hub = Hub::new(Config::default());
        hub.on_connect(|_| {}).expect("install");
        hub.bind().expect("bind");

        assert_eq!(hub.on_connect(|_| {}), Err(HubError::AlreadyBound));
        assert_eq!(hub.on_message(|_, _| {}), Err(HubError::AlreadyBound));
        assert_eq!(hub.on_disconnect(|_| {}), Err(HubError::AlreadyBound));
    }

    #[test]
    fn bind_twice_fails() {
        let hub = Hub::new(Config::default());
        hub.bind().expect("bind");
        assert_eq!(hub.bind(), Err(HubError::AlreadyBound));
    }

    #[test]
    fn minted_sessions_are_unregistered_until_attach() {
        let hub = Hub::new(Config::default());
        hub.bind().expect("bind");

        let conn = hub.create_conn();
        assert!(hub.get(conn.session_id()).is_none());
        assert_eq!(hub.stats().total_sessions, 0);
        assert_eq!(hub.stats().active_sessions, 0);
    }

    #[tokio::test]
    async fn sessions_register_on_first_attach_and_evict_on_disconnect() {
        use crate::connection::Lifecycle;

        let hub = Hub::new(Config::default());
        hub.bind().expect("bind");

        let conn = hub.create_conn();
        let id = conn.session_id();

        conn.attach(test_socket()).await.expect("attach");
        assert_eq!(hub.get(id), Some(conn.clone()));
        assert_eq!(hub.stats().total_sessions, 1);
        assert_eq!(hub.stats().active_sessions, 1);

        // The socket reports end-of-exchange straight away; once the conn
        // has observed the detach, close() evicts synchronously.
        for _ in 0..100 {
            if conn.lifecycle() == Lifecycle::Detached {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(conn.lifecycle(), Lifecycle::Detached);

        conn.close();
        assert!(hub.get(id).is_none());
        assert_eq!(hub.stats().active_sessions, 0);
        assert_eq!(hub.stats().total_sessions, 1);
    }

    #[test]
    fn disconnect_callback_panics_are_isolated() {
        let hub = Hub::new(Config::default());
        hub.on_disconnect(|_| panic!("boom")).expect("install");
        hub.bind().expect("bind");

        let conn = hub.create_conn();
        conn.close();
        assert!(hub.get(conn.session_id()).is_none());
    }
}
