//! The connection: the stateful heart of a session.
//!
//! A [`Conn`] owns the outbound message queue, the decode cursor, the
//! heartbeat and watchdog timers, and at most one attached socket. Sockets
//! come and go with HTTP exchanges; the connection and its queue persist
//! until the session is disconnected.
//!
//! Three tasks run per connection while it lives: a read pump and a write
//! pump per attached socket, plus the timer pair started on the first
//! attach. Disconnection is level-triggered through a cancellation token;
//! every task observes it on its next suspension point.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{Codec, Decoder};
use crate::config::Config;
use crate::error::{ConnError, DecodeError};
use crate::hub::Observer;
use crate::message::Message;
use crate::session::SessionId;
use crate::socket::{Socket, SocketReader, SocketWriter};

/// How long a graceful close waits for the terminal disconnect frame to
/// flush before tearing the connection down regardless.
const DISCONNECT_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Where a connection is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// Created; no socket has ever attached.
    Handshaking,

    /// A socket is attached and the pumps are running.
    Active,

    /// No socket attached; the queue is retained for the next attach.
    Detached,

    /// Terminal.
    Disconnected,
}

/// Packet counters for one connection. Monotonic until disconnect.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnStats {
    /// Messages fully written to a socket.
    pub packets_sent: u64,

    /// Messages decoded off the inbound stream.
    pub packets_received: u64,
}

/// A server-side session connection. Cheap to clone; all clones share the
/// same state.
#[derive(Clone)]
pub struct Conn {
    inner: Arc<ConnInner>,
}

struct ConnInner {
    id: SessionId,
    codec: Arc<dyn Codec>,
    observer: Arc<dyn Observer>,
    heartbeat_interval: Duration,
    disconnect_timeout: Duration,
    queue_limit: usize,
    state: Mutex<ConnState>,
    decoder: Mutex<Box<dyn Decoder>>,
    wake: Notify,
    shutdown: CancellationToken,
    attachment: tokio::sync::Mutex<Option<Attachment>>,
}

struct ConnState {
    lifecycle: Lifecycle,
    queue: VecDeque<Message>,
    stats: ConnStats,
    heartbeats_sent: u64,
    last_inbound: Instant,
    generation: u64,
    timers_started: bool,
}

struct Attachment {
    generation: u64,
    token: CancellationToken,
    done: JoinHandle<()>,
}

impl Conn {
    pub(crate) fn new(id: SessionId, config: &Config, observer: Arc<dyn Observer>) -> Self {
        Self {
            inner: Arc::new(ConnInner {
                id,
                codec: Arc::clone(&config.codec),
                observer,
                heartbeat_interval: config.heartbeat_interval,
                disconnect_timeout: config.disconnect_timeout,
                queue_limit: config.queue_limit,
                state: Mutex::new(ConnState {
                    lifecycle: Lifecycle::Handshaking,
                    queue: VecDeque::new(),
                    stats: ConnStats::default(),
                    heartbeats_sent: 0,
                    last_inbound: Instant::now(),
                    generation: 0,
                    timers_started: false,
                }),
                decoder: Mutex::new(config.codec.decoder()),
                wake: Notify::new(),
                shutdown: CancellationToken::new(),
                attachment: tokio::sync::Mutex::new(None),
            }),
        }
    }

    /// This connection's session id.
    #[must_use]
    pub fn session_id(&self) -> SessionId {
        self.inner.id
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.inner.state().lifecycle
    }

    /// Packet counter snapshot.
    #[must_use]
    pub fn stats(&self) -> ConnStats {
        self.inner.state().stats
    }

    /// Enqueue a message for delivery.
    ///
    /// Never waits on socket I/O; the queue survives socket detachment and
    /// drains in FIFO order whenever a socket is attached.
    ///
    /// # Errors
    ///
    /// [`ConnError::Disconnected`] once the connection is terminal, and
    /// [`ConnError::QueueOverflow`] when the enqueue pushed the queue past
    /// its soft cap (which disconnects the session rather than dropping).
    pub fn send(&self, message: impl Into<Message>) -> Result<(), ConnError> {
        let message = message.into();
        let overflow = {
            let mut state = self.inner.state();
            if state.lifecycle == Lifecycle::Disconnected {
                return Err(ConnError::Disconnected);
            }
            state.queue.push_back(message);
            state.queue.len() > self.inner.queue_limit
        };
        self.inner.wake.notify_one();

        if overflow {
            tracing::warn!(
                session_id = %self.inner.id,
                limit = self.inner.queue_limit,
                "outbound queue overflow, disconnecting"
            );
            self.force_disconnect();
            return Err(ConnError::QueueOverflow);
        }
        Ok(())
    }

    /// Disconnect the session.
    ///
    /// When a socket is attached, a terminal disconnect frame is enqueued
    /// and the write pump gets a bounded grace period to flush it; the
    /// connection then becomes [`Lifecycle::Disconnected`] either way.
    /// Idempotent.
    pub fn close(&self) {
        let flush = {
            let mut state = self.inner.state();
            match state.lifecycle {
                Lifecycle::Disconnected => return,
                Lifecycle::Active => {
                    state.queue.push_back(Message::Disconnect);
                    true
                }
                Lifecycle::Handshaking | Lifecycle::Detached => false,
            }
        };

        if flush {
            self.inner.wake.notify_one();
            let conn = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(DISCONNECT_FLUSH_GRACE).await;
                conn.force_disconnect();
            });
        } else {
            self.force_disconnect();
        }
    }

    /// Bind a freshly accepted socket to this connection.
    ///
    /// The previous socket, if any, is closed first and its pumps are
    /// awaited, so at most one socket is ever attached. On the first
    /// successful attach the handshake message is placed at the head of the
    /// queue, the timers start, and the on-connect observer fires.
    ///
    /// # Errors
    ///
    /// [`ConnError::AlreadyAttached`] when another attach is in progress;
    /// [`ConnError::Disconnected`] when the session is terminal.
    pub async fn attach(&self, socket: Socket) -> Result<(), ConnError> {
        let mut slot = self
            .inner
            .attachment
            .try_lock()
            .map_err(|_| ConnError::AlreadyAttached)?;

        if let Some(prev) = slot.take() {
            prev.token.cancel();
            let _ = prev.done.await;
        }

        let (first, generation) = {
            let mut state = self.inner.state();
            if state.lifecycle == Lifecycle::Disconnected {
                return Err(ConnError::Disconnected);
            }
            let first = state.lifecycle == Lifecycle::Handshaking;
            state.lifecycle = Lifecycle::Active;
            state.generation += 1;
            state.last_inbound = Instant::now();
            if first {
                let info = format!(
                    "{}:{}:{}",
                    self.inner.id,
                    self.inner.heartbeat_interval.as_secs(),
                    self.inner.disconnect_timeout.as_secs()
                );
                state.queue.push_front(Message::Handshake(info));
            }
            (first, state.generation)
        };

        if first {
            self.start_timers();
            self.inner.observer.connected(self);
        }

        let token = self.inner.shutdown.child_token();
        let Socket { reader, writer } = socket;
        let read_task = tokio::spawn(read_pump(self.clone(), reader, token.clone()));
        let write_task = tokio::spawn(write_pump(self.clone(), writer, token.clone()));

        let conn = self.clone();
        let done = tokio::spawn(async move {
            let _ = read_task.await;
            let _ = write_task.await;
            conn.socket_closed(generation);
        });

        *slot = Some(Attachment {
            generation,
            token,
            done,
        });
        tracing::debug!(session_id = %self.inner.id, generation, "socket attached");
        Ok(())
    }

    /// Start the heartbeat and watchdog timers. Runs once per connection.
    fn start_timers(&self) {
        {
            let mut state = self.inner.state();
            if state.timers_started {
                return;
            }
            state.timers_started = true;
        }

        if !self.inner.heartbeat_interval.is_zero() {
            tokio::spawn(heartbeat_loop(self.clone()));
        }
        tokio::spawn(watchdog_loop(self.clone()));
    }

    /// Force the terminal state. Idempotent; fires the on-disconnect
    /// observer exactly once.
    fn force_disconnect(&self) {
        let fire = {
            let mut state = self.inner.state();
            if state.lifecycle == Lifecycle::Disconnected {
                false
            } else {
                state.lifecycle = Lifecycle::Disconnected;
                true
            }
        };

        if fire {
            self.inner.shutdown.cancel();
            self.inner.wake.notify_one();
            tracing::info!(session_id = %self.inner.id, "connection disconnected");
            self.inner.observer.disconnected(self);
        }
    }

    /// Record that the socket of the given attach generation finished.
    fn socket_closed(&self, generation: u64) {
        let mut state = self.inner.state();
        if state.generation == generation && state.lifecycle == Lifecycle::Active {
            state.lifecycle = Lifecycle::Detached;
            tracing::debug!(session_id = %self.inner.id, generation, "socket detached");
        }
    }

    /// Route one decoded message. Returns `true` when the message is fatal
    /// to the connection.
    fn dispatch_inbound(&self, message: Message) -> bool {
        self.inner.state().stats.packets_received += 1;

        match message {
            Message::Heartbeat(counter) => {
                tracing::trace!(session_id = %self.inner.id, counter, "peer heartbeat");
                false
            }
            Message::Disconnect => {
                tracing::debug!(session_id = %self.inner.id, "peer sent disconnect");
                true
            }
            Message::Handshake(_) => {
                tracing::debug!(session_id = %self.inner.id, "ignoring handshake from peer");
                false
            }
            message => {
                self.inner.observer.message(self, message);
                false
            }
        }
    }
}

impl ConnInner {
    fn state(&self) -> MutexGuard<'_, ConnState> {
        self.state.lock().expect("connection state lock poisoned")
    }
}

impl PartialEq for Conn {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Display for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.inner.id, f)
    }
}

impl fmt::Debug for Conn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conn")
            .field("session_id", &self.inner.id)
            .field("lifecycle", &self.lifecycle())
            .finish_non_exhaustive()
    }
}

/// Read loop for one attached socket: bytes → decode cursor → dispatch.
async fn read_pump(conn: Conn, mut reader: Box<dyn SocketReader>, token: CancellationToken) {
    let mut fatal = false;

    'pump: loop {
        // Biased: a completed read must be delivered before cancellation
        // is observed.
        let chunk = tokio::select! {
            biased;
            read = reader.read() => match read {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break 'pump,
                Err(err) => {
                    tracing::debug!(session_id = %conn.inner.id, %err, "socket read ended");
                    break 'pump;
                }
            },
            () = token.cancelled() => break 'pump,
        };

        conn.inner.state().last_inbound = Instant::now();

        let decoded = {
            let mut decoder = conn
                .inner
                .decoder
                .lock()
                .expect("decoder lock poisoned");
            decoder.feed(&chunk)
        };

        match decoded {
            Ok(messages) => {
                for message in messages {
                    if conn.dispatch_inbound(message) {
                        fatal = true;
                        break 'pump;
                    }
                }
            }
            Err(DecodeError::MalformedFrame(reason)) => {
                tracing::warn!(session_id = %conn.inner.id, reason, "malformed frame, disconnecting");
                fatal = true;
                break 'pump;
            }
        }
    }

    // Either half ending ends the exchange.
    token.cancel();
    if fatal {
        conn.force_disconnect();
    }
}

/// Write loop for one attached socket: queue head → encode → socket.
///
/// A message leaves the queue only after its write succeeded; a failed
/// write leaves it at the head for the next socket.
async fn write_pump(conn: Conn, mut writer: Box<dyn SocketWriter>, token: CancellationToken) {
    loop {
        let notified = conn.inner.wake.notified();

        let next = {
            let state = conn.inner.state();
            if state.lifecycle == Lifecycle::Disconnected {
                break;
            }
            state.queue.front().cloned()
        };

        let message = match next {
            Some(message) => message,
            None => {
                tokio::select! {
                    () = token.cancelled() => break,
                    () = notified => {}
                }
                continue;
            }
        };

        let chunk = Bytes::from(conn.inner.codec.encode(&message));
        // Biased: a message that reached the wire must leave the queue
        // before cancellation is observed.
        let written = tokio::select! {
            biased;
            written = writer.write(chunk) => written,
            () = token.cancelled() => break,
        };

        match written {
            Ok(()) => {
                {
                    let mut state = conn.inner.state();
                    state.queue.pop_front();
                    state.stats.packets_sent += 1;
                }
                if matches!(message, Message::Disconnect) {
                    writer.close().await;
                    conn.force_disconnect();
                    break;
                }
            }
            Err(err) => {
                tracing::debug!(session_id = %conn.inner.id, %err, "socket write failed, message requeued");
                break;
            }
        }
    }

    token.cancel();
    writer.close().await;
}

/// Enqueue an outbound heartbeat every interval until disconnect.
async fn heartbeat_loop(conn: Conn) {
    let mut ticker = tokio::time::interval(conn.inner.heartbeat_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    loop {
        tokio::select! {
            () = conn.inner.shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let counter = {
            let mut state = conn.inner.state();
            if state.lifecycle == Lifecycle::Disconnected {
                break;
            }
            state.heartbeats_sent += 1;
            state.heartbeats_sent
        };

        if conn.send(Message::Heartbeat(counter)).is_err() {
            break;
        }
    }
}

/// Force disconnect after `disconnect_timeout` of inbound silence.
async fn watchdog_loop(conn: Conn) {
    loop {
        let deadline = conn.inner.state().last_inbound + conn.inner.disconnect_timeout;

        tokio::select! {
            () = conn.inner.shutdown.cancelled() => break,
            () = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
        }

        let expired = conn.inner.state().last_inbound.elapsed() >= conn.inner.disconnect_timeout;
        if expired {
            tracing::info!(session_id = %conn.inner.id, "disconnect timeout reached");
            conn.force_disconnect();
            break;
        }
    }
}
