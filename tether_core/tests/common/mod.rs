//! Shared test plumbing: an in-memory channel socket and a frame-aware
//! peer inbox.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tether_core::{
    Codec, Decoder, Message, Socket, SocketError, SocketReader, SocketWriter, WireCodec,
};
use tokio::sync::mpsc;

/// The client half of an in-memory socket.
pub struct TestPeer {
    /// Inject client → server bytes. Dropping it ends the exchange.
    pub to_server: mpsc::Sender<Bytes>,

    /// Decoded server → client messages.
    pub inbox: PeerInbox,
}

/// Build a connected in-memory socket and its peer half.
pub fn socket_pair() -> (Socket, TestPeer) {
    let (to_server, inbound) = mpsc::channel(64);
    let (outbound, from_server) = mpsc::channel(64);

    let socket = Socket::new(
        Box::new(ChanReader { rx: inbound }),
        Box::new(ChanWriter { tx: Some(outbound) }),
    );
    let peer = TestPeer {
        to_server,
        inbox: PeerInbox::new(from_server),
    };
    (socket, peer)
}

/// Encode one message the way the server's peer would.
pub fn encode(message: &Message) -> Bytes {
    Bytes::from(WireCodec.encode(message))
}

/// Reassembles server → client bytes into messages.
pub struct PeerInbox {
    rx: mpsc::Receiver<Bytes>,
    decoder: Box<dyn Decoder>,
    pending: VecDeque<Message>,
}

impl PeerInbox {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            decoder: WireCodec.decoder(),
            pending: VecDeque::new(),
        }
    }

    /// Next decoded message, or `None` if the socket closed or the deadline
    /// passed first.
    pub async fn next(&mut self, deadline: Duration) -> Option<Message> {
        loop {
            if let Some(message) = self.pending.pop_front() {
                return Some(message);
            }
            let chunk = tokio::time::timeout(deadline, self.rx.recv()).await.ok()??;
            self.pending
                .extend(self.decoder.feed(&chunk).expect("peer decode"));
        }
    }
}

struct ChanReader {
    rx: mpsc::Receiver<Bytes>,
}

#[async_trait]
impl SocketReader for ChanReader {
    async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        Ok(self.rx.recv().await)
    }
}

struct ChanWriter {
    tx: Option<mpsc::Sender<Bytes>>,
}

#[async_trait]
impl SocketWriter for ChanWriter {
    async fn write(&mut self, chunk: Bytes) -> Result<(), SocketError> {
        match &self.tx {
            Some(tx) => tx.send(chunk).await.map_err(|_| SocketError::Closed),
            None => Err(SocketError::Closed),
        }
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// Poll until the condition holds or the deadline passes.
pub async fn wait_for(deadline: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let step = Duration::from_millis(10);
    let mut waited = Duration::ZERO;
    while waited < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(step).await;
        waited += step;
    }
    condition()
}
