//! Connection lifecycle, ordering, and timer behavior.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use common::{encode, socket_pair, wait_for};
use testresult::TestResult;
use tether_core::{Config, ConnError, Hub, Lifecycle, Message};

const STEP: Duration = Duration::from_millis(500);

fn quiet_config() -> Config {
    // No heartbeats, generous watchdog: tests drive all traffic themselves.
    Config::default()
        .heartbeat_interval(Duration::ZERO)
        .disconnect_timeout(Duration::from_secs(30))
}

struct Counters {
    connects: AtomicUsize,
    disconnects: AtomicUsize,
    messages: Mutex<Vec<Message>>,
}

fn hub_with_counters(config: Config) -> (Hub, Arc<Counters>) {
    let counters = Arc::new(Counters {
        connects: AtomicUsize::new(0),
        disconnects: AtomicUsize::new(0),
        messages: Mutex::new(Vec::new()),
    });

    let hub = Hub::new(config);
    {
        let counters = Arc::clone(&counters);
        hub.on_connect(move |_| {
            counters.connects.fetch_add(1, Ordering::SeqCst);
        })
        .expect("install on_connect");
    }
    {
        let counters = Arc::clone(&counters);
        hub.on_disconnect(move |_| {
            counters.disconnects.fetch_add(1, Ordering::SeqCst);
        })
        .expect("install on_disconnect");
    }
    {
        let counters = Arc::clone(&counters);
        hub.on_message(move |_, message| {
            counters.messages.lock().expect("messages").push(message);
        })
        .expect("install on_message");
    }
    hub.bind().expect("bind");
    (hub, counters)
}

#[tokio::test]
async fn handshake_arrives_first_and_connect_fires_once() -> TestResult {
    let (hub, counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;

    let handshake = peer.inbox.next(STEP).await.expect("handshake");
    let Message::Handshake(info) = handshake else {
        panic!("expected handshake, got {handshake:?}");
    };
    assert!(info.starts_with(&conn.session_id().to_hex()));
    assert!(info.ends_with(":0:30"));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 0);

    // A reattach does not replay the handshake or refire on_connect.
    let (socket2, mut peer2) = socket_pair();
    conn.attach(socket2).await?;
    conn.send("after")?;

    assert_eq!(peer2.inbox.next(STEP).await, Some(Message::text("after")));
    assert_eq!(counters.connects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn queued_messages_survive_detach_in_order() -> TestResult {
    let (hub, _counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    assert!(matches!(
        peer.inbox.next(STEP).await,
        Some(Message::Handshake(_))
    ));

    // Client goes away; wait for the connection to notice.
    drop(peer.to_server);
    assert!(wait_for(STEP, || conn.lifecycle() == Lifecycle::Detached).await);

    conn.send("a")?;
    conn.send("b")?;

    let (socket2, mut peer2) = socket_pair();
    conn.attach(socket2).await?;

    assert_eq!(peer2.inbox.next(STEP).await, Some(Message::text("a")));
    assert_eq!(peer2.inbox.next(STEP).await, Some(Message::text("b")));
    Ok(())
}

#[tokio::test]
async fn send_is_nonblocking_without_a_socket() -> TestResult {
    let (hub, _counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let started = Instant::now();
    for i in 0..100 {
        conn.send(format!("message {i}"))?;
    }
    assert!(started.elapsed() < Duration::from_millis(200));
    Ok(())
}

#[tokio::test]
async fn queue_overflow_disconnects_instead_of_dropping() -> TestResult {
    let config = quiet_config().queue_limit(4);
    let (hub, counters) = hub_with_counters(config);
    let conn = hub.create_conn();

    let mut overflowed = false;
    for i in 0..8 {
        match conn.send(format!("m{i}")) {
            Ok(()) => {}
            Err(ConnError::QueueOverflow) => {
                overflowed = true;
                break;
            }
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    assert!(overflowed);
    assert_eq!(conn.lifecycle(), Lifecycle::Disconnected);
    assert!(hub.get(conn.session_id()).is_none());
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(conn.send("late"), Err(ConnError::Disconnected));
    Ok(())
}

#[tokio::test]
async fn watchdog_disconnects_after_detached_timeout() -> TestResult {
    let config = Config::default()
        .heartbeat_interval(Duration::ZERO)
        .disconnect_timeout(Duration::from_millis(200));
    let (hub, counters) = hub_with_counters(config);
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    assert!(matches!(
        peer.inbox.next(STEP).await,
        Some(Message::Handshake(_))
    ));

    drop(peer.to_server);
    assert!(wait_for(Duration::from_secs(1), || conn.lifecycle() == Lifecycle::Disconnected).await);
    assert!(hub.get(conn.session_id()).is_none());
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn inbound_traffic_defers_the_watchdog() -> TestResult {
    let config = Config::default()
        .heartbeat_interval(Duration::ZERO)
        .disconnect_timeout(Duration::from_millis(300));
    let (hub, _counters) = hub_with_counters(config);
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    // Keep heartbeating past several timeout windows.
    for i in 1..=8u64 {
        peer.to_server.send(encode(&Message::Heartbeat(i))).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_ne!(conn.lifecycle(), Lifecycle::Disconnected);

    // Then fall silent.
    assert!(wait_for(Duration::from_secs(1), || conn.lifecycle() == Lifecycle::Disconnected).await);
    Ok(())
}

#[tokio::test]
async fn heartbeats_tick_while_attached() -> TestResult {
    let config = Config::default()
        .heartbeat_interval(Duration::from_millis(100))
        .disconnect_timeout(Duration::from_secs(30));
    let (hub, _counters) = hub_with_counters(config);
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    let mut beats = Vec::new();
    while beats.len() < 2 {
        match peer.inbox.next(STEP).await {
            Some(Message::Heartbeat(n)) => beats.push(n),
            Some(other) => panic!("unexpected message: {other:?}"),
            None => panic!("socket closed before two heartbeats"),
        }
    }
    assert_eq!(beats, vec![1, 2]);
    Ok(())
}

#[tokio::test]
async fn zero_interval_disables_heartbeats() -> TestResult {
    let (hub, _counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    assert_eq!(peer.inbox.next(Duration::from_millis(300)).await, None);
    Ok(())
}

#[tokio::test]
async fn peer_disconnect_message_is_terminal() -> TestResult {
    let (hub, counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    peer.to_server.send(encode(&Message::Disconnect)).await?;
    assert!(wait_for(STEP, || conn.lifecycle() == Lifecycle::Disconnected).await);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert!(hub.get(conn.session_id()).is_none());
    Ok(())
}

#[tokio::test]
async fn malformed_frame_is_terminal() -> TestResult {
    let (hub, counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    // Anchor the cursor with a good frame, then corrupt the stream.
    peer.to_server.send(encode(&Message::text("ok"))).await?;
    peer.to_server
        .send(bytes::Bytes::from_static(b"~m~bogus"))
        .await?;

    assert!(wait_for(STEP, || conn.lifecycle() == Lifecycle::Disconnected).await);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    assert_eq!(
        counters.messages.lock().expect("messages").as_slice(),
        &[Message::text("ok")]
    );
    Ok(())
}

#[tokio::test]
async fn inbound_data_dispatches_in_order_without_control_frames() -> TestResult {
    let (hub, counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    let mut chunk = Vec::new();
    chunk.extend_from_slice(&encode(&Message::text("one")));
    chunk.extend_from_slice(&encode(&Message::Heartbeat(1)));
    chunk.extend_from_slice(&encode(&Message::json(serde_json::json!({"n": 2}))));
    chunk.extend_from_slice(&encode(&Message::text("three")));
    peer.to_server.send(chunk.into()).await?;

    assert!(
        wait_for(STEP, || counters.messages.lock().expect("messages").len() == 3).await
    );
    assert_eq!(
        counters.messages.lock().expect("messages").as_slice(),
        &[
            Message::text("one"),
            Message::json(serde_json::json!({"n": 2})),
            Message::text("three"),
        ]
    );

    let stats = conn.stats();
    assert_eq!(stats.packets_received, 4);
    Ok(())
}

#[tokio::test]
async fn close_flushes_a_disconnect_frame() -> TestResult {
    let (hub, counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    conn.close();
    assert_eq!(peer.inbox.next(STEP).await, Some(Message::Disconnect));
    assert!(wait_for(STEP, || conn.lifecycle() == Lifecycle::Disconnected).await);
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);

    // Idempotent.
    conn.close();
    assert_eq!(counters.disconnects.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn replacing_a_socket_closes_the_previous_one() -> TestResult {
    let (hub, _counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    let (socket2, mut peer2) = socket_pair();
    conn.attach(socket2).await?;

    // The first peer's stream ends; traffic continues on the second.
    assert_eq!(peer.inbox.next(STEP).await, None);
    conn.send("still here")?;
    assert_eq!(
        peer2.inbox.next(STEP).await,
        Some(Message::text("still here"))
    );
    Ok(())
}

#[tokio::test]
async fn packet_counters_are_monotonic() -> TestResult {
    let (hub, _counters) = hub_with_counters(quiet_config());
    let conn = hub.create_conn();

    let (socket, mut peer) = socket_pair();
    conn.attach(socket).await?;
    peer.inbox.next(STEP).await.expect("handshake");

    conn.send("one")?;
    peer.inbox.next(STEP).await.expect("one");
    let after_one = conn.stats();
    assert!(after_one.packets_sent >= 2); // handshake + one

    conn.send("two")?;
    peer.inbox.next(STEP).await.expect("two");
    let after_two = conn.stats();
    assert!(after_two.packets_sent > after_one.packets_sent);
    Ok(())
}
