//! A chat-broadcast demo server: every message a client sends is fanned out
//! to everyone else, and joins/leaves are announced.

use std::net::SocketAddr;
use std::time::Duration;

use clap::Parser;
use serde_json::json;
use tether_core::{Config, Hub};
use tether_http::{default_transports, mux, serve_flash_policy};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Parser)]
#[command(name = "tether", about = "Chat-broadcast demo server")]
struct Arguments {
    /// Address to serve HTTP on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// Resource prefix the transports are mounted under.
    #[arg(long, default_value = "/sio/")]
    resource: String,

    /// Optional address for the Flash cross-domain policy listener.
    #[arg(long)]
    flash_policy: Option<SocketAddr>,

    /// Allowed cross-origin peers (`host[:port]`, `*` wildcards).
    #[arg(long)]
    origin: Vec<String>,

    /// Seconds between outbound heartbeats (0 disables).
    #[arg(long, default_value_t = 10)]
    heartbeat: u64,

    /// Seconds of silence before a session is dropped.
    #[arg(long, default_value_t = 25)]
    disconnect: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Arguments::parse();

    let config = Config::default()
        .heartbeat_interval(Duration::from_secs(args.heartbeat))
        .disconnect_timeout(Duration::from_secs(args.disconnect))
        .origins(args.origin.clone());
    let hub = Hub::new(config);

    {
        let announce = hub.clone();
        hub.on_connect(move |conn| {
            announce.broadcast(json!({ "announcement": format!("connected: {conn}") }));
        })?;
    }
    {
        let announce = hub.clone();
        hub.on_disconnect(move |conn| {
            announce.broadcast_except(conn, json!({ "announcement": format!("disconnected: {conn}") }));
        })?;
    }
    {
        let relay = hub.clone();
        hub.on_message(move |conn, message| {
            relay.broadcast_except(
                conn,
                json!({ "message": [conn.to_string(), message.payload()] }),
            );
        })?;
    }

    let router = mux(&hub, &args.resource, default_transports())?;

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("Ctrl+C — shutting down…");
                token.cancel();
            }
        });
    }

    let policy = match args.flash_policy {
        Some(addr) => Some(serve_flash_policy(addr, &args.origin).await?),
        None => None,
    };

    let listener = tokio::net::TcpListener::bind(args.listen).await?;
    tracing::info!(listen = %args.listen, resource = %args.resource, "tether demo server started");

    let shutdown = token.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
        })
        .await?;

    if let Some(policy) = policy {
        policy.shutdown().await;
    }
    Ok(())
}
