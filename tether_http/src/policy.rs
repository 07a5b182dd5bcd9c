//! Flash cross-domain policy listener.
//!
//! Flash sockets fetch a policy file over raw TCP before connecting: the
//! client sends the literal 20-byte `<policy-file-request` and expects an
//! XML policy document back. Anything else is dropped without a response.
//! This listener is independent of the HTTP core.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const POLICY_REQUEST: &[u8] = b"<policy-file-request";

/// A running policy listener.
#[derive(Debug)]
pub struct PolicyServer {
    local_addr: SocketAddr,
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl PolicyServer {
    /// The address the listener is bound to.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting and wait for the accept loop to exit.
    pub async fn shutdown(self) {
        self.token.cancel();
        let _ = self.task.await;
    }
}

/// Bind a policy listener on `addr`, granting access to each configured
/// origin's host and port (wildcards preserved).
///
/// # Errors
///
/// Returns the bind error.
pub async fn serve_flash_policy(addr: SocketAddr, origins: &[String]) -> io::Result<PolicyServer> {
    let listener = TcpListener::bind(addr).await?;
    let local_addr = listener.local_addr()?;
    let policy = generate_policy(origins);
    let token = CancellationToken::new();

    let accept_token = token.clone();
    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                () = accept_token.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let policy = policy.clone();
                        tokio::spawn(async move {
                            if let Err(err) = answer(stream, &policy).await {
                                tracing::debug!(%peer, %err, "policy request dropped");
                            }
                        });
                    }
                    Err(err) => {
                        tracing::warn!(%err, "policy accept failed");
                    }
                },
            }
        }
    });

    tracing::info!(%local_addr, "flash policy listener started");
    Ok(PolicyServer {
        local_addr,
        token,
        task,
    })
}

async fn answer(mut stream: TcpStream, policy: &str) -> io::Result<()> {
    let mut request = [0u8; 20];
    stream.read_exact(&mut request).await?;
    if request != POLICY_REQUEST {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "not a policy file request",
        ));
    }

    stream.write_all(policy.as_bytes()).await?;
    stream.shutdown().await
}

/// Render the cross-domain policy document for the configured origins.
fn generate_policy(origins: &[String]) -> String {
    use std::fmt::Write;

    let mut out = String::from(
        "<?xml version=\"1.0\"?>\n\
         <!DOCTYPE cross-domain-policy SYSTEM \"http://www.macromedia.com/xml/dtds/cross-domain-policy.dtd\">\n\
         <cross-domain-policy>\n\
         \t<site-control permitted-cross-domain-policies=\"master-only\" />\n",
    );

    for origin in origins {
        let (host, port) = match origin.split_once(':') {
            Some((host, port)) => (host, port),
            None => (origin.as_str(), ""),
        };
        let host = if host.is_empty() { "*" } else { host };
        let port = if port.is_empty() { "*" } else { port };
        let _ = writeln!(
            out,
            "\t<allow-access-from domain=\"{host}\" to-ports=\"{port}\" />"
        );
    }

    out.push_str("</cross-domain-policy>\n");
    out
}
