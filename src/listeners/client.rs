//! Client handshake listener.
//!
//! Clients open a short-lived connection, send one `HELLO <name> [mode]`
//! line, and receive exactly one reply line: either `host:port` or
//! `NO_SERVER_AVAILABLE`. The handshake is stateless on this side; the
//! socket is closed right after the reply.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::balancer;
use crate::config::Mode;
use crate::lb::LbState;

use super::read_request_line;

pub async fn run(
    listener: TcpListener,
    state: Arc<LbState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(handle_client(stream, peer, state));
                }
                Err(e) => tracing::warn!(error = %e, "client accept failed"),
            }
        }
    }
}

async fn handle_client(stream: TcpStream, peer: SocketAddr, state: Arc<LbState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let line = read_request_line(&mut reader).await;

    let settings = state.settings.load();
    let mut name: Option<String> = None;
    let mut mode = settings.default_mode;
    if let Some(line) = &line {
        let mut tokens = line.split_whitespace();
        if tokens
            .next()
            .is_some_and(|t| t.eq_ignore_ascii_case("HELLO"))
        {
            name = tokens.next().map(str::to_string);
            if let Some(parsed) = tokens.next().and_then(Mode::parse) {
                mode = parsed;
            }
        }
    }
    // anonymous (or garbled) handshakes still get served, under a
    // generated name
    let name = match name.filter(|n| !n.is_empty()) {
        Some(name) => name,
        None => format!("Client-{}", state.next_client_id()),
    };

    let remote_ip = peer.ip().to_string();
    if settings.banned_ips.contains(&remote_ip) || settings.banned_names.contains(&name) {
        tracing::info!(client = %name, ip = %remote_ip, "denied banned client");
        let _ = write_half.write_all(b"NO_SERVER_AVAILABLE\n").await;
        return;
    }

    match balancer::select_server(&state.registry, &settings, &name, mode) {
        Some(server) => {
            balancer::commit_assignment(&state.registry, &name, mode, &server, &peer.to_string());
            let reply = format!("{}:{}\n", server.addr.replace('/', ""), server.port);
            let _ = write_half.write_all(reply.as_bytes()).await;
            tracing::info!(client = %name, mode = %mode, server = %server, "assigned");
        }
        None => {
            tracing::info!(client = %name, mode = %mode, "no server available");
            let _ = write_half.write_all(b"NO_SERVER_AVAILABLE\n").await;
        }
    }
}
