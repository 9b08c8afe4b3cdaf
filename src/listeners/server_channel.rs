//! Server registration channel.
//!
//! One line per connection, dispatched on its first token:
//! - `!join … <port>`  register (or refresh) the sender, reply `!ack`
//! - `!leave <port>`   remove the sender, reply `!bye`
//! - `!report <port> clients <n> <name>@<ip> …`  replace the sender's
//!   live-client list, no reply
//! - anything else     reply `!err`
//!
//! The endpoint is always built from the connection's remote IP plus the
//! port carried in the message, so a server cannot speak for another host.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::lb::LbState;
use crate::registry::endpoint::{Endpoint, LiveClient};

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
                    tokio::spawn(handle_server(stream, peer, state));
                }
                Err(e) => tracing::warn!(error = %e, "registration accept failed"),
            }
        }
    }
}

async fn handle_server(stream: TcpStream, peer: SocketAddr, state: Arc<LbState>) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let Some(line) = read_request_line(&mut reader).await else {
        return;
    };
    let tokens: Vec<&str> = line.split_whitespace().collect();

    match tokens.first().copied() {
        Some("!join") => match tokens.last().and_then(|t| t.parse::<u16>().ok()) {
            Some(port) => {
                let ep = Endpoint::new(peer.ip().to_string(), port);
                if state.registry.register(ep.clone()) {
                    tracing::info!(server = %ep, "registered server");
                } else {
                    tracing::debug!(server = %ep, "server re-registered");
                }
                let _ = write_half.write_all(b"!ack\n").await;
            }
            None => {
                let _ = write_half.write_all(b"!err\n").await;
            }
        },
        Some("!leave") => match tokens.last().and_then(|t| t.parse::<u16>().ok()) {
            Some(port) => {
                let ep = Endpoint::new(peer.ip().to_string(), port);
                state.registry.remove(&ep);
                tracing::info!(server = %ep, "server left");
                let _ = write_half.write_all(b"!bye\n").await;
            }
            None => {
                let _ = write_half.write_all(b"!err\n").await;
            }
        },
        Some("!report") => match parse_report(&peer.ip().to_string(), &tokens) {
            Some((ep, clients)) => {
                if !state.registry.record_report(&ep, clients) {
                    tracing::debug!(server = %ep, "report from unregistered server ignored");
                }
            }
            None => tracing::debug!(line = %line, "malformed report"),
        },
        _ => {
            let _ = write_half.write_all(b"!err\n").await;
        }
    }
}

/// Parse `!report <port> clients <n> <name>@<ip> …` into the reporting
/// endpoint and its live-client list. Pairs split on the LAST `@`; a token
/// without one becomes a name with ip `unknown`. Fewer pairs than `<n>` is
/// tolerated.
fn parse_report(source_ip: &str, tokens: &[&str]) -> Option<(Endpoint, Vec<LiveClient>)> {
    if tokens.len() < 4 || !tokens[2].eq_ignore_ascii_case("clients") {
        return None;
    }
    let port: u16 = tokens[1].parse().ok()?;
    let count: usize = tokens[3].parse().ok()?;
    let clients = tokens
        .iter()
        .skip(4)
        .take(count)
        .map(|token| {
            let (name, ip) = match token.rfind('@') {
                Some(i) if i > 0 => (&token[..i], &token[i + 1..]),
                _ => (*token, "unknown"),
            };
            LiveClient {
                name: name.to_string(),
                ip: ip.to_string(),
            }
        })
        .collect();
    Some((Endpoint::new(source_ip, port), clients))
}
