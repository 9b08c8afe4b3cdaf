//! Shared utilities for integration testing: an LB on ephemeral ports,
//! pong-answering fake backends, and protocol helpers.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use switchboard::{Lb, LbState, Ports, Settings, Shutdown};

pub struct TestLb {
    pub state: Arc<LbState>,
    pub client_addr: SocketAddr,
    pub registration_addr: SocketAddr,
    pub status_addr: SocketAddr,
    pub admin_addr: SocketAddr,
    pub shutdown: Shutdown,
}

/// Start a load balancer on four ephemeral ports.
pub async fn start_lb(settings: Settings) -> TestLb {
    let ports = Ports {
        client: 0,
        registration: 0,
        status: 0,
        admin: 0,
    };
    let lb = Lb::bind(ports, settings).await.unwrap();
    let handle = TestLb {
        state: lb.state(),
        client_addr: lb.client_addr().unwrap(),
        registration_addr: lb.registration_addr().unwrap(),
        status_addr: lb.status_addr().unwrap(),
        admin_addr: lb.admin_addr().unwrap(),
        shutdown: Shutdown::new(),
    };
    let shutdown = handle.shutdown.clone();
    tokio::spawn(async move {
        lb.run(&shutdown).await;
    });
    handle
}

pub async fn start_lb_default() -> TestLb {
    start_lb(Settings::default()).await
}

/// Send one line, read one reply line. `None` when the peer closes without
/// replying.
pub async fn send_line(addr: SocketAddr, line: &str) -> Option<String> {
    let stream = TcpStream::connect(addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("{line}\n").as_bytes())
        .await
        .unwrap();
    let mut reader = BufReader::new(read_half);
    let mut reply = String::new();
    match reader.read_line(&mut reply).await {
        Ok(n) if n > 0 => Some(reply.trim().to_string()),
        _ => None,
    }
}

/// Client handshake; panics if the LB closes without a reply line.
pub async fn hello(client_addr: SocketAddr, line: &str) -> String {
    send_line(client_addr, line).await.expect("no handshake reply")
}

/// Run one admin command over the TCP channel, collecting lines until `END`.
pub async fn admin(admin_addr: SocketAddr, command: &str) -> Vec<String> {
    let stream = TcpStream::connect(admin_addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    write_half
        .write_all(format!("{command}\n").as_bytes())
        .await
        .unwrap();
    let mut lines = BufReader::new(read_half).lines();
    let mut out = Vec::new();
    while let Some(line) = lines.next_line().await.unwrap() {
        if line == "END" {
            return out;
        }
        out.push(line);
    }
    panic!("admin response ended without END sentinel");
}

/// Register a backend port over the registration channel; the LB keys it by
/// this process's loopback source address.
pub async fn join(registration_addr: SocketAddr, port: u16) {
    let reply = send_line(registration_addr, &format!("!join -v dynamic {port}")).await;
    assert_eq!(reply.as_deref(), Some("!ack"));
}

/// Fire-and-forget live-client report for a backend port.
pub async fn report(registration_addr: SocketAddr, port: u16, clients: &[(&str, &str)]) {
    let mut line = format!("!report {port} clients {}", clients.len());
    for (name, ip) in clients {
        line.push_str(&format!(" {name}@{ip}"));
    }
    line.push('\n');
    let mut stream = TcpStream::connect(registration_addr).await.unwrap();
    stream.write_all(line.as_bytes()).await.unwrap();
}

/// Minimal backend that answers `pong` to every `ping` line, as the RTT
/// prober expects. Returns its ephemeral address.
pub async fn start_pong_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((stream, _)) => {
                    tokio::spawn(async move {
                        let (read_half, mut write_half) = stream.into_split();
                        let mut lines = BufReader::new(read_half).lines();
                        while let Ok(Some(line)) = lines.next_line().await {
                            if line.trim().eq_ignore_ascii_case("ping") {
                                if write_half.write_all(b"pong\n").await.is_err() {
                                    break;
                                }
                            }
                        }
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Read the one-shot status document and parse it.
pub async fn read_status(status_addr: SocketAddr) -> serde_json::Value {
    let mut stream = TcpStream::connect(status_addr).await.unwrap();
    let mut body = String::new();
    stream.read_to_string(&mut body).await.unwrap();
    serde_json::from_str(&body).unwrap()
}
