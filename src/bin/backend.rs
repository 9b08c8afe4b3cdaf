//! Cluster backend agent.
//!
//! Speaks the load balancer's server-side protocol:
//! - registers with `!join`, retrying a few times at startup
//! - re-joins periodically as a heartbeat so an LB restart is transparent
//! - reports its live clients every two seconds (`!report … <name>@<ip> …`)
//! - answers `pong` to the LB's RTT `ping`
//! - sends `!leave` best-effort on shutdown
//!
//! Client sessions are plain line-oriented TCP; a `hello <name>` line names
//! the session so reports carry a real name instead of `unknown`.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dashmap::DashMap;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const REGISTER_ATTEMPTS: u32 = 5;
const REGISTER_RETRY_DELAY: Duration = Duration::from_secs(2);
const REPORT_PERIOD: Duration = Duration::from_secs(2);
const LB_IO_TIMEOUT: Duration = Duration::from_secs(3);
/// Heartbeat cadence: quick retries while the LB is unreachable, slower
/// once a join has been acknowledged.
const HEARTBEAT_AFTER_FAILURE: Duration = Duration::from_secs(5);
const HEARTBEAT_AFTER_SUCCESS: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "backend")]
#[command(about = "Cluster backend: registers with the load balancer and serves client sessions")]
struct Args {
    /// TCP port to serve on (0 picks an ephemeral port).
    #[arg(long, short, default_value_t = 0)]
    port: u16,

    /// Load balancer host.
    #[arg(long, default_value = "127.0.0.1")]
    lb_host: String,

    /// Load balancer registration port.
    #[arg(long, default_value_t = 11115)]
    lb_port: u16,
}

/// Live sessions keyed by remote `ip:port`.
type LiveSessions = Arc<DashMap<String, SessionInfo>>;

struct SessionInfo {
    name: String,
    ip: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "backend=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(("0.0.0.0", args.port)).await?;
    let port = listener.local_addr()?.port();
    let sessions: LiveSessions = Arc::new(DashMap::new());

    register(&args.lb_host, args.lb_port, port).await;
    tracing::info!(
        port,
        lb_host = %args.lb_host,
        lb_port = args.lb_port,
        "backend listening"
    );

    {
        let lb_host = args.lb_host.clone();
        let lb_port = args.lb_port;
        tokio::spawn(heartbeat(lb_host, lb_port, port));
    }
    {
        let lb_host = args.lb_host.clone();
        let lb_port = args.lb_port;
        let sessions = Arc::clone(&sessions);
        tokio::spawn(reporter(lb_host, lb_port, port, sessions));
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let sessions = Arc::clone(&sessions);
                    tokio::spawn(handle_session(stream, peer, sessions));
                }
                Err(e) => tracing::warn!(error = %e, "accept failed"),
            }
        }
    }

    tracing::info!("leaving the cluster");
    send_leave(&args.lb_host, args.lb_port, port).await;
    Ok(())
}

/// Initial registration with bounded retries. The backend keeps serving even
/// if every attempt fails; the heartbeat task keeps trying.
async fn register(lb_host: &str, lb_port: u16, tcp_port: u16) {
    for attempt in 1..=REGISTER_ATTEMPTS {
        if join_once(lb_host, lb_port, tcp_port).await {
            tracing::info!(tcp_port, "registered with load balancer");
            return;
        }
        tracing::warn!(attempt, "registration attempt failed");
        if attempt < REGISTER_ATTEMPTS {
            sleep(REGISTER_RETRY_DELAY).await;
        }
    }
    tracing::warn!("could not register with load balancer, continuing anyway");
}

/// One `!join` exchange; true on an `!ack` reply.
async fn join_once(lb_host: &str, lb_port: u16, tcp_port: u16) -> bool {
    let attempt = async {
        let mut stream = TcpStream::connect((lb_host, lb_port)).await.ok()?;
        stream
            .write_all(format!("!join -v dynamic {tcp_port}\n").as_bytes())
            .await
            .ok()?;
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.ok()?;
        Some(reply.trim() == "!ack")
    };
    matches!(timeout(LB_IO_TIMEOUT, attempt).await, Ok(Some(true)))
}

/// Periodic re-join so an LB restart is transparent and a lost report does
/// not get this backend evicted.
async fn heartbeat(lb_host: String, lb_port: u16, tcp_port: u16) {
    let mut delay = HEARTBEAT_AFTER_FAILURE;
    loop {
        sleep(delay).await;
        if join_once(&lb_host, lb_port, tcp_port).await {
            tracing::debug!("heartbeat join acknowledged");
            delay = HEARTBEAT_AFTER_SUCCESS;
        } else {
            delay = HEARTBEAT_AFTER_FAILURE;
        }
    }
}

/// Fire-and-forget `!report` every two seconds.
async fn reporter(lb_host: String, lb_port: u16, tcp_port: u16, sessions: LiveSessions) {
    loop {
        sleep(REPORT_PERIOD).await;
        let mut line = format!("!report {tcp_port} clients {}", sessions.len());
        for entry in sessions.iter() {
            let session = entry.value();
            let name = if session.name.is_empty() {
                "unknown"
            } else {
                session.name.as_str()
            };
            line.push_str(&format!(" {}@{}", name, session.ip));
        }
        line.push('\n');
        let delivery = async {
            let mut stream = TcpStream::connect((lb_host.as_str(), lb_port)).await.ok()?;
            stream.write_all(line.as_bytes()).await.ok()
        };
        if timeout(LB_IO_TIMEOUT, delivery).await.is_err() {
            tracing::debug!("report delivery timed out");
        }
    }
}

/// Best-effort departure notice.
async fn send_leave(lb_host: &str, lb_port: u16, tcp_port: u16) {
    let attempt = async {
        let mut stream = TcpStream::connect((lb_host, lb_port)).await.ok()?;
        stream
            .write_all(format!("!leave {tcp_port}\n").as_bytes())
            .await
            .ok()?;
        let mut reader = BufReader::new(stream);
        let mut reply = String::new();
        reader.read_line(&mut reply).await.ok()
    };
    let _ = timeout(LB_IO_TIMEOUT, attempt).await;
}

async fn handle_session(stream: TcpStream, peer: SocketAddr, sessions: LiveSessions) {
    let key = peer.to_string();
    sessions.insert(
        key.clone(),
        SessionInfo {
            name: String::new(),
            ip: peer.ip().to_string(),
        },
    );

    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let mut tokens = line.split_whitespace();
        match tokens.next().map(str::to_ascii_lowercase).as_deref() {
            // the LB's RTT probe
            Some("ping") => {
                if write_half.write_all(b"pong\n").await.is_err() {
                    break;
                }
            }
            Some("hello") => match tokens.next() {
                Some(name) => {
                    sessions.insert(
                        key.clone(),
                        SessionInfo {
                            name: name.to_string(),
                            ip: peer.ip().to_string(),
                        },
                    );
                    let _ = write_half
                        .write_all(format!("Hello, {name}!\n").as_bytes())
                        .await;
                }
                None => {
                    let _ = write_half
                        .write_all(b"Hello received without name. Use: hello <name>\n")
                        .await;
                }
            },
            Some("quit") => {
                let _ = write_half.write_all(b"Bye.\n").await;
                break;
            }
            Some(_) => {
                let _ = write_half.write_all(b"Unknown command\n").await;
            }
            None => {}
        }
    }
    sessions.remove(&key);
}
