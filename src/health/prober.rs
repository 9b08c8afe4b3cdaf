//! Periodic RTT probing.
//!
//! Every ping interval, each registered server is probed in parallel with a
//! one-line `ping`/`pong` exchange. A `pong` reply records the round-trip
//! and a success outcome; a timeout, I/O error, or any other reply records a
//! failure and leaves the cached RTT alone. Interval changes restart the
//! schedule; in-flight probes complete.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch};
use tokio::time::timeout;

use crate::lb::LbState;
use crate::registry::endpoint::Endpoint;

/// Lower bound on the per-probe timeout.
const MIN_PROBE_TIMEOUT: Duration = Duration::from_millis(200);

pub struct Prober {
    state: Arc<LbState>,
    interval_rx: watch::Receiver<Duration>,
}

impl Prober {
    pub fn new(state: Arc<LbState>, interval_rx: watch::Receiver<Duration>) -> Self {
        Self { state, interval_rx }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            let interval = *self.interval_rx.borrow_and_update();
            self.sweep(interval).await;
            tokio::select! {
                _ = shutdown.recv() => break,
                changed = self.interval_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // new interval: restart the schedule immediately
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    /// Probe every registered endpoint in parallel and record the outcomes.
    async fn sweep(&self, interval: Duration) {
        let probe_timeout = (interval / 2).max(MIN_PROBE_TIMEOUT);
        let probes = self.state.registry.endpoints().into_iter().map(|ep| {
            let state = Arc::clone(&self.state);
            async move {
                let rtt = probe(&ep, probe_timeout).await;
                state.registry.record_probe(&ep, rtt);
            }
        });
        join_all(probes).await;
    }
}

/// One ping/pong exchange. Returns the round-trip in milliseconds, measured
/// from the `ping` write to the reply line, or `None` on any failure.
async fn probe(ep: &Endpoint, limit: Duration) -> Option<u64> {
    let attempt = async {
        let stream = TcpStream::connect((ep.addr.as_str(), ep.port)).await.ok()?;
        let mut stream = BufReader::new(stream);
        let started = Instant::now();
        stream.get_mut().write_all(b"ping\n").await.ok()?;
        let mut reply = String::new();
        let n = stream.read_line(&mut reply).await.ok()?;
        if n == 0 {
            return None;
        }
        let elapsed = started.elapsed();
        if reply.trim().eq_ignore_ascii_case("pong") {
            Some(elapsed.as_millis() as u64)
        } else {
            None
        }
    };
    timeout(limit, attempt).await.ok().flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn serve_one_line(reply: &'static str) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut stream = BufReader::new(stream);
            let mut line = String::new();
            let _ = stream.read_line(&mut line).await;
            let _ = stream
                .get_mut()
                .write_all(format!("{reply}\n").as_bytes())
                .await;
        });
        addr
    }

    #[tokio::test]
    async fn pong_reply_yields_rtt() {
        let addr = serve_one_line("pong").await;
        let ep = Endpoint::new(addr.ip().to_string(), addr.port());
        assert!(probe(&ep, Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test]
    async fn pong_is_case_insensitive() {
        let addr = serve_one_line("PONG").await;
        let ep = Endpoint::new(addr.ip().to_string(), addr.port());
        assert!(probe(&ep, Duration::from_secs(1)).await.is_some());
    }

    #[tokio::test]
    async fn non_pong_reply_fails_the_probe() {
        let addr = serve_one_line("nope").await;
        let ep = Endpoint::new(addr.ip().to_string(), addr.port());
        assert_eq!(probe(&ep, Duration::from_secs(1)).await, None);
    }

    #[tokio::test]
    async fn unreachable_server_fails_the_probe() {
        // bind-then-drop leaves a port nothing is listening on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let ep = Endpoint::new(addr.ip().to_string(), addr.port());
        assert_eq!(probe(&ep, Duration::from_millis(300)).await, None);
    }
}
