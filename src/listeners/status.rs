//! Read-only status feed.
//!
//! Any caller connects and reads exactly one JSON document describing the
//! whole cluster; the socket is closed afterwards. Key names are part of the
//! external contract. The snapshot is taken under the registry's coarse lock
//! and serialized outside it.

use std::sync::Arc;

use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

use crate::config::Mode;
use crate::lb::LbState;

/// Newest assignments carried by the feed.
const RECENT_IN_STATUS: usize = 20;

/// `maxPerServer` wire value when the cap is unbounded.
const UNBOUNDED_MAX_PER_SERVER: u64 = i32::MAX as u64;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusDocument {
    pub up_since: u64,
    pub default_mode: Mode,
    pub max_per_server: u64,
    pub ping_interval_ms: u64,
    pub eviction_timeout_ms: u64,
    pub banned_ips: Vec<String>,
    pub banned_names: Vec<String>,
    pub servers: Vec<ServerStatus>,
    pub recent_assignments: Vec<AssignmentStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStatus {
    pub addr: String,
    pub port: u16,
    /// -1 while no probe has succeeded yet.
    pub rtt_ms: i64,
    pub weight: u32,
    pub drained: bool,
    pub live_count: usize,
    pub request_count: u64,
    pub health_score: u8,
    pub last_seen_ms: u64,
    pub live_clients: Vec<LiveClientStatus>,
}

#[derive(Debug, Serialize)]
pub struct LiveClientStatus {
    pub name: String,
    pub ip: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStatus {
    pub client_name: String,
    pub mode: Mode,
    /// `host:port` of the assigned server, which may no longer be
    /// registered by the time this record is read.
    pub server: String,
    pub assigned_at: u64,
}

pub async fn run(
    listener: TcpListener,
    state: Arc<LbState>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, _peer)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(handle_status(stream, state));
                }
                Err(e) => tracing::warn!(error = %e, "status accept failed"),
            }
        }
    }
}

async fn handle_status(mut stream: TcpStream, state: Arc<LbState>) {
    let document = build_status(&state);
    match serde_json::to_string(&document) {
        Ok(json) => {
            let _ = stream.write_all(json.as_bytes()).await;
            let _ = stream.write_all(b"\n").await;
        }
        Err(e) => tracing::error!(error = %e, "failed to serialize status document"),
    }
}

/// Assemble the full cluster view from one registry snapshot plus the
/// current settings record.
pub fn build_status(state: &LbState) -> StatusDocument {
    let settings = state.settings.load();

    let servers = state
        .registry
        .snapshot()
        .into_iter()
        .map(|snap| ServerStatus {
            addr: snap.endpoint.addr.clone(),
            port: snap.endpoint.port,
            rtt_ms: snap.rtt_ms.map(|rtt| rtt as i64).unwrap_or(-1),
            weight: snap.weight,
            drained: snap.drained,
            live_count: snap.live_clients.len(),
            request_count: snap.request_count,
            health_score: snap.health_score,
            last_seen_ms: snap.last_seen_ms,
            live_clients: snap
                .live_clients
                .into_iter()
                .map(|client| LiveClientStatus {
                    name: client.name,
                    ip: client.ip,
                })
                .collect(),
        })
        .collect();

    let recent_assignments = state
        .registry
        .recent_assignments(RECENT_IN_STATUS)
        .into_iter()
        .map(|record| AssignmentStatus {
            client_name: record.client_name,
            mode: record.mode,
            server: record.server.to_string(),
            assigned_at: record.assigned_at_ms,
        })
        .collect();

    let mut banned_ips: Vec<String> = settings.banned_ips.iter().cloned().collect();
    banned_ips.sort();
    let mut banned_names: Vec<String> = settings.banned_names.iter().cloned().collect();
    banned_names.sort();

    StatusDocument {
        up_since: state.started_at_ms,
        default_mode: settings.default_mode,
        max_per_server: settings
            .max_per_server
            .map(|cap| cap as u64)
            .unwrap_or(UNBOUNDED_MAX_PER_SERVER),
        ping_interval_ms: settings.ping_interval.as_millis() as u64,
        eviction_timeout_ms: settings.eviction_timeout.as_millis() as u64,
        banned_ips,
        banned_names,
        servers,
        recent_assignments,
    }
}
