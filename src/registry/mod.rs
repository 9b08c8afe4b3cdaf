//! The authoritative server registry and its derived state.
//!
//! # Concurrency
//! The registered set itself sits behind one coarse mutex and is iterated on
//! a copy. Everything derived per endpoint (weight, drain flag, RTT, live
//! clients, request counter, ping history, last-seen) lives in concurrent
//! maps keyed by endpoint, each independently thread-safe. The weighted ring
//! is published by atomic replacement.
//!
//! Removing a server purges every derived map and every sticky entry that
//! points at it, so derived-state keys always refer to a registered
//! endpoint. Reports and probe outcomes for unknown endpoints are discarded
//! for the same reason.

pub mod endpoint;
pub mod ring;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::{DashMap, DashSet};
use thiserror::Error;

use crate::config::Mode;

use self::endpoint::{Endpoint, LiveClient};
use self::ring::WeightedRing;

/// Ping outcomes retained per server.
pub const HEALTH_WINDOW: usize = 10;

/// Global bound on the recent-assignments ring.
pub const MAX_RECENT_ASSIGNMENTS: usize = 500;

/// Bound on the per-server assignment ring.
pub const MAX_ASSIGNED_PER_SERVER: usize = 200;

/// Milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("no such server registered: {0}")]
    UnknownServer(Endpoint),
}

/// One successful client assignment. Never mutated; dropped when it falls
/// off a bounded ring.
#[derive(Debug, Clone)]
pub struct AssignmentRecord {
    pub client_name: String,
    pub mode: Mode,
    pub assigned_at_ms: u64,
    pub server: Endpoint,
    /// Remote address the LB observed on the handshake socket.
    pub observed_remote: String,
}

/// Point-in-time view of one server, for the status feed and admin listings.
#[derive(Debug, Clone)]
pub struct ServerSnapshot {
    pub endpoint: Endpoint,
    pub weight: u32,
    pub drained: bool,
    pub rtt_ms: Option<u64>,
    pub live_clients: Vec<LiveClient>,
    pub request_count: u64,
    pub health_score: u8,
    pub last_seen_ms: u64,
}

pub struct Registry {
    servers: Mutex<Vec<Endpoint>>,
    weights: DashMap<Endpoint, u32>,
    drained: DashSet<Endpoint>,
    rtts: DashMap<Endpoint, u64>,
    live_by_server: DashMap<Endpoint, Vec<LiveClient>>,
    request_counts: DashMap<Endpoint, AtomicU64>,
    ping_history: DashMap<Endpoint, VecDeque<bool>>,
    last_seen: DashMap<Endpoint, u64>,
    sticky: DashMap<String, Endpoint>,
    assigned_by_server: DashMap<Endpoint, Vec<AssignmentRecord>>,
    recent: Mutex<VecDeque<AssignmentRecord>>,
    ring: WeightedRing,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            servers: Mutex::new(Vec::new()),
            weights: DashMap::new(),
            drained: DashSet::new(),
            rtts: DashMap::new(),
            live_by_server: DashMap::new(),
            request_counts: DashMap::new(),
            ping_history: DashMap::new(),
            last_seen: DashMap::new(),
            sticky: DashMap::new(),
            assigned_by_server: DashMap::new(),
            recent: Mutex::new(VecDeque::new()),
            ring: WeightedRing::new(),
        }
    }

    /// Register a server, or refresh its last-seen timestamp if it is
    /// already present. Returns true for a fresh registration.
    pub fn register(&self, ep: Endpoint) -> bool {
        let mut servers = self.servers.lock().unwrap();
        if servers.contains(&ep) {
            self.last_seen.insert(ep, now_ms());
            return false;
        }
        servers.push(ep.clone());
        self.weights.entry(ep.clone()).or_insert(1);
        self.request_counts
            .entry(ep.clone())
            .or_insert_with(|| AtomicU64::new(0));
        self.last_seen.insert(ep, now_ms());
        self.rebuild_ring_locked(&servers);
        true
    }

    /// Purge a server and every piece of derived state, including sticky
    /// entries pointing at it. Idempotent.
    pub fn remove(&self, ep: &Endpoint) {
        let mut servers = self.servers.lock().unwrap();
        servers.retain(|s| s != ep);
        self.weights.remove(ep);
        self.drained.remove(ep);
        self.rtts.remove(ep);
        self.live_by_server.remove(ep);
        self.assigned_by_server.remove(ep);
        self.ping_history.remove(ep);
        self.last_seen.remove(ep);
        self.request_counts.remove(ep);
        self.sticky.retain(|_, v| *v != *ep);
        self.rebuild_ring_locked(&servers);
    }

    pub fn is_registered(&self, ep: &Endpoint) -> bool {
        self.servers.lock().unwrap().contains(ep)
    }

    /// Registered endpoints in registration order.
    pub fn endpoints(&self) -> Vec<Endpoint> {
        self.servers.lock().unwrap().clone()
    }

    /// Registered, non-drained endpoints in registration order.
    pub fn undrained_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints = self.endpoints();
        endpoints.retain(|ep| !self.drained.contains(ep));
        endpoints
    }

    /// Apply a server report: refresh last-seen, replace the live-client
    /// list wholesale. Reports from unregistered endpoints are discarded;
    /// returns false in that case.
    pub fn record_report(&self, ep: &Endpoint, clients: Vec<LiveClient>) -> bool {
        if !self.is_registered(ep) {
            return false;
        }
        self.last_seen.insert(ep.clone(), now_ms());
        self.live_by_server.insert(ep.clone(), clients);
        true
    }

    /// Set a server's weight, clamped to >= 1, and rebuild the ring.
    pub fn set_weight(&self, ep: &Endpoint, weight: i64) -> Result<u32, RegistryError> {
        let weight = weight.clamp(1, u32::MAX as i64) as u32;
        let servers = self.servers.lock().unwrap();
        if !servers.contains(ep) {
            return Err(RegistryError::UnknownServer(ep.clone()));
        }
        self.weights.insert(ep.clone(), weight);
        self.rebuild_ring_locked(&servers);
        Ok(weight)
    }

    pub fn weight(&self, ep: &Endpoint) -> u32 {
        self.weights.get(ep).map(|w| *w.value()).unwrap_or(1)
    }

    /// Hide a server from selection; it stays registered and probed.
    pub fn drain(&self, ep: &Endpoint) -> Result<(), RegistryError> {
        if !self.is_registered(ep) {
            return Err(RegistryError::UnknownServer(ep.clone()));
        }
        self.drained.insert(ep.clone());
        Ok(())
    }

    pub fn undrain(&self, ep: &Endpoint) {
        self.drained.remove(ep);
    }

    pub fn drain_all(&self) {
        for ep in self.endpoints() {
            self.drained.insert(ep);
        }
    }

    pub fn undrain_all(&self) {
        self.drained.clear();
    }

    pub fn is_drained(&self, ep: &Endpoint) -> bool {
        self.drained.contains(ep)
    }

    pub fn drained_endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.drained.iter().map(|e| e.key().clone()).collect();
        endpoints.sort_by(|a, b| a.addr.cmp(&b.addr).then(a.port.cmp(&b.port)));
        endpoints
    }

    /// Record one probe outcome. `Some(rtt)` updates the RTT cache and
    /// pushes a success; `None` leaves the RTT alone and pushes a failure.
    /// Outcomes for unregistered endpoints are discarded.
    pub fn record_probe(&self, ep: &Endpoint, rtt_ms: Option<u64>) {
        if !self.is_registered(ep) {
            return;
        }
        if let Some(rtt) = rtt_ms {
            self.rtts.insert(ep.clone(), rtt);
        }
        let mut history = self.ping_history.entry(ep.clone()).or_default();
        history.push_back(rtt_ms.is_some());
        while history.len() > HEALTH_WINDOW {
            history.pop_front();
        }
    }

    /// Ping success rate 0-100; 100 when no history exists.
    pub fn health_score(&self, ep: &Endpoint) -> u8 {
        match self.ping_history.get(ep) {
            Some(history) if !history.is_empty() => {
                let ok = history.iter().filter(|outcome| **outcome).count();
                (ok * 100 / history.len()) as u8
            }
            _ => 100,
        }
    }

    pub fn rtt_ms(&self, ep: &Endpoint) -> Option<u64> {
        self.rtts.get(ep).map(|rtt| *rtt.value())
    }

    pub fn live_count(&self, ep: &Endpoint) -> usize {
        self.live_by_server.get(ep).map(|l| l.value().len()).unwrap_or(0)
    }

    pub fn live_clients(&self, ep: &Endpoint) -> Vec<LiveClient> {
        self.live_by_server
            .get(ep)
            .map(|l| l.value().clone())
            .unwrap_or_default()
    }

    pub fn request_count(&self, ep: &Endpoint) -> u64 {
        self.request_counts
            .get(ep)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn bump_request_count(&self, ep: &Endpoint) {
        if let Some(counter) = self.request_counts.get(ep) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn last_seen_ms(&self, ep: &Endpoint) -> Option<u64> {
        self.last_seen.get(ep).map(|seen| *seen.value())
    }

    /// Registered endpoints whose last-seen timestamp is older than the
    /// cutoff. The evictor removes these.
    pub fn stale_endpoints(&self, cutoff_ms: u64) -> Vec<Endpoint> {
        self.endpoints()
            .into_iter()
            .filter(|ep| {
                self.last_seen_ms(ep)
                    .map_or(false, |seen| seen < cutoff_ms)
            })
            .collect()
    }

    /// Registered, not drained, and under the live-client cap.
    pub fn is_schedulable(&self, ep: &Endpoint, max_per_server: Option<usize>) -> bool {
        if !self.is_registered(ep) || self.drained.contains(ep) {
            return false;
        }
        match max_per_server {
            None => true,
            Some(cap) => self.live_count(ep) < cap,
        }
    }

    pub fn sticky_for(&self, client_name: &str) -> Option<Endpoint> {
        self.sticky.get(client_name).map(|ep| ep.value().clone())
    }

    pub fn set_sticky(&self, client_name: &str, ep: Endpoint) {
        self.sticky.insert(client_name.to_string(), ep);
    }

    /// Append to both bounded assignment rings, evicting oldest entries.
    pub fn record_assignment(&self, record: AssignmentRecord) {
        {
            let mut per_server = self
                .assigned_by_server
                .entry(record.server.clone())
                .or_default();
            per_server.push(record.clone());
            if per_server.len() > MAX_ASSIGNED_PER_SERVER {
                let excess = per_server.len() - MAX_ASSIGNED_PER_SERVER;
                per_server.drain(..excess);
            }
        }
        let mut recent = self.recent.lock().unwrap();
        recent.push_back(record);
        while recent.len() > MAX_RECENT_ASSIGNMENTS {
            recent.pop_front();
        }
    }

    /// The newest assignments, oldest first, at most `limit`.
    pub fn recent_assignments(&self, limit: usize) -> Vec<AssignmentRecord> {
        let recent = self.recent.lock().unwrap();
        let skip = recent.len().saturating_sub(limit);
        recent.iter().skip(skip).cloned().collect()
    }

    /// Drop both assignment rings.
    pub fn clear_assignments(&self) {
        self.assigned_by_server.clear();
        self.recent.lock().unwrap().clear();
    }

    pub fn ring(&self) -> &WeightedRing {
        &self.ring
    }

    /// Sorted point-in-time copy for the status feed and admin listings.
    pub fn snapshot(&self) -> Vec<ServerSnapshot> {
        let mut endpoints = self.endpoints();
        endpoints.sort_by(|a, b| a.addr.cmp(&b.addr).then(a.port.cmp(&b.port)));
        endpoints
            .into_iter()
            .map(|ep| ServerSnapshot {
                weight: self.weight(&ep),
                drained: self.drained.contains(&ep),
                rtt_ms: self.rtt_ms(&ep),
                live_clients: self.live_clients(&ep),
                request_count: self.request_count(&ep),
                health_score: self.health_score(&ep),
                last_seen_ms: self.last_seen_ms(&ep).unwrap_or(0),
                endpoint: ep,
            })
            .collect()
    }

    fn rebuild_ring_locked(&self, servers: &[Endpoint]) {
        let mut expanded = Vec::new();
        for ep in servers {
            let weight = self.weight(ep).max(1);
            for _ in 0..weight {
                expanded.push(ep.clone());
            }
        }
        self.ring.rebuild(expanded);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
