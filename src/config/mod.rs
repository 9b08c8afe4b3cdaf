//! Configuration for the load balancer.
//!
//! Two layers: [`Ports`] is fixed at startup, [`Settings`] is the runtime
//! record every admin command mutates and every listener reads per request.
//! The runtime record lives behind a single accessor ([`SharedSettings`]) and
//! is replaced wholesale so readers never observe a half-applied change.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::{Serialize, Serializer};
use tokio::sync::watch;

/// Lower bound on the RTT probe period.
pub const MIN_PING_INTERVAL: Duration = Duration::from_millis(200);

/// Default RTT probe period.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(1000);

/// Default staleness threshold for server eviction.
pub const DEFAULT_EVICTION_TIMEOUT: Duration = Duration::from_millis(15_000);

/// Selection policy requested by a client (or configured as the default).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Static,
    Dynamic,
    Sticky,
}

impl Mode {
    /// Parse a mode token, case-insensitively. Unrecognized tokens yield
    /// `None` so callers fall back to the configured default.
    pub fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "static" => Some(Mode::Static),
            "dynamic" => Some(Mode::Dynamic),
            "sticky" => Some(Mode::Sticky),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Static => "static",
            Mode::Dynamic => "dynamic",
            Mode::Sticky => "sticky",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Mode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// Listening ports for the four surfaces.
#[derive(Debug, Clone, Copy)]
pub struct Ports {
    /// Client handshake port.
    pub client: u16,
    /// Server registration/report port.
    pub registration: u16,
    /// Read-only JSON status port.
    pub status: u16,
    /// Remote admin command port.
    pub admin: u16,
}

impl Default for Ports {
    fn default() -> Self {
        Self {
            client: 11114,
            registration: 11115,
            status: 11116,
            admin: 11117,
        }
    }
}

/// Runtime configuration, mutable through the admin surfaces.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Mode used when a client omits or mangles the mode token.
    pub default_mode: Mode,
    /// Cap on reported live clients before a server stops being schedulable.
    /// `None` means unbounded.
    pub max_per_server: Option<usize>,
    /// RTT probe period; never below [`MIN_PING_INTERVAL`].
    pub ping_interval: Duration,
    /// Servers unseen for longer than this are evicted.
    pub eviction_timeout: Duration,
    /// Client IPs refused at the handshake.
    pub banned_ips: HashSet<String>,
    /// Client names refused at the handshake.
    pub banned_names: HashSet<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            default_mode: Mode::Static,
            max_per_server: None,
            ping_interval: DEFAULT_PING_INTERVAL,
            eviction_timeout: DEFAULT_EVICTION_TIMEOUT,
            banned_ips: HashSet::new(),
            banned_names: HashSet::new(),
        }
    }
}

/// Single accessor for the runtime [`Settings`] record.
///
/// Readers take the current record with [`load`](Self::load); writers replace
/// it atomically. Ping-interval changes additionally fan out over a watch
/// channel so the prober can restart its schedule.
pub struct SharedSettings {
    current: ArcSwap<Settings>,
    ping_tx: watch::Sender<Duration>,
}

impl SharedSettings {
    pub fn new(initial: Settings) -> Self {
        let mut initial = initial;
        if initial.ping_interval < MIN_PING_INTERVAL {
            initial.ping_interval = MIN_PING_INTERVAL;
        }
        let (ping_tx, _) = watch::channel(initial.ping_interval);
        Self {
            current: ArcSwap::from_pointee(initial),
            ping_tx,
        }
    }

    /// Current record. Cheap; call once per request.
    pub fn load(&self) -> Arc<Settings> {
        self.current.load_full()
    }

    /// Apply a mutation to a copy of the record and publish the result.
    /// The ping interval is floored at [`MIN_PING_INTERVAL`] on every write.
    pub fn update(&self, mutate: impl Fn(&mut Settings)) {
        self.current.rcu(|current| {
            let mut next = (**current).clone();
            mutate(&mut next);
            if next.ping_interval < MIN_PING_INTERVAL {
                next.ping_interval = MIN_PING_INTERVAL;
            }
            next
        });
        let interval = self.current.load().ping_interval;
        self.ping_tx.send_if_modified(|value| {
            if *value != interval {
                *value = interval;
                true
            } else {
                false
            }
        });
    }

    /// Watch the ping interval; the prober restarts its schedule on change.
    pub fn subscribe_ping_interval(&self) -> watch::Receiver<Duration> {
        self.ping_tx.subscribe()
    }
}

impl Default for SharedSettings {
    fn default() -> Self {
        Self::new(Settings::default())
    }
}
