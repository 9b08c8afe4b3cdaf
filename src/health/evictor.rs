//! Staleness eviction.
//!
//! Every sweep, servers whose last message (join, re-join, or report) is
//! older than the configured eviction timeout are removed. Eviction is
//! idempotent; a later `!join` simply re-creates the entry.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::lb::LbState;
use crate::registry::now_ms;

/// Sweep cadence. The staleness threshold itself is runtime-configurable.
const SWEEP_PERIOD: Duration = Duration::from_secs(5);

pub struct Evictor {
    state: Arc<LbState>,
}

impl Evictor {
    pub fn new(state: Arc<LbState>) -> Self {
        Self { state }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = tokio::time::sleep(SWEEP_PERIOD) => {}
            }
            self.sweep();
        }
    }

    fn sweep(&self) {
        let timeout_ms = self.state.settings.load().eviction_timeout.as_millis() as u64;
        let now = now_ms();
        let cutoff = now.saturating_sub(timeout_ms);
        for ep in self.state.registry.stale_endpoints(cutoff) {
            let age_ms = now.saturating_sub(self.state.registry.last_seen_ms(&ep).unwrap_or(now));
            tracing::info!(server = %ep, age_ms, "evicting stale server");
            self.state.registry.remove(&ep);
        }
    }
}
