//! Static selection: weighted round-robin.

use crate::config::Settings;
use crate::registry::endpoint::Endpoint;
use crate::registry::ring::slot_index;
use crate::registry::Registry;

/// Walk the shared cursor over the weighted ring (or over the undrained
/// list while the ring is empty), skipping drained and over-capacity
/// entries. The walk tries `2 * len + 1` slots before a plain linear scan
/// decides; both failing means nothing is schedulable.
pub fn select(registry: &Registry, settings: &Settings) -> Option<Endpoint> {
    let candidates = registry.undrained_endpoints();
    if candidates.is_empty() {
        return None;
    }

    let ring = registry.ring().snapshot();
    let pool: &[Endpoint] = if ring.is_empty() { &candidates } else { &ring };
    let len = pool.len();
    for _ in 0..len * 2 + 1 {
        let idx = slot_index(registry.ring().advance(), len);
        let candidate = &pool[idx];
        if registry.is_schedulable(candidate, settings.max_per_server) {
            return Some(candidate.clone());
        }
    }

    candidates
        .into_iter()
        .find(|ep| registry.is_schedulable(ep, settings.max_per_server))
}
