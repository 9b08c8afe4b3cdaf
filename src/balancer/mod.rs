//! Server selection.
//!
//! Three policies over the schedulable subset of the registry:
//! - static: weighted round-robin over the materialized ring
//! - dynamic: lowest RTT with a live-count tiebreaker
//! - sticky: the client's remembered server, falling back to dynamic
//!
//! Sticky memory is populated by every successful assignment regardless of
//! mode, so a later `sticky` request revisits whatever server the client was
//! last routed to.

pub mod lowest_rtt;
pub mod weighted_rr;

use crate::config::{Mode, Settings};
use crate::registry::endpoint::Endpoint;
use crate::registry::{now_ms, AssignmentRecord, Registry};

/// Pick a server for the named client under the given mode, or `None` when
/// nothing is schedulable.
pub fn select_server(
    registry: &Registry,
    settings: &Settings,
    client_name: &str,
    mode: Mode,
) -> Option<Endpoint> {
    match mode {
        Mode::Sticky => {
            if let Some(previous) = registry.sticky_for(client_name) {
                if registry.is_schedulable(&previous, settings.max_per_server) {
                    return Some(previous);
                }
            }
            lowest_rtt::select(registry, settings)
        }
        Mode::Dynamic => lowest_rtt::select(registry, settings),
        Mode::Static => weighted_rr::select(registry, settings),
    }
}

/// Bookkeeping for a successful assignment: bump the target's request
/// counter, remember it in sticky memory, and append the record to both
/// bounded rings.
pub fn commit_assignment(
    registry: &Registry,
    client_name: &str,
    mode: Mode,
    server: &Endpoint,
    observed_remote: &str,
) -> AssignmentRecord {
    registry.set_sticky(client_name, server.clone());
    registry.bump_request_count(server);
    let record = AssignmentRecord {
        client_name: client_name.to_string(),
        mode,
        assigned_at_ms: now_ms(),
        server: server.clone(),
        observed_remote: observed_remote.to_string(),
    };
    registry.record_assignment(record.clone());
    record
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    #[test]
    fn sticky_returns_remembered_server_while_schedulable() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.set_sticky("Carol", ep(9002));

        assert_eq!(
            select_server(&registry, &settings, "Carol", Mode::Sticky),
            Some(ep(9002))
        );
    }

    #[test]
    fn sticky_falls_back_when_remembered_server_is_drained() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.set_sticky("Carol", ep(9001));
        registry.drain(&ep(9001)).unwrap();

        // no RTT data yet: dynamic falls back to the ring, which skips the
        // drained server
        assert_eq!(
            select_server(&registry, &settings, "Carol", Mode::Sticky),
            Some(ep(9002))
        );
    }

    #[test]
    fn commit_updates_sticky_counter_and_rings() {
        let registry = Registry::new();
        registry.register(ep(9001));

        let record = commit_assignment(&registry, "Dave", Mode::Static, &ep(9001), "10.9.9.9:1234");
        assert_eq!(record.server, ep(9001));
        assert_eq!(registry.sticky_for("Dave"), Some(ep(9001)));
        assert_eq!(registry.request_count(&ep(9001)), 1);
        assert_eq!(registry.recent_assignments(10).len(), 1);
    }

    #[test]
    fn no_servers_means_no_selection() {
        let registry = Registry::new();
        let settings = Settings::default();
        for mode in [Mode::Static, Mode::Dynamic, Mode::Sticky] {
            assert_eq!(select_server(&registry, &settings, "x", mode), None);
        }
    }
}
