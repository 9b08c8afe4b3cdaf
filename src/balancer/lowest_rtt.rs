//! Dynamic selection: lowest RTT with a live-count tiebreaker.

use crate::config::Settings;
use crate::registry::endpoint::Endpoint;
use crate::registry::Registry;

use super::weighted_rr;

/// Candidates within this window of the best RTT count as tied; ties go to
/// the server with fewer reported live clients.
pub const RTT_TIE_WINDOW_MS: u64 = 10;

/// Scan schedulable endpoints with a known RTT for the minimum, preferring
/// fewer live clients within [`RTT_TIE_WINDOW_MS`]. Without any RTT data the
/// static policy decides instead.
pub fn select(registry: &Registry, settings: &Settings) -> Option<Endpoint> {
    let candidates = registry.undrained_endpoints();
    if candidates.is_empty() {
        return None;
    }

    let mut best: Option<Endpoint> = None;
    let mut best_rtt = u64::MAX;
    let mut best_live = usize::MAX;
    let mut any_rtt = false;
    for candidate in &candidates {
        if !registry.is_schedulable(candidate, settings.max_per_server) {
            continue;
        }
        let Some(rtt) = registry.rtt_ms(candidate) else {
            continue;
        };
        any_rtt = true;
        let live = registry.live_count(candidate);
        let better_rtt = rtt.saturating_add(RTT_TIE_WINDOW_MS) < best_rtt;
        let tied_fewer_live = rtt.abs_diff(best_rtt) <= RTT_TIE_WINDOW_MS && live < best_live;
        if best.is_none() || better_rtt || tied_fewer_live {
            best = Some(candidate.clone());
            best_rtt = rtt;
            best_live = live;
        }
    }

    if !any_rtt {
        tracing::debug!("no rtt data yet, falling back to weighted round-robin");
        return weighted_rr::select(registry, settings);
    }
    best.or_else(|| weighted_rr::select(registry, settings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::endpoint::LiveClient;

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    fn live(n: usize) -> Vec<LiveClient> {
        (0..n)
            .map(|i| LiveClient {
                name: format!("c{i}"),
                ip: "10.0.0.99".into(),
            })
            .collect()
    }

    #[test]
    fn picks_lowest_rtt() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.record_probe(&ep(9001), Some(40));
        registry.record_probe(&ep(9002), Some(20));

        assert_eq!(select(&registry, &settings), Some(ep(9002)));
    }

    #[test]
    fn near_tie_prefers_fewer_live_clients() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.record_probe(&ep(9001), Some(20));
        registry.record_probe(&ep(9002), Some(25));
        registry.record_report(&ep(9001), live(5));
        registry.record_report(&ep(9002), live(1));

        // 25ms is within the 10ms window of 20ms, and 9002 is less loaded
        assert_eq!(select(&registry, &settings), Some(ep(9002)));
    }

    #[test]
    fn clear_rtt_gap_beats_load() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.record_probe(&ep(9001), Some(20));
        registry.record_probe(&ep(9002), Some(40));
        registry.record_report(&ep(9001), live(9));

        assert_eq!(select(&registry, &settings), Some(ep(9001)));
    }

    #[test]
    fn no_rtt_data_falls_back_to_static() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));

        assert_eq!(select(&registry, &settings), Some(ep(9001)));
    }

    #[test]
    fn servers_without_rtt_are_ignored_when_others_have_it() {
        let registry = Registry::new();
        let settings = Settings::default();
        registry.register(ep(9001));
        registry.register(ep(9002));
        registry.record_probe(&ep(9002), Some(100));

        assert_eq!(select(&registry, &settings), Some(ep(9002)));
    }
}
