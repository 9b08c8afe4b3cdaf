//! The admin command grammar.
//!
//! One function from a command line to response lines, shared by the remote
//! admin channel (which appends `END`) and the stdin console (which prints
//! to stdout). Verbs are case-insensitive and whitespace-delimited.
//! Configuration errors answer `ERROR: …` and mutate nothing.

use std::sync::Arc;
use std::time::Duration;

use crate::config::Mode;
use crate::lb::LbState;
use crate::registry::endpoint::Endpoint;

pub struct AdminInterpreter {
    state: Arc<LbState>,
}

impl AdminInterpreter {
    pub fn new(state: Arc<LbState>) -> Self {
        Self { state }
    }

    /// Execute a single command line and return the response lines.
    pub fn execute(&self, line: &str) -> Vec<String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            return Vec::new();
        };
        match first.to_ascii_lowercase().as_str() {
            "servers" => self.servers_lines(),
            "live" => self.live_lines(),
            "status" => {
                let mut out = self.servers_lines();
                out.extend(self.live_lines());
                out
            }
            "recent" | "clients" => self.recent_lines(),
            "weights" => self.weights_lines(),
            "drained" => self.drained_lines(),
            "bans" => self.bans_lines(),
            "drain" => self.drain(&tokens),
            "undrain" => self.undrain(&tokens),
            "setweight" => self.set_weight(&tokens),
            "remove" => self.remove(&tokens),
            "ban" => self.set_ban(&tokens, true),
            "unban" => self.set_ban(&tokens, false),
            "set" => self.set(&tokens),
            "mode" => self.mode(&tokens),
            "clear" => {
                self.state.registry.clear_assignments();
                vec!["Cleared assignment history.".into()]
            }
            "help" => help_lines(),
            other => vec![format!("Unknown: {other}")],
        }
    }

    fn servers_lines(&self) -> Vec<String> {
        let snapshot = self.state.registry.snapshot();
        if snapshot.is_empty() {
            return vec!["(none)".into()];
        }
        snapshot
            .into_iter()
            .map(|snap| {
                let rtt = snap
                    .rtt_ms
                    .map(|rtt| format!("{rtt}ms"))
                    .unwrap_or_else(|| "n/a".into());
                format!(
                    "{}  rtt={}  w={}  live={}  req={}  health={}%{}",
                    snap.endpoint,
                    rtt,
                    snap.weight,
                    snap.live_clients.len(),
                    snap.request_count,
                    snap.health_score,
                    if snap.drained { " [DRAINED]" } else { "" },
                )
            })
            .collect()
    }

    fn live_lines(&self) -> Vec<String> {
        let snapshot = self.state.registry.snapshot();
        if snapshot.is_empty() {
            return vec!["(no servers)".into()];
        }
        let mut out = Vec::new();
        for snap in snapshot {
            out.push(format!(
                "{}  ({} clients)",
                snap.endpoint,
                snap.live_clients.len()
            ));
            for client in snap.live_clients {
                out.push(format!("  - {}  ip={}", client.name, client.ip));
            }
        }
        out
    }

    fn recent_lines(&self) -> Vec<String> {
        let recent = self.state.registry.recent_assignments(100);
        if recent.is_empty() {
            return vec!["(none)".into()];
        }
        recent
            .into_iter()
            .map(|record| {
                format!(
                    "{}  client={}  mode={}  -> {}  from={}",
                    record.assigned_at_ms,
                    record.client_name,
                    record.mode,
                    record.server,
                    record.observed_remote,
                )
            })
            .collect()
    }

    fn weights_lines(&self) -> Vec<String> {
        let lines: Vec<String> = self
            .state
            .registry
            .snapshot()
            .into_iter()
            .filter(|snap| snap.weight != 1)
            .map(|snap| format!("{} -> {}", snap.endpoint, snap.weight))
            .collect();
        if lines.is_empty() {
            vec!["(all weight=1)".into()]
        } else {
            lines
        }
    }

    fn drained_lines(&self) -> Vec<String> {
        let drained = self.state.registry.drained_endpoints();
        if drained.is_empty() {
            return vec!["(none)".into()];
        }
        drained.into_iter().map(|ep| format!("- {ep}")).collect()
    }

    fn bans_lines(&self) -> Vec<String> {
        let settings = self.state.settings.load();
        let mut ips: Vec<String> = settings.banned_ips.iter().cloned().collect();
        ips.sort();
        let mut names: Vec<String> = settings.banned_names.iter().cloned().collect();
        names.sort();
        vec![
            format!("IPs: [{}]", ips.join(", ")),
            format!("Names: [{}]", names.join(", ")),
        ]
    }

    fn drain(&self, tokens: &[&str]) -> Vec<String> {
        let Some(target) = tokens.get(1) else {
            return vec!["ERROR: usage: drain <host:port|all>".into()];
        };
        if target.eq_ignore_ascii_case("all") {
            self.state.registry.drain_all();
            return vec!["All servers drained.".into()];
        }
        match parse_endpoint(target) {
            Ok(ep) => match self.state.registry.drain(&ep) {
                Ok(()) => vec![format!("Drained: {ep}")],
                Err(e) => vec![format!("ERROR: {e}")],
            },
            Err(e) => vec![e],
        }
    }

    fn undrain(&self, tokens: &[&str]) -> Vec<String> {
        let Some(target) = tokens.get(1) else {
            return vec!["ERROR: usage: undrain <host:port|all>".into()];
        };
        if target.eq_ignore_ascii_case("all") {
            self.state.registry.undrain_all();
            return vec!["All servers undrained.".into()];
        }
        match parse_endpoint(target) {
            Ok(ep) => {
                self.state.registry.undrain(&ep);
                vec![format!("Undrained: {ep}")]
            }
            Err(e) => vec![e],
        }
    }

    fn set_weight(&self, tokens: &[&str]) -> Vec<String> {
        let (Some(target), Some(value)) = (tokens.get(1), tokens.get(2)) else {
            return vec!["ERROR: usage: setweight <host:port> <N>".into()];
        };
        let ep = match parse_endpoint(target) {
            Ok(ep) => ep,
            Err(e) => return vec![e],
        };
        let Ok(weight) = value.parse::<i64>() else {
            return vec![format!("ERROR: invalid number: {value}")];
        };
        match self.state.registry.set_weight(&ep, weight) {
            Ok(applied) => vec![format!("Weight set: {ep} -> {applied}")],
            Err(e) => vec![format!("ERROR: {e}")],
        }
    }

    fn remove(&self, tokens: &[&str]) -> Vec<String> {
        let Some(target) = tokens.get(1) else {
            return vec!["ERROR: usage: remove <host:port>".into()];
        };
        match parse_endpoint(target) {
            Ok(ep) => {
                self.state.registry.remove(&ep);
                vec![format!("Removed server: {ep}")]
            }
            Err(e) => vec![e],
        }
    }

    fn set_ban(&self, tokens: &[&str], banned: bool) -> Vec<String> {
        let verb = if banned { "ban" } else { "unban" };
        let (Some(kind), Some(value)) = (tokens.get(1), tokens.get(2)) else {
            return vec![format!("ERROR: usage: {verb} ip <x> | {verb} name <x>")];
        };
        let value = value.to_string();
        match kind.to_ascii_lowercase().as_str() {
            "ip" => {
                self.state.settings.update(|s| {
                    if banned {
                        s.banned_ips.insert(value.clone());
                    } else {
                        s.banned_ips.remove(&value);
                    }
                });
                vec![format!(
                    "{} IP {value}",
                    if banned { "Banned" } else { "Unbanned" }
                )]
            }
            "name" => {
                self.state.settings.update(|s| {
                    if banned {
                        s.banned_names.insert(value.clone());
                    } else {
                        s.banned_names.remove(&value);
                    }
                });
                vec![format!(
                    "{} name {value}",
                    if banned { "Banned" } else { "Unbanned" }
                )]
            }
            _ => vec![format!("ERROR: usage: {verb} ip <x> | {verb} name <x>")],
        }
    }

    fn set(&self, tokens: &[&str]) -> Vec<String> {
        let (Some(key), Some(value)) = (tokens.get(1), tokens.get(2)) else {
            return vec!["ERROR: usage: set ping <ms> | set maxconn <N> | set evict <ms>".into()];
        };
        match key.to_ascii_lowercase().as_str() {
            "ping" => {
                let Ok(ms) = value.parse::<u64>() else {
                    return vec![format!("ERROR: invalid number: {value}")];
                };
                self.state
                    .settings
                    .update(|s| s.ping_interval = Duration::from_millis(ms));
                let effective = self.state.settings.load().ping_interval.as_millis();
                vec![format!("RTT ping interval set to {effective}ms")]
            }
            "maxconn" => {
                let Ok(cap) = value.parse::<usize>() else {
                    return vec![format!("ERROR: invalid number: {value}")];
                };
                self.state
                    .settings
                    .update(|s| s.max_per_server = Some(cap));
                vec![format!("Max live clients per server set to {cap}")]
            }
            "evict" => {
                let Ok(ms) = value.parse::<u64>() else {
                    return vec![format!("ERROR: invalid number: {value}")];
                };
                self.state
                    .settings
                    .update(|s| s.eviction_timeout = Duration::from_millis(ms));
                vec![format!("Server eviction timeout set to {ms}ms")]
            }
            _ => vec!["ERROR: usage: set ping <ms> | set maxconn <N> | set evict <ms>".into()],
        }
    }

    fn mode(&self, tokens: &[&str]) -> Vec<String> {
        if !matches!(tokens.get(1), Some(t) if t.eq_ignore_ascii_case("default")) {
            return vec!["ERROR: usage: mode default <static|dynamic>".into()];
        }
        let mode = tokens.get(2).and_then(|t| Mode::parse(t));
        match mode {
            Some(mode @ (Mode::Static | Mode::Dynamic)) => {
                self.state.settings.update(|s| s.default_mode = mode);
                vec![format!("Default mode set to {mode}")]
            }
            // sticky is not a valid default
            _ => vec!["ERROR: value must be static|dynamic".into()],
        }
    }
}

fn parse_endpoint(token: &str) -> Result<Endpoint, String> {
    token
        .parse::<Endpoint>()
        .map_err(|e| format!("ERROR: {e}"))
}

fn help_lines() -> Vec<String> {
    [
        "Commands:",
        "  servers                  - list servers (rtt, weight, live, req, health, drain)",
        "  live                     - live clients per server (reported)",
        "  status                   - servers + live",
        "  recent                   - recent assignments",
        "  weights                  - non-default weights",
        "  drained                  - list drained servers",
        "  drain <host:port|all>    - mark server(s) unschedulable",
        "  undrain <host:port|all>  - make schedulable again",
        "  setweight <host:port> <N>",
        "  remove <host:port>",
        "  ban ip <x> | ban name <x> | unban ip <x> | unban name <x> | bans",
        "  mode default <static|dynamic>",
        "  set ping <ms> | set maxconn <N> | set evict <ms>",
        "  clear                    - clear assignment history",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Settings, MIN_PING_INTERVAL};

    fn interpreter() -> AdminInterpreter {
        AdminInterpreter::new(Arc::new(LbState::new(Settings::default())))
    }

    fn ep(port: u16) -> Endpoint {
        Endpoint::new("10.0.0.1", port)
    }

    #[test]
    fn unknown_verb_is_reported() {
        let admin = interpreter();
        assert_eq!(admin.execute("frobnicate now"), vec!["Unknown: frobnicate"]);
        assert!(admin.execute("").is_empty());
    }

    #[test]
    fn verbs_are_case_insensitive() {
        let admin = interpreter();
        assert_eq!(admin.execute("SERVERS"), vec!["(none)"]);
        assert_eq!(admin.execute("Bans")[0], "IPs: []");
    }

    #[test]
    fn setweight_clamps_and_errors_on_unknown() {
        let admin = interpreter();
        admin.state.registry.register(ep(9001));

        assert_eq!(
            admin.execute("setweight 10.0.0.1:9001 0"),
            vec!["Weight set: 10.0.0.1:9001 -> 1"]
        );
        assert_eq!(
            admin.execute("setweight 10.0.0.1:9001 3"),
            vec!["Weight set: 10.0.0.1:9001 -> 3"]
        );
        assert_eq!(admin.state.registry.weight(&ep(9001)), 3);

        let out = admin.execute("setweight 10.0.0.9:9999 2");
        assert!(out[0].starts_with("ERROR: no such server registered"));
        let out = admin.execute("setweight 10.0.0.1:9001 heavy");
        assert_eq!(out, vec!["ERROR: invalid number: heavy"]);
        // failed commands left the weight alone
        assert_eq!(admin.state.registry.weight(&ep(9001)), 3);
    }

    #[test]
    fn drain_undrain_and_listing() {
        let admin = interpreter();
        admin.state.registry.register(ep(9001));

        assert_eq!(admin.execute("drained"), vec!["(none)"]);
        assert_eq!(
            admin.execute("drain 10.0.0.1:9001"),
            vec!["Drained: 10.0.0.1:9001"]
        );
        assert_eq!(admin.execute("drained"), vec!["- 10.0.0.1:9001"]);
        assert_eq!(
            admin.execute("undrain 10.0.0.1:9001"),
            vec!["Undrained: 10.0.0.1:9001"]
        );
        assert!(!admin.state.registry.is_drained(&ep(9001)));

        let out = admin.execute("drain 10.0.0.9:9999");
        assert!(out[0].starts_with("ERROR: no such server registered"));

        assert_eq!(admin.execute("drain all"), vec!["All servers drained."]);
        assert!(admin.state.registry.is_drained(&ep(9001)));
        assert_eq!(admin.execute("undrain all"), vec!["All servers undrained."]);
    }

    #[test]
    fn ban_and_unban_mutate_settings() {
        let admin = interpreter();
        admin.execute("ban name Mallory");
        admin.execute("ban ip 10.6.6.6");
        let settings = admin.state.settings.load();
        assert!(settings.banned_names.contains("Mallory"));
        assert!(settings.banned_ips.contains("10.6.6.6"));
        assert_eq!(
            admin.execute("bans"),
            vec!["IPs: [10.6.6.6]", "Names: [Mallory]"]
        );

        admin.execute("unban name Mallory");
        admin.execute("unban ip 10.6.6.6");
        let settings = admin.state.settings.load();
        assert!(settings.banned_names.is_empty());
        assert!(settings.banned_ips.is_empty());

        let out = admin.execute("ban subnet 10.0.0.0/8");
        assert!(out[0].starts_with("ERROR: usage: ban"));
    }

    #[test]
    fn set_ping_floors_to_minimum() {
        let admin = interpreter();
        assert_eq!(
            admin.execute("set ping 50"),
            vec!["RTT ping interval set to 200ms"]
        );
        assert_eq!(admin.state.settings.load().ping_interval, MIN_PING_INTERVAL);

        assert_eq!(
            admin.execute("set ping 700"),
            vec!["RTT ping interval set to 700ms"]
        );
    }

    #[test]
    fn set_maxconn_and_evict() {
        let admin = interpreter();
        admin.execute("set maxconn 4");
        assert_eq!(admin.state.settings.load().max_per_server, Some(4));
        admin.execute("set evict 3000");
        assert_eq!(
            admin.state.settings.load().eviction_timeout,
            Duration::from_millis(3000)
        );
        assert_eq!(
            admin.execute("set evict soon"),
            vec!["ERROR: invalid number: soon"]
        );
    }

    #[test]
    fn default_mode_rejects_sticky() {
        let admin = interpreter();
        assert_eq!(
            admin.execute("mode default dynamic"),
            vec!["Default mode set to dynamic"]
        );
        assert_eq!(
            admin.state.settings.load().default_mode,
            Mode::Dynamic
        );
        assert_eq!(
            admin.execute("mode default sticky"),
            vec!["ERROR: value must be static|dynamic"]
        );
        assert_eq!(
            admin.state.settings.load().default_mode,
            Mode::Dynamic
        );
    }

    #[test]
    fn clear_drops_assignment_history() {
        let admin = interpreter();
        admin.state.registry.register(ep(9001));
        crate::balancer::commit_assignment(
            &admin.state.registry,
            "Alice",
            Mode::Static,
            &ep(9001),
            "127.0.0.1:5",
        );
        assert_ne!(admin.execute("recent"), vec!["(none)"]);
        assert_eq!(
            admin.execute("clear"),
            vec!["Cleared assignment history."]
        );
        assert_eq!(admin.execute("recent"), vec!["(none)"]);
    }

    #[test]
    fn servers_listing_carries_state() {
        let admin = interpreter();
        admin.state.registry.register(ep(9001));
        admin.state.registry.record_probe(&ep(9001), Some(7));
        admin.state.registry.drain(&ep(9001)).unwrap();

        let lines = admin.execute("servers");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("10.0.0.1:9001"));
        assert!(lines[0].contains("rtt=7ms"));
        assert!(lines[0].contains("[DRAINED]"));
    }
}
