//! Admin channel end-to-end: one-shot request/response framing, state
//! mutations, and staleness eviction.

use std::time::Duration;

mod common;

#[tokio::test]
async fn unknown_commands_still_terminate_with_end() {
    let lb = common::start_lb_default().await;

    // the helper panics if END never arrives
    let out = common::admin(lb.admin_addr, "frobnicate").await;
    assert_eq!(out, vec!["Unknown: frobnicate"]);

    let out = common::admin(lb.admin_addr, "setweight 127.0.0.1:9 soon").await;
    assert_eq!(out, vec!["ERROR: invalid number: soon"]);

    lb.shutdown.trigger();
}

#[tokio::test]
async fn servers_listing_reflects_drain_state() {
    let lb = common::start_lb_default().await;
    let backend = common::start_pong_backend().await;
    common::join(lb.registration_addr, backend.port()).await;
    let target = format!("127.0.0.1:{}", backend.port());

    let out = common::admin(lb.admin_addr, "servers").await;
    assert_eq!(out.len(), 1);
    assert!(out[0].starts_with(&target));
    assert!(!out[0].contains("[DRAINED]"));

    common::admin(lb.admin_addr, &format!("drain {target}")).await;
    let out = common::admin(lb.admin_addr, "servers").await;
    assert!(out[0].contains("[DRAINED]"));
    let out = common::admin(lb.admin_addr, "drained").await;
    assert_eq!(out, vec![format!("- {target}")]);

    common::admin(lb.admin_addr, &format!("undrain {target}")).await;
    let out = common::admin(lb.admin_addr, "drained").await;
    assert_eq!(out, vec!["(none)"]);

    lb.shutdown.trigger();
}

#[tokio::test]
async fn config_mutations_show_up_in_status() {
    let lb = common::start_lb_default().await;

    common::admin(lb.admin_addr, "set ping 50").await;
    common::admin(lb.admin_addr, "set maxconn 7").await;
    common::admin(lb.admin_addr, "set evict 9000").await;
    common::admin(lb.admin_addr, "mode default dynamic").await;
    common::admin(lb.admin_addr, "ban ip 10.6.6.6").await;

    let status = common::read_status(lb.status_addr).await;
    // below the floor: clamped up to 200
    assert_eq!(status["pingIntervalMs"], 200);
    assert_eq!(status["maxPerServer"], 7);
    assert_eq!(status["evictionTimeoutMs"], 9000);
    assert_eq!(status["defaultMode"], "dynamic");
    assert_eq!(status["bannedIps"][0], "10.6.6.6");

    let out = common::admin(lb.admin_addr, "mode default sticky").await;
    assert_eq!(out, vec!["ERROR: value must be static|dynamic"]);

    lb.shutdown.trigger();
}

#[tokio::test]
async fn clear_empties_recent_assignments() {
    let lb = common::start_lb_default().await;
    let backend = common::start_pong_backend().await;
    common::join(lb.registration_addr, backend.port()).await;

    common::hello(lb.client_addr, "HELLO Alice static").await;
    let status = common::read_status(lb.status_addr).await;
    assert_eq!(status["recentAssignments"].as_array().unwrap().len(), 1);

    common::admin(lb.admin_addr, "clear").await;
    let status = common::read_status(lb.status_addr).await;
    assert_eq!(status["recentAssignments"].as_array().unwrap().len(), 0);

    lb.shutdown.trigger();
}

#[tokio::test]
async fn remove_purges_server() {
    let lb = common::start_lb_default().await;
    let backend = common::start_pong_backend().await;
    common::join(lb.registration_addr, backend.port()).await;
    let target = format!("127.0.0.1:{}", backend.port());

    let out = common::admin(lb.admin_addr, &format!("remove {target}")).await;
    assert_eq!(out, vec![format!("Removed server: {target}")]);

    let out = common::admin(lb.admin_addr, "servers").await;
    assert_eq!(out, vec!["(none)"]);
    let reply = common::hello(lb.client_addr, "HELLO Alice static").await;
    assert_eq!(reply, "NO_SERVER_AVAILABLE");

    lb.shutdown.trigger();
}

#[tokio::test]
async fn stale_servers_are_evicted_with_their_sticky_entries() {
    let lb = common::start_lb_default().await;

    // a backend that joins once and then goes silent; port 1 is never
    // listening, so probes simply fail
    common::join(lb.registration_addr, 1).await;
    let pinned = common::hello(lb.client_addr, "HELLO Carol sticky").await;
    assert_eq!(pinned, "127.0.0.1:1");

    common::admin(lb.admin_addr, "set evict 1000").await;

    // the evictor sweeps every 5s; by 6.5s the silent server is gone
    tokio::time::sleep(Duration::from_millis(6500)).await;
    let out = common::admin(lb.admin_addr, "servers").await;
    assert_eq!(out, vec!["(none)"]);
    assert_eq!(lb.state.registry.sticky_for("Carol"), None);

    // a fresh backend proves Carol's sticky entry was purged with it
    let replacement = common::start_pong_backend().await;
    common::join(lb.registration_addr, replacement.port()).await;
    let rerouted = common::hello(lb.client_addr, "HELLO Carol sticky").await;
    assert_eq!(rerouted, format!("127.0.0.1:{}", replacement.port()));

    lb.shutdown.trigger();
}
