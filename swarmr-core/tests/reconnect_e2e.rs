mod support;

use std::time::Duration;

use serde_json::json;
use swarmr_metrics::StatsLevel;
use swarmr_testserver::TestServer;

const BACKOFF_ONE_SECOND: &str = "settings:
  concurrentUsers: 1
  iterations: 1
reconnectSettings:
  reconnect: true
  backoff: [0s, 1s]
";

#[tokio::test]
async fn lost_connection_is_restored_and_the_action_restarts() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(1);

    let counters = support::run(
        server.ws_url(),
        BACKOFF_ONE_SECOND,
        json!([
            {"action": "request", "settings": {"method": "Echo"}},
            {"action": "request", "label": "flaky", "settings": {"method": "Drop"}},
            {"action": "request", "settings": {"method": "Echo"}}
        ]),
        StatsLevel::On,
    )
    .await?;

    let stats = server.stats().clone();
    server.shutdown().await;

    // Initial connect, the refused first retry, then the retry after the 1s backoff.
    let attempts = stats.connection_attempts();
    assert_eq!(attempts.len(), 3);
    let gap = attempts[2].duration_since(attempts[1]);
    assert!(gap >= Duration::from_secs(1), "second retry came after {gap:?}");

    assert_eq!(stats.connections_total(), 2);
    assert_eq!(stats.methods(0), vec!["Echo", "Drop"]);
    assert_eq!(stats.methods(1), vec!["Drop", "Echo"]);

    assert_eq!(counters.errors.current(), 0);
    // Three scenario actions plus the reconnect; the restarted one is counted once.
    assert_eq!(counters.actions.current(), 4);
    let rows = counters
        .statistics()
        .map(|s| s.action_rows())
        .unwrap_or_default();
    let reconnect = rows.iter().find(|r| r.key.action == "Reconnect(request)");
    assert_eq!(
        reconnect.map(|r| (r.key.label.as_str(), r.success)),
        Some(("flaky", 1))
    );
    let flaky = rows
        .iter()
        .find(|r| r.key.action == "request" && r.key.label == "flaky");
    assert_eq!(flaky.map(|r| (r.success, r.fail)), Some((1, 0)));
    Ok(())
}

#[tokio::test]
async fn reconnect_reopens_the_app_and_resubscribes() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(0);

    let counters = support::run(
        server.ws_url(),
        "settings:\n  concurrentUsers: 1\n  iterations: 1\nreconnectSettings:\n  reconnect: true\n  backoff: [0s]\n",
        json!([
            {"action": "openapp", "settings": {"appId": "sales"}},
            {"action": "request", "settings": {"method": "Drop"}},
            {"action": "request", "settings": {"method": "Echo"}}
        ]),
        StatsLevel::Off,
    )
    .await?;

    let stats = server.stats().clone();
    let unsubscribed = || stats.methods(1).last().is_some_and(|m| m == "Unsubscribe");
    assert!(support::eventually(unsubscribed).await);
    server.shutdown().await;

    assert_eq!(stats.methods(0), vec!["OpenDoc", "Subscribe", "Drop"]);
    assert_eq!(
        stats.methods(1),
        vec!["OpenDoc", "Subscribe", "Drop", "Echo", "Unsubscribe"]
    );
    assert_eq!(counters.errors.current(), 0);
    Ok(())
}

#[tokio::test]
async fn interrupted_think_time_is_not_repeated() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(0);

    let counters = support::run(
        server.ws_url(),
        "settings:\n  concurrentUsers: 1\n  iterations: 1\nreconnectSettings:\n  reconnect: true\n  backoff: [0s]\n",
        json!([
            {"action": "request", "settings": {"method": "Drop", "params": {"afterMs": 50}}},
            {"action": "thinktime", "settings": {"type": "static", "delay": "300ms"}},
            {"action": "request", "settings": {"method": "Echo"}}
        ]),
        StatsLevel::Off,
    )
    .await?;

    let stats = server.stats().clone();
    server.shutdown().await;

    // The connection dies while the user is thinking; after the reconnect the pause is not
    // taken again and the scenario moves on.
    assert_eq!(stats.connections_total(), 2);
    assert_eq!(stats.methods(0), vec!["Drop"]);
    assert_eq!(stats.methods(1), vec!["Echo"]);
    assert_eq!(counters.errors.current(), 0);
    Ok(())
}

#[tokio::test]
async fn disabled_reconnect_ends_the_user() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(0);

    let counters = support::run(
        server.ws_url(),
        "settings:\n  concurrentUsers: 1\n  iterations: 3\n",
        json!([
            {"action": "request", "settings": {"method": "Drop"}},
            {"action": "request", "settings": {"method": "Echo"}}
        ]),
        StatsLevel::Off,
    )
    .await?;

    let connections = server.stats().connections_total();
    server.shutdown().await;

    assert_eq!(connections, 1);
    assert_eq!(counters.errors.current(), 1);
    Ok(())
}

#[tokio::test]
async fn exhausted_backoff_reports_one_error() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(5);

    let counters = support::run(
        server.ws_url(),
        "settings:\n  concurrentUsers: 1\n  iterations: 1\nreconnectSettings:\n  reconnect: true\n  backoff: [0s, 100ms]\n",
        json!([{"action": "request", "label": "flaky", "settings": {"method": "Drop"}}]),
        StatsLevel::On,
    )
    .await?;

    let attempts = server.stats().connection_attempts();
    server.shutdown().await;

    assert_eq!(attempts.len(), 3);
    assert_eq!(counters.errors.current(), 1);
    let rows = counters
        .statistics()
        .map(|s| s.action_rows())
        .unwrap_or_default();
    let flaky = rows.iter().find(|r| r.key.label == "flaky");
    assert_eq!(flaky.map(|r| (r.success, r.fail)), Some((0, 1)));
    Ok(())
}

#[tokio::test]
async fn action_lost_without_reconnect_is_recorded_as_failed() -> anyhow::Result<()> {
    let server = TestServer::start().await?;
    server.arm_drop(0);

    let counters = support::run(
        server.ws_url(),
        "settings:\n  concurrentUsers: 1\n  iterations: 1\n",
        json!([
            {"action": "request", "label": "ok", "settings": {"method": "Echo"}},
            {"action": "request", "label": "flaky", "settings": {"method": "Drop"}}
        ]),
        StatsLevel::On,
    )
    .await?;
    server.shutdown().await;

    assert_eq!(counters.errors.current(), 1);
    assert_eq!(counters.actions.current(), 2);
    let rows = counters
        .statistics()
        .map(|s| s.action_rows())
        .unwrap_or_default();
    let row = |label: &str| {
        rows.iter()
            .find(|r| r.key.label == label)
            .map(|r| (r.success, r.fail))
    };
    assert_eq!(row("ok"), Some((1, 0)));
    assert_eq!(row("flaky"), Some((0, 1)));
    Ok(())
}
