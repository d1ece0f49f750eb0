use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::ensure;
use tokio::time::Instant;
use tracing::Level;

use fleet_cluster::config::settings::MonitorSettings;
use fleet_cluster::coordination::Probe;
use fleet_cluster::memory::{ConnectFault, MemoryCoordination, MemoryStore};
use fleet_cluster::monitor::ClusterMonitor;
use fleet_cluster::monitor::session::SessionState;
use fleet_core::error::MonitorError;
use fleet_core::ext::init_logger;
use fleet_core::host::Host;
use fleet_core::local_host::LocalHost;
use fleet_core::server_info::{ClusterView, ServerInfo};
use fleet_core::setting::{Setting, STOP_FLAG};
use fleet_core::util::duration::ConfigDuration;

#[ctor::ctor]
fn init() {
    init_logger(Level::DEBUG)
}

const WAIT: Duration = Duration::from_secs(30);

struct Node {
    host: Arc<LocalHost>,
    client: MemoryCoordination,
    monitor: ClusterMonitor,
}

impl Node {
    fn new(id: &str, port: u16, client: MemoryCoordination) -> Self {
        let host = Arc::new(
            LocalHost::builder()
                .info(ServerInfo::new(id, "area", "127.0.0.1", port))
                .env("dev")
                .exit_on_kill(false)
                .build()
        );
        let monitor = ClusterMonitor::new(settings(), host.clone(), Arc::new(client.clone()));
        Self { host, client, monitor }
    }

    fn view_ids(&self) -> BTreeSet<String> {
        self.monitor.view().ids().cloned().collect()
    }
}

fn settings() -> MonitorSettings {
    MonitorSettings::builder()
        .connect_timeout(ConfigDuration::from_secs(2))
        .reconnect_times(3)
        .reconnect_delay(ConfigDuration::from_secs(1))
        .countdown_timeout(ConfigDuration::from_secs(2))
        .build()
}

fn ids(ids: &[&str]) -> BTreeSet<String> {
    ids.iter().map(|id| id.to_string()).collect()
}

async fn eventually<F>(what: &str, mut condition: F) -> anyhow::Result<()> where F: FnMut() -> bool {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        ensure!(Instant::now() < deadline, "{} not reached within {:?}", what, WAIT);
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Ok(())
}

fn monitor_error(error: &anyhow::Error) -> Option<&MonitorError> {
    error.downcast_ref::<MonitorError>()
}

/// Runs `trigger` and returns the view of the next round `node` publishes.
async fn next_view<F>(node: &Node, trigger: F) -> anyhow::Result<Arc<ClusterView>> where F: FnOnce() {
    let updates = node.host.view_updates();
    trigger();
    eventually("next round published", || node.host.view_updates() > updates).await?;
    Ok(node.monitor.view())
}

#[tokio::test(start_paused = true)]
async fn test_registered_members_form_the_view() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let a = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    let b = Node::new("area-2", 3151, MemoryCoordination::watching(store.clone()));
    a.monitor.start().await?;
    b.monitor.start().await?;
    assert_eq!(a.monitor.session().state, SessionState::Connected);
    let expected = ids(&["area-1", "area-2"]);
    eventually("both views list both members", || a.view_ids() == expected && b.view_ids() == expected).await?;
    assert_eq!(a.host.servers().len(), 2);
    assert!(a.host.view_updates() > 0);
    let peer = a.monitor.view().get("area-2").cloned();
    assert_eq!(peer.map(|info| info.port), Some(3151));
    assert!(a.monitor.view().iter().all(|info| info.pid == std::process::id()));
    let c = Node::new("area-3", 3152, MemoryCoordination::watching(store.clone()));
    c.monitor.start().await?;
    let expected = ids(&["area-1", "area-2", "area-3"]);
    eventually("views agree after a join", || {
        a.view_ids() == expected && b.view_ids() == expected && c.view_ids() == expected
    }).await?;
    c.monitor.stop().await?;
    let expected = ids(&["area-1", "area-2"]);
    eventually("views agree after a leave", || a.view_ids() == expected && b.view_ids() == expected).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_failed_read_keeps_last_view() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let a = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    let b = Node::new("area-2", 3151, MemoryCoordination::watching(store.clone()));
    a.monitor.start().await?;
    b.monitor.start().await?;
    let pair = ids(&["area-1", "area-2"]);
    eventually("initial views", || a.view_ids() == pair && b.view_ids() == pair).await?;
    a.client.fail_reads_of("/fleet/area#area-3");
    let c = Node::new("area-3", 3152, MemoryCoordination::watching(store.clone()));
    c.monitor.start().await?;
    let triple = ids(&["area-1", "area-2", "area-3"]);
    eventually("b sees the join", || b.view_ids() == triple).await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(a.view_ids(), pair);
    a.client.clear_read_faults();
    let d = Node::new("area-4", 3153, MemoryCoordination::watching(store.clone()));
    d.monitor.start().await?;
    let all = ids(&["area-1", "area-2", "area-3", "area-4"]);
    eventually("a recovers on the next round", || a.view_ids() == all).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_refused_start_is_not_retried() -> anyhow::Result<()> {
    let client = MemoryCoordination::watching(MemoryStore::new());
    client.set_connect_fault(ConnectFault::Refuse);
    let node = Node::new("area-1", 3150, client);
    let error = node.monitor.start().await.err().ok_or_else(|| anyhow::anyhow!("start should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::ConnectFailed { .. })));
    assert_eq!(node.monitor.session().state, SessionState::ConnectFailed);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.client.connects(), 1);
    node.client.set_connect_fault(ConnectFault::None);
    node.monitor.start().await?;
    assert_eq!(node.monitor.session().state, SessionState::Connected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_hanging_connect_times_out() -> anyhow::Result<()> {
    let client = MemoryCoordination::watching(MemoryStore::new());
    client.set_connect_fault(ConnectFault::Hang);
    let node = Node::new("area-1", 3150, client);
    let started = Instant::now();
    let error = node.monitor.start().await.err().ok_or_else(|| anyhow::anyhow!("start should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::ConnectTimeout { .. })));
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert_eq!(node.monitor.session().state, SessionState::ConnectFailed);
    assert_eq!(node.client.connects(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_lost_session_reconnects() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    eventually("own registration visible", || node.view_ids() == ids(&["area-1"])).await?;
    node.client.drop_session();
    assert_eq!(store.member_count(), 0);
    eventually("session rebuilt", || {
        node.client.connects() == 2 && node.monitor.session().state == SessionState::Connected
    }).await?;
    assert_eq!(node.monitor.session().retry_count, 0);
    assert_eq!(store.member_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_reconnect_times() -> anyhow::Result<()> {
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(MemoryStore::new()));
    node.monitor.start().await?;
    node.client.set_connect_fault(ConnectFault::Refuse);
    node.client.drop_session();
    let session = node.monitor.wait_for(WAIT, |session| session.state == SessionState::ConnectFailed).await?;
    assert_eq!(session.retry_count, 3);
    assert_eq!(node.client.connects(), 4);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(node.client.connects(), 4);
    assert_eq!(node.monitor.session().state, SessionState::ConnectFailed);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rejected_while_reconnecting() -> anyhow::Result<()> {
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(MemoryStore::new()));
    let error = node.monitor.reconnect().await.err().ok_or_else(|| anyhow::anyhow!("reconnect before start should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::NotConnected(_))));
    node.monitor.start().await?;
    node.client.set_connect_fault(ConnectFault::Hang);
    node.monitor.reconnect().await?;
    let session = node.monitor.session();
    assert_eq!(session.state, SessionState::Reconnecting);
    assert_eq!(session.retry_count, 1);
    let error = node.monitor.reconnect().await.err().ok_or_else(|| anyhow::anyhow!("second reconnect should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::AlreadyConnecting(_))));
    assert_eq!(node.monitor.session().retry_count, 1);
    node.client.set_connect_fault(ConnectFault::None);
    let session = node.monitor.wait_for(WAIT, |session| session.state == SessionState::Connected).await?;
    assert_eq!(session.retry_count, 0);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    assert_eq!(store.member_count(), 1);
    node.monitor.stop().await?;
    node.monitor.stop().await?;
    assert_eq!(node.monitor.session().state, SessionState::Closed);
    assert_eq!(store.member_count(), 0);
    assert!(!node.client.is_connected());
    let error = node.monitor.start().await.err().ok_or_else(|| anyhow::anyhow!("start after stop should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::Closed(_))));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_set_command_round_trip() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    store.put("/fleet/cmd-area-1", r#"{"command":"set","param":{"key":"maxOnline","value":3000}}"#);
    eventually("set answered", || store.get("/fleet/cmd-area-1:result").as_deref() == Some("ok")).await?;
    assert_eq!(node.host.get("maxOnline"), Some(Setting::from(serde_json::json!(3000))));
    assert_eq!(store.get("/fleet/cmd-area-1").as_deref(), Some(""));
    store.put("/fleet/cmd-area-1", r#"{"command":"get","param":"maxOnline"}"#);
    eventually("get answered", || store.get("/fleet/cmd-area-1:result").as_deref() == Some("3000")).await?;
    store.put("/fleet/cmd-area-1", r#"{"command":"show"}"#);
    eventually("show answered under its tag", || store.get("/fleet/cmd-area-1:show").is_some()).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_malformed_command_is_dropped() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    store.put("/fleet/cmd-area-1", "{command: set");
    eventually("mailbox drained", || store.get("/fleet/cmd-area-1").as_deref() == Some("")).await?;
    store.put("/fleet/cmd-area-1", r#"{"command":"reboot"}"#);
    eventually("mailbox drained", || store.get("/fleet/cmd-area-1").as_deref() == Some("")).await?;
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(store.get("/fleet/cmd-area-1:result"), None);
    assert_eq!(node.monitor.session().state, SessionState::Connected);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_stop_command_prevents_reconnect() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    store.put("/fleet/cmd-area-1", r#"{"command":"stop"}"#);
    eventually("stop answered", || store.get("/fleet/cmd-area-1:result").as_deref() == Some("ok")).await?;
    assert!(node.host.stop_requested());
    assert_eq!(node.host.get(STOP_FLAG), Some(Setting::from(true)));
    node.client.drop_session();
    node.monitor.wait_for(WAIT, |session| session.state == SessionState::Closed).await?;
    let session = node.monitor.subscribe();
    eventually("owner task exits", || session.has_changed().is_err()).await?;
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.client.connects(), 1);
    node.monitor.stop().await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_kill_command_answers_first() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    store.put("/fleet/cmd-area-1", r#"{"command":"kill"}"#);
    eventually("kill recorded", || node.host.killed()).await?;
    assert_eq!(store.get("/fleet/cmd-area-1:result").as_deref(), Some("ok"));
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_polled_membership() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let polling = || MemoryCoordination::polling(store.clone(), Duration::from_secs(1), Duration::from_secs(3));
    let a = Node::new("area-1", 3150, polling());
    let b = Node::new("area-2", 3151, polling());
    a.monitor.start().await?;
    b.monitor.start().await?;
    let pair = ids(&["area-1", "area-2"]);
    eventually("polled views list both members", || a.view_ids() == pair && b.view_ids() == pair).await?;
    store.put("/fleet/cmd-area-2", r#"{"command":"enable","param":"monitor"}"#);
    eventually("polled mailbox answered", || store.get("/fleet/cmd-area-2:result").as_deref() == Some("ok")).await?;
    assert!(b.host.get("monitor").is_some_and(|setting| setting.is_true()));
    b.monitor.stop().await?;
    eventually("a drops the stopped member", || a.view_ids() == ids(&["area-1"])).await?;
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_ping_reconnects() -> anyhow::Result<()> {
    let probe = Probe {
        interval: Duration::from_secs(1),
        timeout: Duration::from_millis(500),
    };
    let client = MemoryCoordination::polling(MemoryStore::new(), Duration::from_secs(1), Duration::from_secs(3))
        .with_probe(probe);
    let node = Node::new("area-1", 3150, client);
    node.monitor.start().await?;
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(node.client.connects(), 1);
    node.client.hang_ping(true);
    eventually("probe timeout triggers a reconnect", || node.client.connects() >= 2).await?;
    node.client.hang_ping(false);
    tokio::time::sleep(Duration::from_secs(3)).await;
    node.monitor.wait_for(WAIT, |session| session.state == SessionState::Connected).await?;
    let connects = node.client.connects();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(node.client.connects(), connects);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_session_lost_during_registration_reconnects() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let node = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    node.monitor.start().await?;
    node.client.lose_next_registration();
    node.client.drop_session();
    eventually("session rebuilt after the lost registration", || {
        node.client.connects() == 3 && node.monitor.session().state == SessionState::Connected
    }).await?;
    assert_eq!(node.monitor.session().retry_count, 0);
    assert!(node.client.is_connected());
    assert_eq!(store.member_count(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_session_lost_during_first_registration_fails_start() -> anyhow::Result<()> {
    let client = MemoryCoordination::watching(MemoryStore::new());
    client.lose_next_registration();
    let node = Node::new("area-1", 3150, client);
    let error = node.monitor.start().await.err().ok_or_else(|| anyhow::anyhow!("start should fail"))?;
    assert!(matches!(monitor_error(&error), Some(MonitorError::ConnectFailed { .. })));
    assert_eq!(node.monitor.session().state, SessionState::ConnectFailed);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(node.client.connects(), 1);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_membership_keeps_watched_view() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let a = Node::new("area-1", 3150, MemoryCoordination::watching(store.clone()));
    let b = Node::new("area-2", 3151, MemoryCoordination::watching(store.clone()));
    a.monitor.start().await?;
    b.monitor.start().await?;
    let pair = ids(&["area-1", "area-2"]);
    eventually("initial view", || a.view_ids() == pair).await?;
    let first = next_view(&a, || store.notify_members()).await?;
    let second = next_view(&a, || store.notify_members()).await?;
    assert_eq!(first.ids().cloned().collect::<BTreeSet<_>>(), pair);
    assert_eq!(*first, *second);
    Ok(())
}

#[tokio::test(start_paused = true)]
async fn test_unchanged_membership_keeps_polled_view() -> anyhow::Result<()> {
    let store = MemoryStore::new();
    let polling = || MemoryCoordination::polling(store.clone(), Duration::from_secs(1), Duration::from_secs(3));
    let a = Node::new("area-1", 3150, polling());
    let b = Node::new("area-2", 3151, polling());
    a.monitor.start().await?;
    b.monitor.start().await?;
    let pair = ids(&["area-1", "area-2"]);
    eventually("initial view", || a.view_ids() == pair).await?;
    let first = next_view(&a, || ()).await?;
    let second = next_view(&a, || ()).await?;
    assert_eq!(first.ids().cloned().collect::<BTreeSet<_>>(), pair);
    assert_eq!(*first, *second);
    assert!(second.iter().all(|info| info.pid == std::process::id()));
    Ok(())
}
