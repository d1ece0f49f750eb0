use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;

use fleet_core::command_result::CommandResult;
use fleet_core::server_info::ServerInfo;

/// How a backend lets the monitor learn about membership.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Discovery {
    /// The backend emits [`CoordinationEvent::MembersChanged`]; each event triggers a full
    /// listing followed by one read per member.
    Watch,
    /// The monitor calls [`CoordinationClient::refresh_members`] and polls the mailbox every
    /// `period`.
    Poll { period: Duration },
}

/// Liveness probe of a replicated backend's master, driven by the monitor's timers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Probe {
    pub interval: Duration,
    pub timeout: Duration,
}

/// Unsolicited notifications of a connected session.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CoordinationEvent {
    Disconnected(String),
    MembersChanged,
    CommandChanged,
    MasterLost,
}

/// Destination of the events of one session.
#[derive(Clone)]
pub struct EventSink {
    sink: Arc<dyn Fn(CoordinationEvent) + Send + Sync>,
}

impl EventSink {
    pub fn new<F>(sink: F) -> Self where F: Fn(CoordinationEvent) + Send + Sync + 'static {
        Self { sink: Arc::new(sink) }
    }

    pub fn emit(&self, event: CoordinationEvent) {
        (self.sink)(event)
    }
}

impl Debug for EventSink {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// The external store a [`ClusterMonitor`](crate::monitor::ClusterMonitor) coordinates through.
///
/// A client holds at most one session at a time. `connect` replaces any previous session and
/// routes the new session's events to the given sink; `disconnect` releases the session and
/// everything registered under it.
#[async_trait]
pub trait CoordinationClient: Send + Sync + 'static {
    fn backend(&self) -> &'static str;

    fn discovery(&self) -> Discovery;

    /// How long the backend keeps this process registered without hearing from it.
    fn session_timeout(&self) -> Duration;

    fn probe(&self) -> Option<Probe> {
        None
    }

    async fn connect(&self, events: EventSink) -> anyhow::Result<()>;

    /// Publishes `info` with a lifetime bound to the session and creates the empty mailbox.
    async fn register(&self, info: &ServerInfo) -> anyhow::Result<()>;

    /// Keys of all member entries, mailboxes excluded.
    async fn list_members(&self) -> anyhow::Result<Vec<String>> {
        bail!("{} does not support member listing", self.backend())
    }

    async fn read_member(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        bail!("{} does not support member reads, key {}", self.backend(), key)
    }

    /// Re-announces `info` and returns the payloads of every unexpired member, own one included.
    async fn refresh_members(&self, info: &ServerInfo) -> anyhow::Result<Vec<Vec<u8>>> {
        bail!("{} does not support member refresh of {}", self.backend(), info.id)
    }

    /// Reads and deletes the pending command of `server_id` in one atomic step. Returns the
    /// payload only to the caller whose delete removed it.
    async fn take_command(&self, server_id: &str) -> anyhow::Result<Option<String>>;

    async fn write_result(&self, server_id: &str, result: &CommandResult) -> anyhow::Result<()>;

    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()>;
}
