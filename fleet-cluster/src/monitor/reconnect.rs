use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::warn;

use fleet_core::error::MonitorError;

use crate::monitor::{MonitorDaemon, MonitorMessage};
use crate::monitor::session::SessionState;

/// Operator-requested reconnection.
#[derive(Debug)]
pub(super) struct Reconnect {
    pub(super) reply: oneshot::Sender<Result<(), MonitorError>>,
}

#[async_trait]
impl MonitorMessage for Reconnect {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        let server_id = monitor.server_id.clone();
        let result = match monitor.state() {
            SessionState::Connecting | SessionState::Reconnecting => {
                warn!("{} reconnect rejected, attempt {} of the current sequence is in flight", server_id, monitor.retry_count());
                Err(MonitorError::AlreadyConnecting(server_id))
            }
            SessionState::Init => Err(MonitorError::NotConnected(server_id)),
            SessionState::Closed => Err(MonitorError::Closed(server_id)),
            SessionState::Connected | SessionState::ConnectFailed => {
                monitor.begin_reconnect("requested").await;
                Ok(())
            }
        };
        let _ = self.reply.send(result);
        Ok(())
    }
}

/// Next attempt of a reconnection sequence, scheduled after a failed one.
#[derive(Debug)]
pub(super) struct ReconnectAttempt {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for ReconnectAttempt {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if monitor.is_current(self.epoch) && monitor.state() == SessionState::Reconnecting {
            monitor.timers.reconnect = None;
            monitor.reconnect_attempt();
        }
        Ok(())
    }
}
