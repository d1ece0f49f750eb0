use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{info, warn};

use fleet_core::error::MonitorError;

use crate::monitor::{MonitorDaemon, MonitorMessage};
use crate::monitor::session::SessionState;

#[derive(Debug)]
pub(super) struct Start {
    pub(super) reply: oneshot::Sender<Result<(), MonitorError>>,
}

#[async_trait]
impl MonitorMessage for Start {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        let result = match monitor.state() {
            SessionState::Init | SessionState::ConnectFailed => {
                info!("{} start cluster monitor on {}", monitor.server_id, monitor.backend());
                monitor.transition(SessionState::Connecting);
                monitor.set_retry_count(0);
                monitor.start_reply = Some(self.reply);
                monitor.begin_attempt();
                return Ok(());
            }
            SessionState::Connecting | SessionState::Reconnecting => {
                warn!("{} start rejected, a connect sequence is in flight", monitor.server_id);
                Err(MonitorError::AlreadyConnecting(monitor.server_id.clone()))
            }
            SessionState::Connected => Ok(()),
            SessionState::Closed => Err(MonitorError::Closed(monitor.server_id.clone())),
        };
        let _ = self.reply.send(result);
        Ok(())
    }
}
