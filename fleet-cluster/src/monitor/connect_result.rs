use async_trait::async_trait;
use tracing::debug;

use fleet_core::error::MonitorError;

use crate::monitor::{MonitorDaemon, MonitorMessage};

/// Outcome of one connect-and-register attempt.
#[derive(Debug)]
pub(super) struct ConnectResult {
    pub(super) epoch: u64,
    pub(super) result: Result<(), String>,
}

#[async_trait]
impl MonitorMessage for ConnectResult {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.is_current(self.epoch) || !monitor.state().is_connecting() {
            debug!("{} ignore stale connect result of epoch {}", monitor.server_id, self.epoch);
            return Ok(());
        }
        monitor.timers.cancel_attempt();
        let result = match (self.result, monitor.lost_during_attempt.take()) {
            (Ok(()), Some(lost)) => Err(format!("session lost during registration, {}", lost)),
            (result, _) => result,
        };
        match result {
            Ok(()) => monitor.on_connected(),
            Err(reason) => {
                let error = MonitorError::ConnectFailed {
                    server_id: monitor.server_id.clone(),
                    backend: monitor.backend(),
                    reason,
                };
                monitor.on_attempt_failed(error).await;
            }
        }
        Ok(())
    }
}
