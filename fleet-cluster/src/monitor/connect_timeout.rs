use async_trait::async_trait;

use fleet_core::error::MonitorError;

use crate::monitor::{MonitorDaemon, MonitorMessage};

#[derive(Debug)]
pub(super) struct ConnectTimeout {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for ConnectTimeout {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.is_current(self.epoch) || !monitor.state().is_connecting() {
            return Ok(());
        }
        monitor.timers.connect_timeout = None;
        monitor.timers.cancel_attempt();
        monitor.epoch += 1;
        let error = MonitorError::ConnectTimeout {
            server_id: monitor.server_id.clone(),
            backend: monitor.backend(),
            timeout: monitor.settings.connect_timeout.to_std_duration(),
        };
        monitor.on_attempt_failed(error).await;
        Ok(())
    }
}
