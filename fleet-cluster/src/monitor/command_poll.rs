use async_trait::async_trait;
use tracing::warn;

use crate::monitor::{MonitorDaemon, MonitorMessage};

/// Consumes the mailbox once, off the owner task.
#[derive(Debug)]
pub(super) struct CommandPoll {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for CommandPoll {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) {
            return Ok(());
        }
        let channel = monitor.channel.clone();
        let server_id = monitor.server_id.clone();
        tokio::spawn(async move {
            if let Err(error) = channel.consume().await {
                warn!("{} consume command failed: {:#}", server_id, error);
            }
        });
        Ok(())
    }
}
