use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::info;

use crate::monitor::{MonitorDaemon, MonitorMessage};

#[derive(Debug)]
pub(super) struct Stop {
    pub(super) reply: Option<oneshot::Sender<()>>,
}

#[async_trait]
impl MonitorMessage for Stop {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        info!("{} stop cluster monitor", monitor.server_id);
        monitor.close().await;
        if let Some(reply) = self.reply {
            let _ = reply.send(());
        }
        Ok(())
    }
}
