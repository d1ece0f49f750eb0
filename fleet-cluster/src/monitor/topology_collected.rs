use async_trait::async_trait;
use tracing::{debug, warn};

use fleet_core::server_info::ServerInfo;

use crate::monitor::{MonitorDaemon, MonitorMessage};

#[derive(Debug)]
pub(super) struct TopologyCollected {
    pub(super) epoch: u64,
    pub(super) round: u64,
    pub(super) outcome: Result<Vec<ServerInfo>, String>,
}

#[async_trait]
impl MonitorMessage for TopologyCollected {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) {
            return Ok(());
        }
        if self.round < monitor.published_round {
            debug!("{} drop round {}, round {} is already published", monitor.server_id, self.round, monitor.published_round);
            return Ok(());
        }
        match self.outcome {
            Ok(servers) => {
                monitor.published_round = self.round;
                monitor.publish(servers);
            }
            Err(reason) => {
                warn!("{} topology round {} failed, keep the last view: {}", monitor.server_id, self.round, reason);
            }
        }
        Ok(())
    }
}
