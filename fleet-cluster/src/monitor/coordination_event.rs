use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::coordination::{CoordinationEvent, Discovery};
use crate::monitor::{MonitorDaemon, MonitorMessage};
use crate::monitor::command_poll::CommandPoll;
use crate::monitor::refresh_topology::RefreshTopology;

#[derive(Debug)]
pub(super) struct CoordinationEventWrap {
    pub(super) epoch: u64,
    pub(super) event: CoordinationEvent,
}

#[async_trait]
impl MonitorMessage for CoordinationEventWrap {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if monitor.is_current(self.epoch) && monitor.state().is_connecting() {
            let lost = match &self.event {
                CoordinationEvent::Disconnected(reason) => Some(format!("disconnected, {}", reason)),
                CoordinationEvent::MasterLost => Some("master lost".to_string()),
                _ => None,
            };
            if let Some(lost) = lost {
                warn!("{} session lost before the attempt of epoch {} completed: {}", monitor.server_id, self.epoch, lost);
                monitor.lost_during_attempt = Some(lost);
            }
            return Ok(());
        }
        if !monitor.connected_in(self.epoch) {
            debug!("{} ignore {:?} of epoch {}", monitor.server_id, self.event, self.epoch);
            return Ok(());
        }
        let epoch = self.epoch;
        match self.event {
            CoordinationEvent::Disconnected(reason) => {
                if monitor.host.is_stopping() {
                    info!("{} disconnected from {} while stopping: {}", monitor.server_id, monitor.backend(), reason);
                    monitor.close().await;
                } else {
                    monitor.begin_reconnect(&format!("disconnected, {}", reason)).await;
                }
            }
            CoordinationEvent::MembersChanged => {
                if let Discovery::Watch = monitor.client.discovery() {
                    monitor.myself.cast(RefreshTopology { epoch });
                }
            }
            CoordinationEvent::CommandChanged => {
                monitor.myself.cast(CommandPoll { epoch });
            }
            CoordinationEvent::MasterLost => {
                monitor.begin_reconnect("master lost").await;
            }
        }
        Ok(())
    }
}
