use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, warn};

use fleet_core::countdown::{Completion, CountdownLatch};
use fleet_core::server_info::{ServerEnvelope, ServerInfo};

use crate::monitor::{MonitorDaemon, MonitorMessage};
use crate::monitor::command_poll::CommandPoll;
use crate::monitor::topology_collected::TopologyCollected;

/// One watch-based round: list the members, read each one, publish only if every read
/// succeeded within the countdown timeout.
#[derive(Debug)]
pub(super) struct RefreshTopology {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for RefreshTopology {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) {
            return Ok(());
        }
        let epoch = self.epoch;
        let round = monitor.next_round();
        let client = monitor.client.clone();
        let myself = monitor.myself.clone();
        let server_id = monitor.server_id.clone();
        let timeout = monitor.settings.countdown_timeout.to_std_duration();
        tokio::spawn(async move {
            let keys = match client.list_members().await {
                Ok(keys) => keys,
                Err(error) => {
                    warn!("{} list members failed, round {} aborted: {:#}", server_id, round, error);
                    return;
                }
            };
            debug!("{} round {} reads {} members", server_id, round, keys.len());
            let servers = Arc::new(Mutex::new(Vec::with_capacity(keys.len())));
            let failures = Arc::new(Mutex::new(Vec::new()));
            let latch = {
                let servers = servers.clone();
                let failures = failures.clone();
                CountdownLatch::new(keys.len(), timeout, move |completion| {
                    let failures = std::mem::take(&mut *failures.lock());
                    let outcome = match completion {
                        Completion::Done if failures.is_empty() => Ok(std::mem::take(&mut *servers.lock())),
                        Completion::Done => Err(format!("reading {} failed", failures.join(", "))),
                        Completion::TimedOut(missing) => Err(format!("{} reads still pending", missing)),
                    };
                    myself.cast(TopologyCollected { epoch, round, outcome });
                })
            };
            for key in keys {
                let client = client.clone();
                let servers = servers.clone();
                let failures = failures.clone();
                let latch = latch.clone();
                let server_id = server_id.clone();
                tokio::spawn(async move {
                    match client.read_member(&key).await {
                        Ok(payload) => {
                            match serde_json::from_slice::<ServerEnvelope>(&payload) {
                                Ok(envelope) => servers.lock().push(envelope.server_info),
                                Err(error) => warn!("{} exclude member {}, invalid payload: {}", server_id, key, error),
                            }
                        }
                        Err(error) => {
                            warn!("{} read member {} failed: {:#}", server_id, key, error);
                            failures.lock().push(key);
                        }
                    }
                    latch.done();
                });
            }
        });
        Ok(())
    }
}

/// One poll-based round: re-announce, read the unexpired members and publish them, then
/// check the mailbox.
#[derive(Debug)]
pub(super) struct PollTick {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for PollTick {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) {
            return Ok(());
        }
        let epoch = self.epoch;
        let round = monitor.next_round();
        let client = monitor.client.clone();
        let myself = monitor.myself.clone();
        let server_id = monitor.server_id.clone();
        let info = monitor.host.cur_server().with_current_pid();
        tokio::spawn(async move {
            match client.refresh_members(&info).await {
                Ok(payloads) => {
                    let servers = payloads.iter()
                        .filter_map(|payload| match serde_json::from_slice::<ServerInfo>(payload) {
                            Ok(server) => Some(server),
                            Err(error) => {
                                warn!("{} exclude member {}, invalid payload: {}", server_id, String::from_utf8_lossy(payload), error);
                                None
                            }
                        })
                        .collect();
                    myself.cast(TopologyCollected { epoch, round, outcome: Ok(servers) });
                }
                Err(error) => {
                    warn!("{} refresh members failed in round {}: {:#}", server_id, round, error);
                }
            }
        });
        monitor.myself.cast(CommandPoll { epoch });
        Ok(())
    }
}
