use async_trait::async_trait;
use tracing::{debug, warn};

use fleet_core::timer::schedule_once;

use crate::monitor::{MonitorDaemon, MonitorMessage};

/// Pings the master and arms the response timer.
#[derive(Debug)]
pub(super) struct ProbeTick {
    pub(super) epoch: u64,
}

#[async_trait]
impl MonitorMessage for ProbeTick {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) || monitor.timers.probe_timeout.is_some() {
            return Ok(());
        }
        let Some(probe) = monitor.client.probe() else {
            return Ok(());
        };
        let epoch = self.epoch;
        let myself = monitor.myself.clone();
        let key = schedule_once(probe.timeout, move || {
            myself.cast(ProbeTimedOut { epoch });
        });
        monitor.timers.probe_timeout = Some(key);
        let client = monitor.client.clone();
        let myself = monitor.myself.clone();
        tokio::spawn(async move {
            let result = client.ping().await.map_err(|error| format!("{:#}", error));
            myself.cast(ProbeAnswered { epoch, result });
        });
        Ok(())
    }
}

#[derive(Debug)]
struct ProbeAnswered {
    epoch: u64,
    result: Result<(), String>,
}

#[async_trait]
impl MonitorMessage for ProbeAnswered {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.is_current(self.epoch) {
            return Ok(());
        }
        if let Some(key) = monitor.timers.probe_timeout.take() {
            key.cancel();
        }
        match self.result {
            Ok(()) => debug!("{} master answered ping", monitor.server_id),
            Err(error) => warn!("{} master ping failed: {}", monitor.server_id, error),
        }
        Ok(())
    }
}

/// No answer to a ping within the probe timeout: the master is considered lost and the
/// session is rebuilt from scratch.
#[derive(Debug)]
struct ProbeTimedOut {
    epoch: u64,
}

#[async_trait]
impl MonitorMessage for ProbeTimedOut {
    async fn handle(self: Box<Self>, monitor: &mut MonitorDaemon) -> anyhow::Result<()> {
        if !monitor.connected_in(self.epoch) {
            return Ok(());
        }
        monitor.timers.probe_timeout = None;
        monitor.begin_reconnect("master ping timed out").await;
        Ok(())
    }
}
