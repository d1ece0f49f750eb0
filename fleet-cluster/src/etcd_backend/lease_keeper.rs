use std::time::Duration;

use etcd_client::{LeaseKeepAliveStream, LeaseKeeper};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordination::{CoordinationEvent, EventSink};

/// Refreshes the registration lease every `interval` until the task is aborted. A failed
/// refresh, a closed response stream or an expired lease ends the session.
pub(super) fn spawn(
    mut keeper: LeaseKeeper,
    mut stream: LeaseKeepAliveStream,
    interval: Duration,
    events: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let lease_id = keeper.id();
        let reason = loop {
            tokio::time::sleep(interval).await;
            if let Err(error) = keeper.keep_alive().await {
                break format!("lease {} keep alive failed: {}", lease_id, error);
            }
            match tokio::time::timeout(interval, stream.message()).await {
                Ok(Ok(Some(resp))) if resp.ttl() > 0 => {
                    debug!("lease {} refreshed, ttl {}", lease_id, resp.ttl());
                }
                Ok(Ok(Some(_))) => break format!("lease {} expired", lease_id),
                Ok(Ok(None)) => break format!("lease {} keep alive stream closed", lease_id),
                Ok(Err(error)) => break format!("lease {} keep alive response error: {}", lease_id, error),
                Err(_) => {
                    warn!("lease {} keep alive response timeout", lease_id);
                }
            }
        };
        warn!("{}", reason);
        events.emit(CoordinationEvent::Disconnected(reason));
    })
}
