use etcd_client::{EventType, Watcher, WatchStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::coordination::{CoordinationEvent, EventSink};
use crate::keys::EtcdKeys;

/// Turns the namespace watch into member and mailbox notifications. The session is reported
/// lost when the stream ends.
pub(super) fn spawn(
    watcher: Watcher,
    mut stream: WatchStream,
    keys: EtcdKeys,
    server_id: String,
    events: EventSink,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let _watcher = watcher;
        let reason = loop {
            let resp = match stream.message().await {
                Ok(Some(resp)) => resp,
                Ok(None) => break format!("watch of {} closed", keys.namespace()),
                Err(error) => break format!("watch of {} failed: {}", keys.namespace(), error),
            };
            if resp.canceled() {
                break format!("watch of {} canceled: {}", keys.namespace(), resp.cancel_reason());
            }
            let mut members_changed = false;
            let mut command_changed = false;
            for event in resp.events() {
                let Some(kv) = event.kv() else {
                    continue;
                };
                let Ok(key) = kv.key_str() else {
                    continue;
                };
                if keys.is_member(key) {
                    debug!("{} member {} {:?}", server_id, key, event.event_type());
                    members_changed = true;
                } else if keys.is_mailbox_of(key, &server_id)
                    && event.event_type() == EventType::Put
                    && !kv.value().is_empty() {
                    command_changed = true;
                }
            }
            if members_changed {
                events.emit(CoordinationEvent::MembersChanged);
            }
            if command_changed {
                events.emit(CoordinationEvent::CommandChanged);
            }
        };
        warn!("{} {}", server_id, reason);
        events.emit(CoordinationEvent::Disconnected(reason));
    })
}
