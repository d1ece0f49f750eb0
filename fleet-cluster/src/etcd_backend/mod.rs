use std::fmt::{Debug, Formatter};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use etcd_client::{Client, Compare, CompareOp, ConnectOptions, DeleteOptions, GetOptions, PutOptions, Txn, TxnOp, WatchOptions};
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use fleet_core::command_result::CommandResult;
use fleet_core::server_info::{ServerEnvelope, ServerInfo};

use crate::config::settings::EtcdSettings;
use crate::coordination::{CoordinationClient, Discovery, EventSink};
use crate::keys::EtcdKeys;

mod acl;
mod lease_keeper;
mod watcher;

struct EtcdSession {
    client: Client,
    lease_id: i64,
    events: EventSink,
    keeper: JoinHandle<()>,
    watcher: Option<JoinHandle<()>>,
}

impl EtcdSession {
    fn abort_tasks(&mut self) {
        self.keeper.abort();
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
    }
}

/// Watch-based coordination over etcd. Members, the mailbox and its results are lease-bound
/// keys, so a dead process leaves nothing behind once its lease expires.
pub struct EtcdCoordination {
    settings: EtcdSettings,
    keys: EtcdKeys,
    session: Mutex<Option<EtcdSession>>,
}

impl EtcdCoordination {
    pub fn new(settings: EtcdSettings) -> Self {
        let keys = EtcdKeys::new(settings.root.as_str());
        Self {
            settings,
            keys,
            session: Mutex::new(None),
        }
    }

    pub fn keys(&self) -> &EtcdKeys {
        &self.keys
    }

    fn client(&self) -> anyhow::Result<Client> {
        self.session.lock()
            .as_ref()
            .map(|session| session.client.clone())
            .ok_or_else(|| anyhow!("etcd session is not established"))
    }

    fn lease_id(&self) -> anyhow::Result<i64> {
        self.session.lock()
            .as_ref()
            .map(|session| session.lease_id)
            .ok_or_else(|| anyhow!("etcd session is not established"))
    }

    async fn release(&self) {
        let session = self.session.lock().take();
        if let Some(mut session) = session {
            session.abort_tasks();
            if let Err(error) = session.client.lease_revoke(session.lease_id).await {
                warn!("revoke lease {} failed: {}", session.lease_id, error);
            } else {
                debug!("lease {} revoked", session.lease_id);
            }
        }
    }

    /// Creates the empty mailbox under the session lease unless it already exists, keeping a
    /// command written while this process was away.
    async fn ensure_mailbox(client: &mut Client, mailbox: &str, lease_id: i64) -> anyhow::Result<()> {
        let txn = Txn::new()
            .when([Compare::create_revision(mailbox, CompareOp::Equal, 0)])
            .and_then([TxnOp::put(mailbox, "", Some(PutOptions::new().with_lease(lease_id)))]);
        client.txn(txn).await.with_context(|| format!("create mailbox {} failed", mailbox))?;
        Ok(())
    }
}

impl Debug for EtcdCoordination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdCoordination")
            .field("endpoints", &self.settings.endpoints)
            .field("root", &self.keys.root())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CoordinationClient for EtcdCoordination {
    fn backend(&self) -> &'static str {
        "etcd"
    }

    fn discovery(&self) -> Discovery {
        Discovery::Watch
    }

    fn session_timeout(&self) -> Duration {
        self.settings.session_timeout.to_std_duration()
    }

    async fn connect(&self, events: EventSink) -> anyhow::Result<()> {
        self.release().await;
        let options = match (&self.settings.username, &self.settings.password) {
            (Some(username), Some(password)) => Some(ConnectOptions::new().with_user(username.as_str(), password.as_str())),
            _ => None,
        };
        let mut client = Client::connect(&self.settings.endpoints, options)
            .await
            .with_context(|| format!("connect etcd {:?} failed", self.settings.endpoints))?;
        if self.settings.set_acl {
            match (&self.settings.username, &self.settings.password) {
                (Some(username), Some(password)) => acl::grant(&mut client, username, password, self.keys.root()).await?,
                _ => warn!("set-acl needs username and password, namespace {} stays open", self.keys.root()),
            }
        }
        let ttl = self.session_timeout().as_secs().max(1) as i64;
        let lease_id = client.lease_grant(ttl, None).await.context("grant etcd lease failed")?.id();
        let (keeper, stream) = client.lease_keep_alive(lease_id).await.context("keep alive etcd lease failed")?;
        let keeper = lease_keeper::spawn(keeper, stream, self.settings.keep_alive_interval.to_std_duration(), events.clone());
        info!("etcd session established with lease {} ttl {}s", lease_id, ttl);
        let session = EtcdSession {
            client,
            lease_id,
            events,
            keeper,
            watcher: None,
        };
        let previous = self.session.lock().replace(session);
        if let Some(mut previous) = previous {
            previous.abort_tasks();
        }
        Ok(())
    }

    async fn register(&self, info: &ServerInfo) -> anyhow::Result<()> {
        let mut client = self.client()?;
        let lease_id = self.lease_id()?;
        let member = self.keys.member(&info.server_type, &info.id);
        let payload = serde_json::to_vec(&ServerEnvelope { server_info: info.clone() })?;
        client.put(member.as_str(), payload, Some(PutOptions::new().with_lease(lease_id)))
            .await
            .with_context(|| format!("register {} failed", member))?;
        Self::ensure_mailbox(&mut client, &self.keys.mailbox(&info.id), lease_id).await?;
        let (watcher, stream) = client.watch(self.keys.namespace(), Some(WatchOptions::new().with_prefix()))
            .await
            .with_context(|| format!("watch {} failed", self.keys.namespace()))?;
        let mut guard = self.session.lock();
        let session = guard.as_mut().ok_or_else(|| anyhow!("etcd session closed during registration"))?;
        let task = watcher::spawn(watcher, stream, self.keys.clone(), info.id.clone(), session.events.clone());
        if let Some(previous) = session.watcher.replace(task) {
            previous.abort();
        }
        debug!("registered {} and watching {}", member, self.keys.namespace());
        Ok(())
    }

    async fn list_members(&self) -> anyhow::Result<Vec<String>> {
        let mut client = self.client()?;
        let resp = client.get(self.keys.namespace(), Some(GetOptions::new().with_prefix().with_keys_only()))
            .await
            .with_context(|| format!("list {} failed", self.keys.namespace()))?;
        let members = resp.kvs()
            .iter()
            .filter_map(|kv| kv.key_str().ok())
            .filter(|key| self.keys.is_member(key))
            .map(str::to_string)
            .collect();
        Ok(members)
    }

    async fn read_member(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        let mut client = self.client()?;
        let resp = client.get(key, None).await.with_context(|| format!("read {} failed", key))?;
        resp.kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or_else(|| anyhow!("member {} not found", key))
    }

    async fn take_command(&self, server_id: &str) -> anyhow::Result<Option<String>> {
        let mut client = self.client()?;
        let lease_id = self.lease_id()?;
        let mailbox = self.keys.mailbox(server_id);
        let resp = client.delete(mailbox.as_str(), Some(DeleteOptions::new().with_prev_key()))
            .await
            .with_context(|| format!("delete {} failed", mailbox))?;
        let command = resp.prev_kvs()
            .first()
            .map(|kv| kv.value())
            .filter(|value| !value.is_empty())
            .map(|value| String::from_utf8_lossy(value).into_owned());
        Self::ensure_mailbox(&mut client, &mailbox, lease_id).await?;
        Ok(command)
    }

    async fn write_result(&self, server_id: &str, result: &CommandResult) -> anyhow::Result<()> {
        let mut client = self.client()?;
        let lease_id = self.lease_id()?;
        let key = self.keys.result(server_id, result.tag.as_deref());
        client.put(key.as_str(), result.payload.as_str(), Some(PutOptions::new().with_lease(lease_id)))
            .await
            .with_context(|| format!("write result {} failed", key))?;
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        self.release().await;
        Ok(())
    }
}
