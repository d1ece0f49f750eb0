use std::fmt::{Debug, Formatter};
use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::RedisError;
use tracing::{debug, info, warn};

use fleet_core::command_result::CommandResult;
use fleet_core::server_info::ServerInfo;
use fleet_core::util::now_millis;

use crate::config::settings::{RedisMode, RedisSettings};
use crate::coordination::{CoordinationClient, CoordinationEvent, Discovery, EventSink, Probe};
use crate::keys::RedisKeys;
use crate::redis_backend::master::Role;

mod master;

pub use master::open_writable;

struct RedisSession {
    node: String,
    connection: MultiplexedConnection,
    events: EventSink,
}

/// Poll-based coordination over Redis. Members live in one sorted set scored by their expiry
/// time, so a member that stops refreshing falls out after `expire`.
pub struct RedisCoordination {
    settings: RedisSettings,
    keys: RedisKeys,
    session: Mutex<Option<RedisSession>>,
}

impl RedisCoordination {
    pub fn new(settings: RedisSettings, env: &str) -> anyhow::Result<Self> {
        if settings.nodes.is_empty() {
            return Err(anyhow!("redis backend needs at least one node"));
        }
        let keys = RedisKeys::new(settings.prefix.as_str(), settings.result_prefix.as_str(), env);
        Ok(Self {
            settings,
            keys,
            session: Mutex::new(None),
        })
    }

    pub fn keys(&self) -> &RedisKeys {
        &self.keys
    }

    fn connection(&self) -> anyhow::Result<MultiplexedConnection> {
        self.session.lock()
            .as_ref()
            .map(|session| session.connection.clone())
            .ok_or_else(|| anyhow!("redis session is not established"))
    }

    /// Reports a lost connection to the session's sink before handing the error back.
    fn observe(&self, error: RedisError) -> anyhow::Error {
        if error.is_connection_dropped() || error.is_io_error() || error.is_connection_refusal() {
            if let Some(session) = self.session.lock().as_ref() {
                session.events.emit(CoordinationEvent::Disconnected(format!("redis {}: {}", session.node, error)));
            }
        }
        anyhow::Error::new(error)
    }

    async fn announce(&self, connection: &mut MultiplexedConnection, info: &ServerInfo) -> anyhow::Result<()> {
        let expire_at = now_millis() + self.settings.expire.to_std_duration().as_millis() as u64;
        let payload = serde_json::to_string(info)?;
        redis::cmd("ZADD")
            .arg(self.keys.members())
            .arg(expire_at)
            .arg(payload)
            .query_async::<_, ()>(connection)
            .await
            .map_err(|error| self.observe(error))
            .with_context(|| format!("announce {} failed", info.id))
    }
}

impl Debug for RedisCoordination {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCoordination")
            .field("mode", &self.settings.mode)
            .field("nodes", &self.settings.nodes)
            .field("members", &self.keys.members())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl CoordinationClient for RedisCoordination {
    fn backend(&self) -> &'static str {
        "redis"
    }

    fn discovery(&self) -> Discovery {
        Discovery::Poll { period: self.settings.period.to_std_duration() }
    }

    fn session_timeout(&self) -> Duration {
        self.settings.expire.to_std_duration()
    }

    fn probe(&self) -> Option<Probe> {
        match self.settings.mode {
            RedisMode::Single => None,
            RedisMode::Replicated => Some(Probe {
                interval: self.settings.ping_interval.to_std_duration(),
                timeout: self.settings.ping_timeout.to_std_duration(),
            }),
        }
    }

    async fn connect(&self, events: EventSink) -> anyhow::Result<()> {
        self.session.lock().take();
        let (node, connection) = master::open_writable(&self.settings).await?;
        info!("redis session established with {} in {:?} mode", node, self.settings.mode);
        *self.session.lock() = Some(RedisSession { node, connection, events });
        Ok(())
    }

    async fn register(&self, info: &ServerInfo) -> anyhow::Result<()> {
        let mut connection = self.connection()?;
        self.announce(&mut connection, info).await
    }

    async fn refresh_members(&self, info: &ServerInfo) -> anyhow::Result<Vec<Vec<u8>>> {
        let mut connection = self.connection()?;
        self.announce(&mut connection, info).await?;
        let now = now_millis();
        let members = self.keys.members();
        let pruned: usize = redis::cmd("ZREMRANGEBYSCORE")
            .arg(&members)
            .arg("-inf")
            .arg(now)
            .query_async(&mut connection)
            .await
            .map_err(|error| self.observe(error))?;
        if pruned > 0 {
            debug!("pruned {} expired members from {}", pruned, members);
        }
        let alive: Vec<Vec<u8>> = redis::cmd("ZRANGEBYSCORE")
            .arg(&members)
            .arg(now)
            .arg("+inf")
            .query_async(&mut connection)
            .await
            .map_err(|error| self.observe(error))?;
        Ok(alive)
    }

    async fn take_command(&self, server_id: &str) -> anyhow::Result<Option<String>> {
        let mut connection = self.connection()?;
        let mailbox = self.keys.mailbox(server_id);
        let (command,): (Option<String>,) = redis::pipe()
            .atomic()
            .cmd("GET").arg(&mailbox)
            .cmd("DEL").arg(&mailbox).ignore()
            .query_async(&mut connection)
            .await
            .map_err(|error| self.observe(error))
            .with_context(|| format!("take {} failed", mailbox))?;
        Ok(command.filter(|command| !command.is_empty()))
    }

    async fn write_result(&self, server_id: &str, result: &CommandResult) -> anyhow::Result<()> {
        let mut connection = self.connection()?;
        let key = self.keys.result(server_id, result.tag.as_deref());
        redis::cmd("SET")
            .arg(&key)
            .arg(&result.payload)
            .query_async::<_, ()>(&mut connection)
            .await
            .map_err(|error| self.observe(error))
            .with_context(|| format!("write result {} failed", key))
    }

    async fn ping(&self) -> anyhow::Result<()> {
        let mut connection = self.connection()?;
        let _: String = redis::cmd("PING")
            .query_async(&mut connection)
            .await
            .map_err(|error| self.observe(error))?;
        if matches!(self.settings.mode, RedisMode::Replicated) {
            if let Role::Replica = master::role_of(&mut connection).await? {
                warn!("redis master was demoted to replica");
                if let Some(session) = self.session.lock().as_ref() {
                    session.events.emit(CoordinationEvent::MasterLost);
                }
                return Err(anyhow!("redis master was demoted"));
            }
        }
        Ok(())
    }

    async fn disconnect(&self) -> anyhow::Result<()> {
        if let Some(session) = self.session.lock().take() {
            debug!("redis session with {} released", session.node);
        }
        Ok(())
    }
}
