use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, error, warn};

use fleet_core::command_result::CommandResult;
use fleet_core::host::Host;

use crate::command::interpreter::CommandInterpreter;
use crate::command::message::{Command, CommandMessage};
use crate::coordination::CoordinationClient;

pub mod interpreter;
pub mod message;
pub mod sandbox;
pub mod show;

/// Consumes the mailbox of one server: take, parse, execute, write the result back.
#[derive(Clone)]
pub struct CommandChannel {
    host: Arc<dyn Host>,
    client: Arc<dyn CoordinationClient>,
    interpreter: CommandInterpreter,
}

impl CommandChannel {
    pub fn new(host: Arc<dyn Host>, client: Arc<dyn CoordinationClient>) -> Self {
        let interpreter = CommandInterpreter::new(host.clone());
        Self { host, client, interpreter }
    }

    /// Handles the pending command if there is one. Returns the result that was written back,
    /// `None` when nothing was dispatched.
    pub async fn consume(&self) -> anyhow::Result<Option<CommandResult>> {
        let server_id = self.host.server_id();
        let payload = self.client.take_command(server_id)
            .await
            .with_context(|| format!("{} take command failed", server_id))?;
        let Some(payload) = payload.filter(|p| !p.trim().is_empty()) else {
            return Ok(None);
        };
        debug!("{} receive command {}", server_id, payload);
        let message = match CommandMessage::parse(&payload) {
            Ok(message) => message,
            Err(error) => {
                warn!("{} drop command: {:#}", server_id, error);
                return Ok(None);
            }
        };
        let command = match message.to_command() {
            None => {
                warn!("{} receive unknown command {}", server_id, message.command);
                return Ok(None);
            }
            Some(command) => command,
        };
        let result = command.as_ref()
            .map_err(|error| anyhow::anyhow!("{:#}", error))
            .and_then(|command| self.interpreter.execute(command))
            .unwrap_or_else(|error| {
                error!("{} command {} failed: {:#}", server_id, message.command, error);
                CommandResult::new(format!("{:#}", error))
            });
        self.client.write_result(server_id, &result)
            .await
            .with_context(|| format!("{} write result of {} failed", server_id, message.command))?;
        if let Ok(Command::Kill) = command {
            self.host.kill();
        }
        Ok(Some(result))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fleet_core::host::Host;
    use fleet_core::local_host::LocalHost;
    use fleet_core::server_info::ServerInfo;
    use fleet_core::setting::Setting;

    use crate::command::CommandChannel;
    use crate::coordination::{CoordinationClient, EventSink};
    use crate::memory::{MemoryCoordination, MemoryStore};

    async fn channel() -> anyhow::Result<(Arc<MemoryStore>, Arc<LocalHost>, CommandChannel)> {
        let store = MemoryStore::new();
        let client = MemoryCoordination::watching(store.clone());
        let host = Arc::new(
            LocalHost::builder()
                .info(ServerInfo::new("area-1", "area", "127.0.0.1", 3150))
                .env("dev")
                .exit_on_kill(false)
                .build()
        );
        client.connect(EventSink::new(|_| {})).await?;
        client.register(&host.cur_server()).await?;
        let channel = CommandChannel::new(host.clone(), Arc::new(client));
        Ok((store, host, channel))
    }

    #[tokio::test]
    async fn test_set_round_trip() -> anyhow::Result<()> {
        let (store, host, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"set","param":{"key":"a","value":"b"}}"#);
        let result = channel.consume().await?;
        assert_eq!(result.map(|r| r.payload), Some("ok".to_string()));
        assert_eq!(host.get("a"), Some(Setting::from("b")));
        assert_eq!(store.get("/fleet/cmd-area-1:result").as_deref(), Some("ok"));
        assert!(channel.consume().await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dropped() -> anyhow::Result<()> {
        let (store, host, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"set","param":{"key":"a""#);
        assert!(channel.consume().await?.is_none());
        assert!(host.get("a").is_none());
        assert_eq!(store.get("/fleet/cmd-area-1:result"), None);
        assert_eq!(store.get("/fleet/cmd-area-1").as_deref(), Some(""));
        Ok(())
    }

    #[tokio::test]
    async fn test_unknown_command_writes_nothing() -> anyhow::Result<()> {
        let (store, _, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"reboot"}"#);
        assert!(channel.consume().await?.is_none());
        assert_eq!(store.get("/fleet/cmd-area-1:result"), None);
        Ok(())
    }

    #[tokio::test]
    async fn test_failures_are_written_back() -> anyhow::Result<()> {
        let (store, _, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"run","param":"child_process.exec('ls')"}"#);
        let result = channel.consume().await?.map(|r| r.payload).unwrap_or_default();
        assert!(result.contains("not defined"), "{}", result);
        store.put("/fleet/cmd-area-1", r#"{"command":"get"}"#);
        let result = channel.consume().await?.map(|r| r.payload).unwrap_or_default();
        assert!(result.contains("string param"), "{}", result);
        assert_eq!(store.get("/fleet/cmd-area-1:result"), Some(result));
        Ok(())
    }

    #[tokio::test]
    async fn test_kill_after_result() -> anyhow::Result<()> {
        let (store, host, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"kill"}"#);
        channel.consume().await?;
        assert!(host.killed());
        assert_eq!(store.get("/fleet/cmd-area-1:result").as_deref(), Some("ok"));
        Ok(())
    }

    #[tokio::test]
    async fn test_concurrent_consumers_dispatch_once() -> anyhow::Result<()> {
        let (store, host, channel) = channel().await?;
        store.put("/fleet/cmd-area-1", r#"{"command":"addCron","param":{"id":1,"time":"0 * * * * *","action":"a.b"}}"#);
        let handles = (0..8).map(|_| {
            let channel = channel.clone();
            tokio::spawn(async move { channel.consume().await })
        }).collect::<Vec<_>>();
        let mut dispatched = 0;
        for handle in handles {
            if handle.await??.is_some() {
                dispatched += 1;
            }
        }
        assert_eq!(dispatched, 1);
        assert_eq!(host.crons().len(), 1);
        Ok(())
    }
}
