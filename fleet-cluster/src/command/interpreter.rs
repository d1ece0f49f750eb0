use std::sync::Arc;

use anyhow::anyhow;
use tracing::{info, warn};

use fleet_core::command_result::CommandResult;
use fleet_core::host::Host;
use fleet_core::setting::{Setting, STOP_FLAG};

use crate::command::message::Command;
use crate::command::{sandbox, show};

pub const OK: &str = "ok";

/// Executes administrative commands against the host.
#[derive(Clone)]
pub struct CommandInterpreter {
    host: Arc<dyn Host>,
}

impl CommandInterpreter {
    pub fn new(host: Arc<dyn Host>) -> Self {
        Self { host }
    }

    /// Runs `command` and describes the outcome. `kill` only reports here, terminating is left
    /// to the caller once the result is written.
    pub fn execute(&self, command: &Command) -> anyhow::Result<CommandResult> {
        let host = self.host.as_ref();
        let server_id = host.server_id();
        let result = match command {
            Command::Stop => {
                info!("{} is stopped by command", server_id);
                host.set(STOP_FLAG, Setting::from(true));
                host.stop();
                CommandResult::new(OK)
            }
            Command::Kill => {
                info!("{} is forced killed by command", server_id);
                CommandResult::new(OK)
            }
            Command::AddCron(cron) => {
                info!("{} add {}", server_id, cron);
                host.add_crons(vec![cron.clone()])?;
                CommandResult::new(OK)
            }
            Command::RemoveCron(cron) => {
                info!("{} remove {}", server_id, cron);
                host.remove_crons(vec![cron.clone()])?;
                CommandResult::new(OK)
            }
            Command::Blacklist(ids) => {
                if !host.is_frontend() {
                    warn!("{} is not a frontend server, ignore blacklist {:?}", server_id, ids);
                    return Ok(CommandResult::new(format!("{} is not a frontend server", server_id)));
                }
                let connector = host.components()
                    .connector
                    .ok_or_else(|| anyhow!("{} has no connector loaded", server_id))?;
                info!("{} add {:?} to blacklist", server_id, ids);
                connector.add_blacklist(ids);
                CommandResult::new(OK)
            }
            Command::Set { key, value } => {
                info!("{} set {} to {}", server_id, key, value);
                host.set(key, Setting::from(value.clone()));
                CommandResult::new(OK)
            }
            Command::Get(key) => {
                let value = host.get(key).map(|setting| setting.to_json()).unwrap_or_default();
                CommandResult::new(value.to_string())
            }
            Command::Enable(key) => {
                info!("{} enable {}", server_id, key);
                host.enable(key);
                CommandResult::new(OK)
            }
            Command::Disable(key) => {
                info!("{} disable {}", server_id, key);
                host.disable(key);
                CommandResult::new(OK)
            }
            Command::Show => {
                let snapshot = show::snapshot(host)?;
                CommandResult::tagged(serde_json::to_string(&snapshot)?, show::SHOW_TAG)
            }
            Command::Run(expression) => {
                let value = sandbox::run(host, expression)?;
                info!("{} run {} with result {}", server_id, expression, value);
                CommandResult::new(value)
            }
            Command::Exec(script) => {
                let value = sandbox::exec(host, script)?;
                info!("{} exec {} with result {}", server_id, script, value);
                CommandResult::new(value)
            }
        };
        Ok(result)
    }
}
