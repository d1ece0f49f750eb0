use anyhow::{anyhow, Context};
use serde::Deserialize;
use serde_json::{Map, Value};

use fleet_core::cron::Cron;

/// A mailbox payload as written by an operator: `{"command": .., "param": ..}`.
///
/// Older tools put some arguments at the top level (`cron`, `blacklist`, `script`), those are
/// kept in `extra`.
#[derive(Debug, Clone, Deserialize)]
pub struct CommandMessage {
    pub command: String,
    #[serde(default)]
    pub param: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Stop,
    Kill,
    AddCron(Cron),
    RemoveCron(Cron),
    Blacklist(Vec<String>),
    Set { key: String, value: Value },
    Get(String),
    Enable(String),
    Disable(String),
    Show,
    Run(String),
    Exec(String),
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stop => "stop",
            Command::Kill => "kill",
            Command::AddCron(_) => "addCron",
            Command::RemoveCron(_) => "removeCron",
            Command::Blacklist(_) => "blacklist",
            Command::Set { .. } => "set",
            Command::Get(_) => "get",
            Command::Enable(_) => "enable",
            Command::Disable(_) => "disable",
            Command::Show => "show",
            Command::Run(_) => "run",
            Command::Exec(_) => "exec",
        }
    }
}

impl CommandMessage {
    pub fn parse(payload: &str) -> anyhow::Result<Self> {
        serde_json::from_str(payload).with_context(|| format!("malformed command payload {}", payload))
    }

    /// `None` for a command name outside the enumerated set, `Some(Err)` for a known command
    /// with unusable parameters.
    pub fn to_command(&self) -> Option<anyhow::Result<Command>> {
        let command = match self.command.as_str() {
            "stop" => Ok(Command::Stop),
            "kill" => Ok(Command::Kill),
            "addCron" => self.cron().map(Command::AddCron),
            "removeCron" => self.cron().map(Command::RemoveCron),
            "blacklist" => self.blacklist().map(Command::Blacklist),
            "set" => self.set(),
            "get" => self.text_param().map(Command::Get),
            "enable" => self.text_param().map(Command::Enable),
            "disable" => self.text_param().map(Command::Disable),
            "show" => Ok(Command::Show),
            "run" => self.text_param().map(Command::Run),
            "exec" => self.argument("script")
                .as_str()
                .map(|script| Command::Exec(script.to_string()))
                .ok_or_else(|| anyhow!("exec needs a script string")),
            _ => return None,
        };
        Some(command)
    }

    /// `param` when present, otherwise the legacy top-level field.
    fn argument(&self, legacy: &str) -> &Value {
        if self.param.is_null() {
            self.extra.get(legacy).unwrap_or(&Value::Null)
        } else {
            &self.param
        }
    }

    fn cron(&self) -> anyhow::Result<Cron> {
        let cron = self.argument("cron").clone();
        serde_json::from_value(cron).with_context(|| format!("{} needs a cron descriptor", self.command))
    }

    fn blacklist(&self) -> anyhow::Result<Vec<String>> {
        let ids = self.argument("blacklist").clone();
        serde_json::from_value(ids).context("blacklist needs a list of identifiers")
    }

    fn set(&self) -> anyhow::Result<Command> {
        let key = self.param.get("key")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("set needs param.key"))?;
        let value = self.param.get("value").cloned().unwrap_or(Value::Null);
        Ok(Command::Set { key: key.to_string(), value })
    }

    fn text_param(&self) -> anyhow::Result<String> {
        self.param.as_str()
            .map(str::to_string)
            .ok_or_else(|| anyhow!("{} needs a string param", self.command))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use fleet_core::cron::CronId;

    use crate::command::message::{Command, CommandMessage};

    fn command(payload: &str) -> Option<anyhow::Result<Command>> {
        CommandMessage::parse(payload).ok().and_then(|m| m.to_command())
    }

    #[test]
    fn test_parse_set() -> anyhow::Result<()> {
        let parsed = command(r#"{"command":"set","param":{"key":"a","value":"b"}}"#);
        let Some(Ok(Command::Set { key, value })) = parsed else {
            panic!("expected set, got {:?}", parsed);
        };
        assert_eq!(key, "a");
        assert_eq!(value, json!("b"));
        Ok(())
    }

    #[test]
    fn test_legacy_fields() {
        let add = command(r#"{"command":"addCron","cron":{"id":3,"time":"0 0 * * * *","action":"a.b"}}"#);
        let Some(Ok(Command::AddCron(cron))) = add else {
            panic!("expected addCron, got {:?}", add);
        };
        assert_eq!(cron.id, CronId::Number(3));
        let blacklist = command(r#"{"command":"blacklist","blacklist":["1.2.3.4"]}"#);
        assert!(matches!(blacklist, Some(Ok(Command::Blacklist(ids))) if ids == vec!["1.2.3.4"]));
        let exec = command(r#"{"command":"exec","script":"result = os.arch"}"#);
        assert!(matches!(exec, Some(Ok(Command::Exec(script))) if script == "result = os.arch"));
    }

    #[test]
    fn test_unknown_and_invalid() {
        assert!(command(r#"{"command":"reboot"}"#).is_none());
        assert!(matches!(command(r#"{"command":"set","param":"a"}"#), Some(Err(_))));
        assert!(matches!(command(r#"{"command":"removeCron"}"#), Some(Err(_))));
        assert!(CommandMessage::parse("{command: stop").is_err());
        assert!(CommandMessage::parse(r#"{"param":1}"#).is_err());
    }
}
