//! The closed expression language of the `run` and `exec` commands.
//!
//! An expression is a member access or a call on one of the known objects, e.g. `app.serverId`,
//! `app.getServerById("area-1")` or `os.arch`. `run` sees only `app`; `exec` also sees `process`
//! and `os` and evaluates a script of `;` or newline separated statements, where
//! `result = <expression>` captures the value to report. Nothing else is interpreted.

use anyhow::{anyhow, bail};
use regex::Regex;
use serde_json::{json, Map, Value};

use fleet_core::host::Host;

pub const MISSING_RESULT: &str = "script result should be assigned to result value";

const ACCESS: &str = r#"^(\w+)\.(\w+)(\(\s*(?:"([^"]*)"|'([^']*)')?\s*\))?$"#;
const ASSIGNMENT: &str = r"^result\s*=\s*(.+)$";

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Reach {
    App,
    Process,
}

struct Access<'a> {
    object: &'a str,
    member: &'a str,
    /// `None` for a plain member access, `Some(argument)` for a call.
    call: Option<Option<&'a str>>,
}

pub fn run(host: &dyn Host, expression: &str) -> anyhow::Result<String> {
    let access = Regex::new(ACCESS)?;
    let value = evaluate(host, &access, Reach::App, expression)?;
    Ok(value.to_string())
}

pub fn exec(host: &dyn Host, script: &str) -> anyhow::Result<String> {
    let access = Regex::new(ACCESS)?;
    let assignment = Regex::new(ASSIGNMENT)?;
    let mut result = None;
    let statements = script.split(|c| c == ';' || c == '\n')
        .map(str::trim)
        .filter(|statement| !statement.is_empty());
    for statement in statements {
        match assignment.captures(statement) {
            Some(captures) => {
                let expression = captures.get(1).map_or("", |m| m.as_str());
                result = Some(evaluate(host, &access, Reach::Process, expression)?);
            }
            None => {
                evaluate(host, &access, Reach::Process, statement)?;
            }
        }
    }
    let rendered = match result {
        None => MISSING_RESULT.to_string(),
        Some(Value::String(text)) => text,
        Some(value) => value.to_string(),
    };
    Ok(rendered)
}

fn evaluate(host: &dyn Host, pattern: &Regex, reach: Reach, expression: &str) -> anyhow::Result<Value> {
    let expression = expression.trim();
    let captures = pattern.captures(expression)
        .ok_or_else(|| anyhow!("unsupported expression `{}`", expression))?;
    let group = |i: usize| captures.get(i).map(|m| m.as_str());
    let access = Access {
        object: group(1).unwrap_or_default(),
        member: group(2).unwrap_or_default(),
        call: group(3).map(|_| group(4).or(group(5))),
    };
    match access.object {
        "app" => app(host, &access),
        "process" | "os" if reach == Reach::Process => process(&access),
        "process" | "os" => bail!("{} is not reachable from run, use exec", access.object),
        other => bail!("{} is not defined", other),
    }
}

fn app(host: &dyn Host, access: &Access) -> anyhow::Result<Value> {
    let value = match (access.member, access.call) {
        ("serverId", None) => json!(host.server_id()),
        ("serverType", None) => json!(host.server_type()),
        ("env", None) => json!(host.env()),
        ("settings", None) => {
            let settings = host.settings()
                .into_iter()
                .map(|(key, setting)| (key, setting.to_json()))
                .collect::<Map<_, _>>();
            Value::Object(settings)
        }
        ("servers", None) => {
            let servers = host.servers()
                .iter()
                .map(|server| Ok((server.id.clone(), serde_json::to_value(server)?)))
                .collect::<anyhow::Result<Map<_, _>>>()?;
            Value::Object(servers)
        }
        ("isFrontend", Some(None)) => json!(host.is_frontend()),
        ("getCurServer", Some(None)) => serde_json::to_value(host.cur_server())?,
        ("getServerById", Some(Some(id))) => serde_json::to_value(host.server_by_id(id))?,
        ("get", Some(Some(key))) => host.get(key).map(|setting| setting.to_json()).unwrap_or(Value::Null),
        (member, _) => bail!("app.{} is not available", member),
    };
    Ok(value)
}

fn process(access: &Access) -> anyhow::Result<Value> {
    let value = match (access.object, access.member, access.call) {
        ("process", "pid", None) => json!(std::process::id()),
        ("process", "cwd", None | Some(None)) => json!(std::env::current_dir()?.display().to_string()),
        ("os", "platform", None | Some(None)) => json!(std::env::consts::OS),
        ("os", "arch", None | Some(None)) => json!(std::env::consts::ARCH),
        ("os", "cpus", None | Some(None)) => json!(std::thread::available_parallelism()?.get()),
        (object, member, _) => bail!("{}.{} is not available", object, member),
    };
    Ok(value)
}
