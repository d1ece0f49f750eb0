use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Map, Value};
use tracing::error;

use fleet_core::host::{Host, SurfaceComponent};
use fleet_core::setting::Setting;

pub const SHOW_TAG: &str = "show";

/// Diagnostic snapshot of the host. Every leaf is plain JSON, anything opaque is replaced by
/// the placeholder string before it gets here.
pub fn snapshot(host: &dyn Host) -> anyhow::Result<Value> {
    let components = host.components();
    let snapshot = json!({
        "connectionInfo": connection_info(host),
        "proxyInfo": surface_info(host, components.proxy.as_ref(), "no proxy loaded"),
        "handlerInfo": surface_info(host, components.server.as_ref(), "no handler loaded"),
        "componentInfo": component_info(host),
        "settingInfo": setting_info(host)?,
    });
    Ok(snapshot)
}

fn connection_info(host: &dyn Host) -> Value {
    let statistics = match host.components().connection {
        None => json!("no connection"),
        Some(connection) => connection.statistics(),
    };
    json!({
        "serverId": host.server_id(),
        "connectionInfo": statistics,
    })
}

fn surface_info(host: &dyn Host, surface: Option<&Arc<dyn SurfaceComponent>>, missing: &str) -> Value {
    let Some(surface) = surface else {
        return json!(missing);
    };
    let Some(server) = host.server_by_id(host.server_id()) else {
        error!("{} not found in its own server table", host.server_id());
        return json!({});
    };
    let services = surface.surface(&server.server_type)
        .into_iter()
        .map(|(service, methods)| {
            let methods = methods.into_iter()
                .map(|method| (method, json!("function")))
                .collect::<Map<_, _>>();
            (service, Value::Object(methods))
        })
        .collect::<Map<_, _>>();
    let mut info = Map::new();
    info.insert(server.server_type, Value::Object(services));
    Value::Object(info)
}

/// Each component's `{name}Config` setting reduced to its scalar fields.
fn component_info(host: &dyn Host) -> Value {
    let info = host.components()
        .names()
        .into_iter()
        .map(|name| {
            let config = host.get(&format!("{}Config", name));
            let scalars = match config {
                Some(Setting::Value(Value::Object(fields))) => fields.into_iter()
                    .filter(|(_, value)| !value.is_object() && !value.is_array())
                    .collect::<Map<_, _>>(),
                _ => Map::new(),
            };
            (name, Value::Object(scalars))
        })
        .collect::<Map<_, _>>();
    Value::Object(info)
}

fn setting_info(host: &dyn Host) -> anyhow::Result<Value> {
    let internal = Regex::new(r"^__\w+__$")?;
    let component_config = Regex::new(r"\w+Config$")?;
    let settings = host.settings()
        .into_iter()
        .filter(|(key, _)| !internal.is_match(key) && !component_config.is_match(key))
        .map(|(key, setting)| (key, setting.to_json()))
        .collect::<Map<_, _>>();
    Ok(Value::Object(settings))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use serde_json::{json, Value};

    use fleet_connector::connector::Connector;
    use fleet_core::host::{Components, Host, SurfaceComponent};
    use fleet_core::local_host::LocalHost;
    use fleet_core::server_info::ServerInfo;
    use fleet_core::setting::{OPAQUE_PLACEHOLDER, Setting, STOP_FLAG};

    use crate::command::show::snapshot;

    struct Handlers;

    impl SurfaceComponent for Handlers {
        fn surface(&self, server_type: &str) -> BTreeMap<String, Vec<String>> {
            let mut surface = BTreeMap::new();
            surface.insert(format!("{}Handler", server_type), vec!["entry".to_string(), "leave".to_string()]);
            surface
        }
    }

    fn leaves(value: &Value, out: &mut Vec<Value>) {
        match value {
            Value::Object(map) => map.values().for_each(|v| leaves(v, out)),
            Value::Array(items) => items.iter().for_each(|v| leaves(v, out)),
            other => out.push(other.clone()),
        }
    }

    #[test]
    fn test_bare_host() -> anyhow::Result<()> {
        let host = LocalHost::builder()
            .info(ServerInfo::new("area-1", "area", "127.0.0.1", 3150))
            .env("dev")
            .build();
        let show = snapshot(&host)?;
        assert_eq!(show["connectionInfo"], json!({"serverId": "area-1", "connectionInfo": "no connection"}));
        assert_eq!(show["proxyInfo"], json!("no proxy loaded"));
        assert_eq!(show["handlerInfo"], json!("no handler loaded"));
        assert_eq!(show["componentInfo"], json!({}));
        assert_eq!(show["settingInfo"], json!({}));
        Ok(())
    }

    #[test]
    fn test_full_snapshot() -> anyhow::Result<()> {
        let connector = Arc::new(Connector::new());
        let components = Components::builder()
            .connection(connector.clone())
            .connector(connector)
            .server(Arc::new(Handlers))
            .others(vec!["session".to_string()])
            .build();
        let host = LocalHost::builder()
            .info(ServerInfo::new("connector-1", "connector", "127.0.0.1", 3010))
            .env("dev")
            .frontend(true)
            .components(components)
            .build();
        host.set("name", Setting::from("fleet"));
        host.set("codec", Setting::Opaque);
        host.set(STOP_FLAG, Setting::from(false));
        host.set("connectorConfig", Setting::from(json!({"heartbeat": 30, "ssl": {"key": "k"}, "protocols": ["ws"]})));
        let show = snapshot(&host)?;
        assert_eq!(show["connectionInfo"]["connectionInfo"]["totalConnCount"], 0);
        assert_eq!(show["handlerInfo"], json!({"connector": {"connectorHandler": {"entry": "function", "leave": "function"}}}));
        assert_eq!(show["componentInfo"]["connector"], json!({"heartbeat": 30}));
        assert_eq!(show["componentInfo"]["session"], json!({}));
        assert_eq!(show["settingInfo"], json!({"name": "fleet", "codec": OPAQUE_PLACEHOLDER}));
        let mut values = vec![];
        leaves(&show, &mut values);
        assert!(values.iter().all(|v| v.is_string() || v.is_number() || v.is_boolean() || v.is_null()));
        Ok(())
    }
}
