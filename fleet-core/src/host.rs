use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use serde_json::Value;
use typed_builder::TypedBuilder;

use crate::cron::Cron;
use crate::server_info::{ClusterView, ServerInfo};
use crate::setting::{Setting, STOP_FLAG};

/// The application process as seen by the coordination layer.
///
/// Implementations must not block: `stop` requests a graceful shutdown that the host carries
/// out on its own schedule, and `replace_servers` swaps a reference.
pub trait Host: Send + Sync + 'static {
    fn server_id(&self) -> &str;

    fn server_type(&self) -> &str;

    /// Deployment environment, part of the key/value backend's key layout.
    fn env(&self) -> &str;

    fn cur_server(&self) -> ServerInfo;

    fn server_by_id(&self, id: &str) -> Option<ServerInfo>;

    /// The last view handed to [`replace_servers`](Host::replace_servers).
    fn servers(&self) -> Arc<ClusterView>;

    fn replace_servers(&self, view: Arc<ClusterView>);

    fn set(&self, key: &str, value: Setting);

    fn get(&self, key: &str) -> Option<Setting>;

    fn enable(&self, key: &str);

    fn disable(&self, key: &str);

    fn add_crons(&self, crons: Vec<Cron>) -> anyhow::Result<()>;

    fn remove_crons(&self, crons: Vec<Cron>) -> anyhow::Result<()>;

    fn is_frontend(&self) -> bool;

    fn stop(&self);

    /// Terminates the process without any cleanup.
    fn kill(&self) {
        std::process::exit(0)
    }

    fn settings(&self) -> Vec<(String, Setting)>;

    fn components(&self) -> Components;

    fn is_stopping(&self) -> bool {
        self.get(STOP_FLAG).is_some_and(|flag| flag.is_true())
    }
}

/// Live connection counters of a frontend process.
pub trait ConnectionComponent: Send + Sync {
    fn statistics(&self) -> Value;
}

/// A loaded remote-call surface (proxies or handlers): service name to method names.
pub trait SurfaceComponent: Send + Sync {
    fn surface(&self, server_type: &str) -> BTreeMap<String, Vec<String>>;
}

/// The client-facing connector's reject-list.
pub trait ConnectorComponent: Send + Sync {
    fn add_blacklist(&self, ids: &[String]);

    fn blacklist(&self) -> Vec<String>;
}

/// Named sub-objects of the host, queried read-only except for the connector's reject-list.
#[derive(Clone, Default, TypedBuilder)]
pub struct Components {
    #[builder(default, setter(strip_option))]
    pub connection: Option<Arc<dyn ConnectionComponent>>,
    #[builder(default, setter(strip_option))]
    pub proxy: Option<Arc<dyn SurfaceComponent>>,
    #[builder(default, setter(strip_option))]
    pub server: Option<Arc<dyn SurfaceComponent>>,
    #[builder(default, setter(strip_option))]
    pub connector: Option<Arc<dyn ConnectorComponent>>,
    /// Further components that only contribute their `{name}Config` setting to diagnostics.
    #[builder(default)]
    pub others: Vec<String>,
}

impl Components {
    pub fn names(&self) -> Vec<String> {
        let mut names = vec![];
        if self.connection.is_some() {
            names.push("connection".to_string());
        }
        if self.proxy.is_some() {
            names.push("proxy".to_string());
        }
        if self.server.is_some() {
            names.push("server".to_string());
        }
        if self.connector.is_some() {
            names.push("connector".to_string());
        }
        names.extend(self.others.iter().cloned());
        names
    }
}

impl Debug for Components {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Components")
            .field("names", &self.names())
            .finish_non_exhaustive()
    }
}
