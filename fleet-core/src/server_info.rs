use std::collections::{BTreeMap, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

/// Identity of one process in the fleet, as published to the coordination backend.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct ServerInfo {
    pub id: String,
    #[serde(rename = "serverType", alias = "type")]
    pub server_type: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub pid: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl ServerInfo {
    pub fn new(id: impl Into<String>, server_type: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id: id.into(),
            server_type: server_type.into(),
            host: host.into(),
            port,
            pid: 0,
            extra: BTreeMap::new(),
        }
    }

    /// Copy of this info stamped with the current process id, the form that gets registered.
    pub fn with_current_pid(&self) -> Self {
        let mut info = self.clone();
        info.pid = std::process::id();
        info
    }
}

impl Display for ServerInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({}@{}:{})", self.id, self.server_type, self.host, self.port)
    }
}

/// Envelope stored in a member node of the watch-based backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(rename = "serverInfo")]
    pub server_info: ServerInfo,
}

/// Immutable snapshot of all known peers, keyed by server id.
///
/// A view is never patched: every refresh builds a new one and the holder swaps it in whole.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ClusterView {
    servers: HashMap<String, ServerInfo>,
}

impl ClusterView {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ServerInfo> {
        self.servers.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.servers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.servers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item=&ServerInfo> {
        self.servers.values()
    }

    pub fn ids(&self) -> impl Iterator<Item=&String> {
        self.servers.keys()
    }

    pub fn of_type<'a>(&'a self, server_type: &'a str) -> impl Iterator<Item=&'a ServerInfo> + 'a {
        self.servers.values().filter(move |s| s.server_type == server_type)
    }
}

impl FromIterator<ServerInfo> for ClusterView {
    fn from_iter<T: IntoIterator<Item=ServerInfo>>(iter: T) -> Self {
        let servers = iter.into_iter().map(|s| (s.id.clone(), s)).collect();
        Self { servers }
    }
}

impl Display for ClusterView {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut ids = self.servers.keys().map(|id| id.as_str()).collect::<Vec<_>>();
        ids.sort_unstable();
        write!(f, "ClusterView[{}]", ids.join(","))
    }
}
