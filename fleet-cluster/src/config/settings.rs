use std::fmt::{Display, Formatter};

use config::Config;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use fleet_core::util::duration::ConfigDuration;

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    Etcd,
    Redis,
}

impl Display for Backend {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Backend::Etcd => write!(f, "etcd"),
            Backend::Redis => write!(f, "redis"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "kebab-case")]
pub struct ClusterSettings {
    #[builder(default)]
    pub monitor: MonitorSettings,
    #[builder(default)]
    pub etcd: EtcdSettings,
    #[builder(default)]
    pub redis: RedisSettings,
}

impl ClusterSettings {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let settings: Self = config.get("fleet")?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "kebab-case")]
pub struct MonitorSettings {
    #[builder(default = Backend::Etcd)]
    pub backend: Backend,
    #[builder(default = ConfigDuration::from_secs(5))]
    pub connect_timeout: ConfigDuration,
    /// Attempts of one reconnection sequence before the session is given up.
    #[builder(default = 3)]
    pub reconnect_times: usize,
    #[builder(default = ConfigDuration::from_secs(1))]
    pub reconnect_delay: ConfigDuration,
    /// Bound on one watch-based topology round.
    #[builder(default = ConfigDuration::from_secs(10))]
    pub countdown_timeout: ConfigDuration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "kebab-case")]
pub struct EtcdSettings {
    #[builder(default = vec!["127.0.0.1:2379".to_string()])]
    pub endpoints: Vec<String>,
    #[builder(default = "/fleet".to_string(), setter(into))]
    pub root: String,
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub username: Option<String>,
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub password: Option<String>,
    /// TTL of the registration lease.
    #[builder(default = ConfigDuration::from_secs(10))]
    pub session_timeout: ConfigDuration,
    #[builder(default = ConfigDuration::from_secs(3))]
    pub keep_alive_interval: ConfigDuration,
    #[serde(default)]
    #[builder(default = false)]
    pub set_acl: bool,
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RedisMode {
    Single,
    /// Several nodes of which exactly one reports the master role.
    Replicated,
}

#[derive(Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[serde(rename_all = "kebab-case")]
pub struct RedisSettings {
    #[builder(default = RedisMode::Single)]
    pub mode: RedisMode,
    /// `host:port` of every node. Single mode uses the first one.
    #[builder(default = vec!["127.0.0.1:6379".to_string()])]
    pub nodes: Vec<String>,
    #[serde(default)]
    #[builder(default, setter(strip_option, into))]
    pub password: Option<String>,
    #[builder(default = "fleet-reg:".to_string(), setter(into))]
    pub prefix: String,
    #[builder(default = "fleet-res:".to_string(), setter(into))]
    pub result_prefix: String,
    #[builder(default = ConfigDuration::from_secs(10))]
    pub period: ConfigDuration,
    #[builder(default = ConfigDuration::from_secs(30))]
    pub expire: ConfigDuration,
    #[builder(default = ConfigDuration::from_secs(5))]
    pub ping_interval: ConfigDuration,
    #[builder(default = ConfigDuration::from_secs(3))]
    pub ping_timeout: ConfigDuration,
}

impl Default for RedisSettings {
    fn default() -> Self {
        Self::builder().build()
    }
}
