use std::sync::Arc;

use crate::config::settings::{Backend, ClusterSettings};
use crate::coordination::CoordinationClient;
use crate::etcd_backend::EtcdCoordination;
use crate::redis_backend::RedisCoordination;

pub mod command;
pub mod config;
pub mod coordination;
pub mod etcd_backend;
pub mod keys;
pub mod memory;
pub mod monitor;
pub mod redis_backend;

/// The configured backend client. `env` scopes the Redis key layout.
pub fn coordination_client(settings: &ClusterSettings, env: &str) -> anyhow::Result<Arc<dyn CoordinationClient>> {
    let client: Arc<dyn CoordinationClient> = match settings.monitor.backend {
        Backend::Etcd => Arc::new(EtcdCoordination::new(settings.etcd.clone())),
        Backend::Redis => Arc::new(RedisCoordination::new(settings.redis.clone(), env)?),
    };
    Ok(client)
}
