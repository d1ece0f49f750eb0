use std::time::Duration;

use anyhow::{anyhow, Context};
use itertools::Itertools;
use redis::aio::MultiplexedConnection;
use tracing::{debug, warn};

use crate::config::settings::{RedisMode, RedisSettings};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(super) enum Role {
    Master,
    Replica,
}

/// Reads `role:` out of an `INFO replication` reply.
pub(super) fn parse_role(info: &str) -> Option<Role> {
    info.lines()
        .filter_map(|line| line.trim().strip_prefix("role:"))
        .map(|role| match role.trim() {
            "master" => Some(Role::Master),
            "slave" | "replica" => Some(Role::Replica),
            _ => None,
        })
        .next()
        .flatten()
}

pub(super) fn node_url(node: &str, password: Option<&str>) -> String {
    let address = node.trim_start_matches("redis://").trim_end_matches('/');
    match password {
        Some(password) => format!("redis://:{}@{}/", password, address),
        None => format!("redis://{}/", address),
    }
}

pub(super) async fn open(node: &str, password: Option<&str>, timeout: Duration) -> anyhow::Result<MultiplexedConnection> {
    let client = redis::Client::open(node_url(node, password))
        .with_context(|| format!("invalid redis node {}", node))?;
    let connection = tokio::time::timeout(timeout, client.get_multiplexed_tokio_connection())
        .await
        .map_err(|_| anyhow!("connect redis {} timed out after {:?}", node, timeout))?
        .with_context(|| format!("connect redis {} failed", node))?;
    Ok(connection)
}

pub(super) async fn role_of(connection: &mut MultiplexedConnection) -> anyhow::Result<Role> {
    let info: String = redis::cmd("INFO").arg("replication").query_async(connection).await?;
    parse_role(&info).ok_or_else(|| anyhow!("no role in INFO replication reply"))
}

/// Connects to the node that accepts writes: the first node in single mode, the discovered
/// master in replicated mode.
pub async fn open_writable(settings: &RedisSettings) -> anyhow::Result<(String, MultiplexedConnection)> {
    let password = settings.password.as_deref();
    let timeout = settings.ping_timeout.to_std_duration();
    match settings.mode {
        RedisMode::Single => {
            let node = settings.nodes.first().ok_or_else(|| anyhow!("no redis node configured"))?;
            let connection = open(node, password, timeout).await?;
            Ok((node.clone(), connection))
        }
        RedisMode::Replicated => discover(&settings.nodes, password, timeout).await,
    }
}

/// Connects to the first node reporting itself as master.
pub(super) async fn discover(nodes: &[String], password: Option<&str>, timeout: Duration) -> anyhow::Result<(String, MultiplexedConnection)> {
    for node in nodes {
        let mut connection = match open(node, password, timeout).await {
            Ok(connection) => connection,
            Err(error) => {
                warn!("skip redis node: {:#}", error);
                continue;
            }
        };
        match role_of(&mut connection).await {
            Ok(Role::Master) => {
                debug!("redis master found at {}", node);
                return Ok((node.clone(), connection));
            }
            Ok(Role::Replica) => debug!("redis node {} is a replica", node),
            Err(error) => warn!("query role of redis node {} failed: {:#}", node, error),
        }
    }
    Err(anyhow!("no redis master among [{}]", nodes.iter().join(", ")))
}

#[cfg(test)]
mod tests {
    use crate::config::settings::{RedisMode, RedisSettings};
    use crate::redis_backend::master::{node_url, open_writable, parse_role, Role};

    #[test]
    fn test_parse_role() {
        let master = "# Replication\r\nrole:master\r\nconnected_slaves:1\r\nslave0:ip=10.0.0.2,port=6379,state=online\r\n";
        assert_eq!(parse_role(master), Some(Role::Master));
        let replica = "# Replication\r\nrole:slave\r\nmaster_host:10.0.0.1\r\n";
        assert_eq!(parse_role(replica), Some(Role::Replica));
        assert_eq!(parse_role("# Replication\r\nconnected_slaves:0\r\n"), None);
        assert_eq!(parse_role("role:sentinel"), None);
    }

    #[test]
    fn test_node_url() {
        assert_eq!(node_url("127.0.0.1:6379", None), "redis://127.0.0.1:6379/");
        assert_eq!(node_url("redis://10.0.0.1:6380/", Some("secret")), "redis://:secret@10.0.0.1:6380/");
    }

    #[tokio::test]
    async fn test_replicated_writes_go_through_discovery() {
        let nodes = vec!["127.0.0.1:1".to_string()];
        let single = RedisSettings::builder().nodes(nodes.clone()).build();
        let error = open_writable(&single).await.err().map(|error| format!("{:#}", error));
        assert!(error.is_some_and(|error| error.contains("connect redis 127.0.0.1:1")));
        let replicated = RedisSettings::builder().mode(RedisMode::Replicated).nodes(nodes).build();
        let error = open_writable(&replicated).await.err().map(|error| format!("{:#}", error));
        assert!(error.is_some_and(|error| error.contains("no redis master among [127.0.0.1:1]")));
    }
}
