use std::time::Duration;

use anyhow::{anyhow, Context};
use clap::Parser;
use etcd_client::{Client, ConnectOptions};
use tokio::time::Instant;
use tracing::{debug, info};

use fleet_cluster::command::message::CommandMessage;
use fleet_cluster::command::show::SHOW_TAG;
use fleet_cluster::config;
use fleet_cluster::config::settings::{Backend, ClusterSettings, EtcdSettings, RedisSettings};
use fleet_cluster::keys::{EtcdKeys, RedisKeys};
use fleet_cluster::redis_backend::open_writable;
use fleet_core::ext::init_logger_with_filter;

/// Writes one command into a server's mailbox and prints the result it writes back.
#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    config: Option<String>,
    #[arg(short, long, default_value = "dev")]
    env: String,
    /// Target server id.
    #[arg(short, long)]
    server: String,
    /// Seconds to wait for the result.
    #[arg(short, long, default_value_t = 10)]
    wait: u64,
    /// Command payload, e.g. `{"command":"get","param":"maxOnline"}`.
    payload: String,
}

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter("info");
    let message = CommandMessage::parse(&args.payload)?;
    let tag = (message.command == "show").then_some(SHOW_TAG);
    let config = config::load(args.config.as_deref())?;
    let settings = ClusterSettings::new(&config)?;
    let wait = Duration::from_secs(args.wait);
    let result = match settings.monitor.backend {
        Backend::Etcd => send_etcd(&settings.etcd, &args.server, tag, &args.payload, wait).await?,
        Backend::Redis => send_redis(&settings.redis, &args.env, &args.server, tag, &args.payload, wait).await?,
    };
    info!("{} answered {}: {}", args.server, message.command, result);
    println!("{}", result);
    Ok(())
}

async fn send_etcd(settings: &EtcdSettings, server: &str, tag: Option<&str>, payload: &str, wait: Duration) -> anyhow::Result<String> {
    let options = match (&settings.username, &settings.password) {
        (Some(username), Some(password)) => Some(ConnectOptions::new().with_user(username.as_str(), password.as_str())),
        _ => None,
    };
    let mut client = Client::connect(&settings.endpoints, options).await.context("connect etcd failed")?;
    let keys = EtcdKeys::new(settings.root.as_str());
    let result_key = keys.result(server, tag);
    client.delete(result_key.as_str(), None).await?;
    client.put(keys.mailbox(server), payload, None).await?;
    debug!("command written to {}", keys.mailbox(server));
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        let resp = client.get(result_key.as_str(), None).await?;
        if let Some(kv) = resp.kvs().first() {
            return Ok(kv.value_str()?.to_string());
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(anyhow!("no result at {} within {:?}", result_key, wait))
}

async fn send_redis(settings: &RedisSettings, env: &str, server: &str, tag: Option<&str>, payload: &str, wait: Duration) -> anyhow::Result<String> {
    let (node, mut connection) = open_writable(settings).await?;
    debug!("writing through redis {} in {:?} mode", node, settings.mode);
    let keys = RedisKeys::new(settings.prefix.as_str(), settings.result_prefix.as_str(), env);
    let result_key = keys.result(server, tag);
    redis::cmd("DEL").arg(&result_key).query_async::<_, ()>(&mut connection).await?;
    redis::cmd("SET").arg(keys.mailbox(server)).arg(payload).query_async::<_, ()>(&mut connection).await?;
    debug!("command written to {}", keys.mailbox(server));
    let deadline = Instant::now() + wait;
    while Instant::now() < deadline {
        let result: Option<String> = redis::cmd("GET").arg(&result_key).query_async(&mut connection).await?;
        if let Some(result) = result {
            return Ok(result);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    Err(anyhow!("no result at {} within {:?}", result_key, wait))
}
