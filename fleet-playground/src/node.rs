use std::sync::Arc;

use clap::Parser;
use tracing::info;

use fleet_cluster::config;
use fleet_cluster::config::settings::ClusterSettings;
use fleet_cluster::coordination_client;
use fleet_cluster::monitor::ClusterMonitor;
use fleet_connector::connector::Connector;
use fleet_core::ext::init_logger_with_filter;
use fleet_core::host::Components;
use fleet_core::local_host::LocalHost;
use fleet_core::server_info::ServerInfo;

#[derive(Parser, Debug)]
struct Args {
    #[arg(short, long)]
    id: String,
    #[arg(short = 't', long, default_value = "connector")]
    server_type: String,
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long)]
    port: u16,
    #[arg(short, long, default_value = "dev")]
    env: String,
    /// TOML file layered over the built-in defaults.
    #[arg(short, long)]
    config: Option<String>,
    /// Loads a client connector and accepts blacklist commands.
    #[arg(long)]
    frontend: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logger_with_filter("fleet_cluster=debug,fleet_core=debug,info");
    let config = config::load(args.config.as_deref())?;
    let settings = ClusterSettings::new(&config)?;
    let client = coordination_client(&settings, &args.env)?;
    let components = if args.frontend {
        let connector = Arc::new(Connector::new());
        Components::builder()
            .connection(connector.clone())
            .connector(connector)
            .build()
    } else {
        Components::default()
    };
    let info = ServerInfo::new(args.id, args.server_type, args.host, args.port);
    let host = Arc::new(
        LocalHost::builder()
            .info(info)
            .env(args.env)
            .frontend(args.frontend)
            .components(components)
            .build()
    );
    let monitor = ClusterMonitor::new(settings.monitor.clone(), host.clone(), client);
    monitor.start().await?;
    tokio::select! {
        _ = host.stopped() => info!("stop requested by command"),
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    monitor.stop().await?;
    Ok(())
}
