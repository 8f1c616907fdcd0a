//! netmesh API server daemon

use clap::Parser;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use netmesh_server::extclient::DeniedRangePolicy;
use netmesh_server::ServerConfig;

#[derive(Parser)]
#[command(name = "netmeshd")]
#[command(about = "netmesh API server - external client attachment for WireGuard meshes")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "NETMESH_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long, env = "NETMESH_LISTEN")]
    listen: Option<String>,

    /// Topology database path
    #[arg(long, env = "NETMESH_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Administrator bearer token
    #[arg(long, env = "NETMESH_MASTER_KEY", hide_env_values = true)]
    master_key: Option<String>,

    /// Topology seed file applied at startup
    #[arg(long, env = "NETMESH_SEED_PATH")]
    seed: Option<PathBuf>,

    /// Let non-admin users manage their own clients
    #[arg(long, env = "NETMESH_MULTI_TENANT")]
    multi_tenant: Option<bool>,

    /// How deny lists affect AllowedIPs (peer_set or strip)
    #[arg(long, env = "NETMESH_DENIED_RANGES")]
    denied_ranges: Option<DeniedRangePolicy>,

    /// Log format (text or json)
    #[arg(long, env = "NETMESH_LOG_FORMAT")]
    log_format: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(netmesh_common::default_config_path);
    let mut config = ServerConfig::load(&config_path)?;

    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }
    if let Some(master_key) = cli.master_key {
        config.master_key = master_key;
    }
    if let Some(seed) = cli.seed {
        config.seed_path = Some(seed);
    }
    if let Some(multi_tenant) = cli.multi_tenant {
        config.capabilities.multi_tenant = multi_tenant;
    }
    if let Some(policy) = cli.denied_ranges {
        config.acl.denied_ranges = policy;
    }
    if let Some(format) = cli.log_format {
        config.log_format = format;
    }

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    if config.json_logs() {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(filter)
            .init();
    }

    info!("netmesh server v{}", netmesh_common::VERSION);
    info!("Config: {:?}", config_path);

    if config.master_key.is_empty() {
        config.master_key = hex::encode(rand::random::<[u8; 16]>());
        warn!("No master key configured; generated one for this run: {}", config.master_key);
    }

    netmesh_server::serve(config).await
}
