//! netmesh CLI - Main Entry Point

use clap::{Parser, Subcommand};

use netmesh_cli::client::{ApiClient, Identity};
use netmesh_cli::commands::extclient;
use netmesh_cli::output;

#[derive(Parser)]
#[command(name = "netmesh")]
#[command(author, version, about = "Manage external clients of netmesh networks", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// API server address
    #[arg(long, env = "NETMESH_SERVER", default_value = "http://127.0.0.1:8081", global = true)]
    server: String,

    /// Administrator token
    #[arg(long, env = "NETMESH_MASTER_KEY", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Act as this network user (takes precedence over --token)
    #[arg(long, env = "NETMESH_USER", global = true)]
    user: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage external clients
    #[command(subcommand, visible_alias = "ext")]
    Extclient(extclient::ExtClientCommands),

    /// Check server status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let identity = match (cli.token, cli.user) {
        (_, Some(user)) => Identity::User(user),
        (Some(token), None) => Identity::Token(token),
        (None, None) => Identity::Anonymous,
    };
    let client = ApiClient::new(&cli.server, identity)?;

    match cli.command {
        Commands::Extclient(cmd) => {
            if let Err(e) = extclient::execute(cmd, client, cli.format).await {
                output::print_error(&e.to_string());
                std::process::exit(1);
            }
        }
        Commands::Status => match client.health().await {
            Ok(health) => {
                output::print_success(&format!("Server is running at {}", cli.server));
                println!("{}", serde_json::to_string_pretty(&health)?);
            }
            Err(e) => {
                output::print_error(&format!("Cannot reach server at {}: {}", cli.server, e));
                std::process::exit(1);
            }
        },
        Commands::Version => {
            println!("netmesh CLI v{}", netmesh_common::VERSION);
        }
    }

    Ok(())
}
