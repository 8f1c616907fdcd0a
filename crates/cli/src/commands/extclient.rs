//! External client commands

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use netmesh_common::ExtClient;
use std::collections::BTreeSet;
use std::path::PathBuf;

use crate::client::{ApiClient, ClientRequest};
use crate::output::{print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ExtClientCommands {
    /// List external clients
    List {
        /// Only clients in this network
        #[arg(short, long)]
        network: Option<String>,
    },

    /// Show one external client
    Get { network: String, client_id: String },

    /// Attach a new external client to an ingress gateway
    Create {
        network: String,
        /// Ingress gateway node id
        gateway: String,
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Change an external client
    Update {
        network: String,
        client_id: String,
        /// Rename the client
        #[arg(long)]
        new_id: Option<String>,
        #[command(flatten)]
        fields: FieldArgs,
    },

    /// Remove an external client
    Delete { network: String, client_id: String },

    /// Fetch the WireGuard config of a client
    Config {
        network: String,
        client_id: String,
        /// Write a QR code PNG instead of the config text
        #[arg(long)]
        qr: bool,
        /// Output file (stdout when omitted; required with --qr)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Args, Default)]
pub struct FieldArgs {
    /// WireGuard public key (server generates a key pair when omitted on create)
    #[arg(long)]
    public_key: Option<String>,

    /// Extra CIDR routed through the client (repeatable)
    #[arg(long = "allowed-ip")]
    extra_allowed_ips: Vec<String>,

    /// DNS server override; an empty value clears it
    #[arg(long)]
    dns: Option<String>,

    #[arg(long, conflicts_with = "disable")]
    enable: bool,

    #[arg(long)]
    disable: bool,

    /// Node id the client may not reach (repeatable)
    #[arg(long = "deny")]
    denied_acls: Vec<String>,
}

impl FieldArgs {
    fn into_request(self, client_id: Option<String>) -> ClientRequest {
        let enabled = match (self.enable, self.disable) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        ClientRequest {
            client_id,
            public_key: self.public_key,
            extra_allowed_ips: (!self.extra_allowed_ips.is_empty()).then_some(self.extra_allowed_ips),
            dns: self.dns,
            enabled,
            denied_acls: (!self.denied_acls.is_empty())
                .then(|| self.denied_acls.into_iter().collect::<BTreeSet<_>>()),
        }
    }
}

impl TableDisplay for ExtClient {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Network", "Gateway", "Address", "Address6", "Enabled", "Owner", "Modified"]
    }

    fn row(&self) -> Vec<String> {
        let owner = if self.is_owned() { self.owner_id.clone() } else { "-".to_string() };
        let modified = chrono::DateTime::from_timestamp(self.last_modified, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        vec![
            self.client_id.clone(),
            self.network.clone(),
            self.ingress_gateway_id.clone(),
            self.address.clone(),
            self.address6.clone(),
            self.enabled.to_string(),
            owner,
            modified,
        ]
    }
}

pub async fn execute(cmd: ExtClientCommands, client: ApiClient, format: OutputFormat) -> Result<()> {
    match cmd {
        ExtClientCommands::List { network } => {
            let clients = client.list(network.as_deref()).await?;
            print_list(&clients, format);
        }

        ExtClientCommands::Get { network, client_id } => {
            let ext = client.get(&network, &client_id).await?;
            print_item(&ext, format);
        }

        ExtClientCommands::Create { network, gateway, fields } => {
            let ext = client.create(&network, &gateway, &fields.into_request(None)).await?;
            print_item(&ext, format);
        }

        ExtClientCommands::Update {
            network,
            client_id,
            new_id,
            fields,
        } => {
            let ext = client
                .update(&network, &client_id, &fields.into_request(new_id))
                .await?;
            print_item(&ext, format);
        }

        ExtClientCommands::Delete { network, client_id } => {
            client.delete(&network, &client_id).await?;
            print_success(&format!("Deleted {} from {}", client_id, network));
        }

        ExtClientCommands::Config {
            network,
            client_id,
            qr,
            output,
        } => {
            let kind = if qr { "qr" } else { "file" };
            let body = client.config(&network, &client_id, kind).await?;
            match output {
                Some(path) => {
                    std::fs::write(&path, &body)
                        .with_context(|| format!("writing {}", path.display()))?;
                    print_success(&format!("Wrote {}", path.display()));
                }
                None if qr => anyhow::bail!("--qr needs --output"),
                None => print!("{}", String::from_utf8_lossy(&body)),
            }
        }
    }

    Ok(())
}
