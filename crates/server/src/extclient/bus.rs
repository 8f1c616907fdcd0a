//! Message bus
//!
//! Events tell gateway daemons to recompute their peer sets and tell the DNS
//! subsystem about client names. The receiving side is out of process; this
//! module only defines the payloads and the publish seam.

use async_trait::async_trait;
use netmesh_common::ExtClient;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Bus topics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    PeersUpdate,
    DnsCreate,
    DnsDelete,
    DnsUpdate,
}

impl Topic {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PeersUpdate => "peers/update",
            Self::DnsCreate => "dns/create",
            Self::DnsDelete => "dns/delete",
            Self::DnsUpdate => "dns/update",
        }
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// DNS record for one client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsEntry {
    pub client_id: String,
    pub address: String,
    pub address6: String,
    pub network: String,
}

impl From<&ExtClient> for DnsEntry {
    fn from(client: &ExtClient) -> Self {
        Self {
            client_id: client.client_id.clone(),
            address: client.address.clone(),
            address6: client.address6.clone(),
            network: client.network.clone(),
        }
    }
}

/// A client the gateway must drop from its peer set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemovedPeer {
    pub client_id: String,
    pub public_key: String,
    pub address: String,
    pub address6: String,
}

impl From<&ExtClient> for RemovedPeer {
    fn from(client: &ExtClient) -> Self {
        Self {
            client_id: client.client_id.clone(),
            public_key: client.public_key.clone(),
            address: client.address.clone(),
            address6: client.address6.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Recompute and push the peer set of `gateway_id`
    PeerUpdate {
        network: String,
        gateway_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        removed: Option<RemovedPeer>,
    },
    DnsCreate { entry: DnsEntry },
    DnsDelete { entry: DnsEntry },
    /// Rename. Receivers add `new` before removing `old`.
    DnsReplace { old: DnsEntry, new: DnsEntry },
}

impl Event {
    pub fn topic(&self) -> Topic {
        match self {
            Self::PeerUpdate { .. } => Topic::PeersUpdate,
            Self::DnsCreate { .. } => Topic::DnsCreate,
            Self::DnsDelete { .. } => Topic::DnsDelete,
            Self::DnsReplace { .. } => Topic::DnsUpdate,
        }
    }

    /// Short description for logs
    pub fn describe(&self) -> String {
        match self {
            Self::PeerUpdate { network, gateway_id, removed } => match removed {
                Some(r) => format!("peer update {}/{} (removed {})", network, gateway_id, r.client_id),
                None => format!("peer update {}/{}", network, gateway_id),
            },
            Self::DnsCreate { entry } => format!("dns create {}/{}", entry.network, entry.client_id),
            Self::DnsDelete { entry } => format!("dns delete {}/{}", entry.network, entry.client_id),
            Self::DnsReplace { old, new } => {
                format!("dns replace {}/{} -> {}", old.network, old.client_id, new.client_id)
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("broker rejected {topic}: {status}")]
    Rejected { topic: Topic, status: u16 },

    #[error("bus closed")]
    Closed,
}

/// Publish side of the message bus
#[async_trait]
pub trait MessageBus: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, event: &Event) -> Result<(), BusError>;
}

/// In-process bus on a tokio broadcast channel
pub struct BroadcastBus {
    tx: broadcast::Sender<Event>,
}

impl BroadcastBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl MessageBus for BroadcastBus {
    fn name(&self) -> &'static str {
        "broadcast"
    }

    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        match self.tx.send(event.clone()) {
            Ok(n) => debug!("{} delivered to {} subscribers", event.describe(), n),
            // Nobody listening is not a failure
            Err(_) => debug!("{} had no subscribers", event.describe()),
        }
        Ok(())
    }
}

/// Posts each event as JSON to `<base_url>/<topic>`
pub struct WebhookBus {
    client: reqwest::Client,
    base_url: String,
}

impl WebhookBus {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, BusError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn url_for(&self, topic: Topic) -> String {
        format!("{}/{}", self.base_url, topic)
    }
}

#[async_trait]
impl MessageBus for WebhookBus {
    fn name(&self) -> &'static str {
        "webhook"
    }

    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        let topic = event.topic();
        let resp = self.client.post(self.url_for(topic)).json(event).send().await?;
        if !resp.status().is_success() {
            return Err(BusError::Rejected {
                topic,
                status: resp.status().as_u16(),
            });
        }
        debug!("Posted {} to {}", event.describe(), topic);
        Ok(())
    }
}

/// Logs events and drops them
pub struct NullBus;

#[async_trait]
impl MessageBus for NullBus {
    fn name(&self) -> &'static str {
        "null"
    }

    async fn publish(&self, event: &Event) -> Result<(), BusError> {
        info!(topic = %event.topic(), "{}", event.describe());
        Ok(())
    }
}
