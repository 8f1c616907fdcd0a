//! Server configuration

use crate::extclient::{Capabilities, DeniedRangePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address
    pub listen: String,

    /// Topology database path
    pub db_path: PathBuf,

    /// Bearer token that identifies the administrator. Generated at startup if empty.
    pub master_key: String,

    /// `text` or `json`
    pub log_format: String,

    /// Optional topology file applied at startup
    pub seed_path: Option<PathBuf>,

    pub capabilities: Capabilities,

    pub acl: AclConfig,

    pub propagation: PropagationConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8081".to_string(),
            db_path: netmesh_common::default_db_path(),
            master_key: String::new(),
            log_format: "text".to_string(),
            seed_path: None,
            capabilities: Capabilities::default(),
            acl: AclConfig::default(),
            propagation: PropagationConfig::default(),
        }
    }
}

/// ACL configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AclConfig {
    /// Whether deny lists strip egress ranges from `AllowedIPs`
    pub denied_ranges: DeniedRangePolicy,
}

/// Which message bus events go to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    Null,
    Broadcast,
    Webhook,
}

/// Propagation configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// Events buffered before new ones are dead-lettered
    pub queue_capacity: usize,

    /// Concurrent publishes
    pub max_in_flight: usize,

    pub bus: BusKind,

    /// Broker base URL for the webhook bus
    pub webhook_url: Option<String>,

    /// Per-publish timeout for the webhook bus
    pub webhook_timeout_secs: u64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            max_in_flight: 8,
            bus: BusKind::Null,
            webhook_url: None,
            webhook_timeout_secs: 5,
        }
    }
}

impl ServerConfig {
    /// Load configuration from file, or defaults if it does not exist
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn json_logs(&self) -> bool {
        self.log_format.eq_ignore_ascii_case("json")
    }
}
