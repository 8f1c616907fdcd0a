//! Topology seed file
//!
//! Networks, hosts, nodes and network users are owned by other parts of the
//! control plane. For standalone runs and tests they can be loaded from a TOML
//! file at startup:
//!
//! ```toml
//! [[networks]]
//! net_id = "net1"
//! address_range = "10.0.0.0/24"
//! default_acl = "allow"
//! default_keepalive = 25
//!
//! [[hosts]]
//! id = "h1"
//! public_key = "..."
//! endpoint_ip = "203.0.113.5"
//! listen_port = 51821
//!
//! [[nodes]]
//! id = "gw1"
//! host_id = "h1"
//! network = "net1"
//! is_ingress_gateway = true
//! ```

use crate::store::TopologyStore;
use netmesh_common::{Host, Network, NetworkUser, Node};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopologySeed {
    pub networks: Vec<Network>,
    pub hosts: Vec<Host>,
    pub nodes: Vec<Node>,
    pub network_users: Vec<NetworkUser>,
}

impl TopologySeed {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Write every record, replacing existing ones with the same key
    pub fn apply(&self, store: &dyn TopologyStore) -> netmesh_common::Result<()> {
        for network in &self.networks {
            store.put_network(network)?;
        }
        for host in &self.hosts {
            store.put_host(host)?;
        }
        for node in &self.nodes {
            store.put_node(node)?;
        }
        for user in &self.network_users {
            store.put_network_user(user)?;
        }
        info!(
            "Seeded {} networks, {} hosts, {} nodes, {} network users",
            self.networks.len(),
            self.hosts.len(),
            self.nodes.len(),
            self.network_users.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;
    use netmesh_common::AccessLevel;

    const SEED: &str = r#"
[[networks]]
net_id = "net1"
address_range = "10.0.0.0/24"
default_acl = "allow"
default_keepalive = 25

[[hosts]]
id = "h1"
public_key = "HOSTPUB"
endpoint_ip = "203.0.113.5"
listen_port = 51821

[[nodes]]
id = "gw1"
host_id = "h1"
network = "net1"
address = "10.0.0.1"
is_ingress_gateway = true

[[network_users]]
id = "alice"
network = "net1"
access_level = "net_user"
client_limit = 3
"#;

    #[test]
    fn test_load_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seed.toml");
        std::fs::write(&path, SEED).unwrap();

        let seed = TopologySeed::load(&path).unwrap();
        let store = SqliteStore::open_memory().unwrap();
        seed.apply(&store).unwrap();

        let host = store.get_host("h1").unwrap().unwrap();
        assert_eq!(host.mtu, 0);
        assert_eq!(host.endpoint(), "203.0.113.5:51821");

        let node = store.get_node("gw1").unwrap().unwrap();
        assert!(node.is_ingress_gateway);

        let user = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert_eq!(user.access_level, AccessLevel::NetUser);
        assert_eq!(user.client_limit, 3);
    }
}
