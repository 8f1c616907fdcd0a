//! Topology store
//!
//! The engine only needs keyed reads, writes, deletes and prefix
//! enumeration. [`TopologyStore`] is that narrow surface; [`SqliteStore`]
//! implements it on top of the shared key-value table.

use netmesh_common::{
    keys, Database, ExtClient, Host, Network, NetworkUser, Node, Result,
};
use tracing::debug;

/// Keyed access to topology records.
///
/// Each method is atomic for the single key it touches. Nothing spans keys.
pub trait TopologyStore: Send + Sync {
    fn get_network(&self, net_id: &str) -> Result<Option<Network>>;
    fn put_network(&self, network: &Network) -> Result<()>;

    fn get_host(&self, host_id: &str) -> Result<Option<Host>>;
    fn put_host(&self, host: &Host) -> Result<()>;

    fn get_node(&self, node_id: &str) -> Result<Option<Node>>;
    /// Nodes of one network, in key order
    fn list_nodes(&self, network: &str) -> Result<Vec<Node>>;
    fn put_node(&self, node: &Node) -> Result<()>;

    fn get_ext_client(&self, network: &str, client_id: &str) -> Result<Option<ExtClient>>;
    fn list_ext_clients(&self, network: &str) -> Result<Vec<ExtClient>>;
    fn list_all_ext_clients(&self) -> Result<Vec<ExtClient>>;
    /// Write a new client. Returns false if the id is already taken.
    fn insert_ext_client(&self, client: &ExtClient) -> Result<bool>;
    fn save_ext_client(&self, client: &ExtClient) -> Result<()>;
    fn delete_ext_client(&self, network: &str, client_id: &str) -> Result<bool>;

    /// Take `address` for `client_id`. Returns false if it is already leased.
    fn claim_address(&self, network: &str, address: &str, client_id: &str) -> Result<bool>;
    fn release_address(&self, network: &str, address: &str) -> Result<()>;

    /// The returned record carries the store version it was read at.
    fn get_network_user(&self, network: &str, user_id: &str) -> Result<Option<NetworkUser>>;
    /// Every network-scoped record held by one user
    fn list_network_users(&self, user_id: &str) -> Result<Vec<NetworkUser>>;
    fn put_network_user(&self, user: &NetworkUser) -> Result<()>;
    /// Write `user` only if the stored version still equals `user.version`
    /// (or, for version 0, only if no record exists yet).
    fn compare_and_swap_network_user(&self, user: &NetworkUser) -> Result<bool>;
}

/// [`TopologyStore`] backed by the SQLite key-value table
#[derive(Clone)]
pub struct SqliteStore {
    db: Database,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn open_memory() -> Result<Self> {
        Ok(Self::new(Database::open_memory()?))
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl TopologyStore for SqliteStore {
    fn get_network(&self, net_id: &str) -> Result<Option<Network>> {
        self.db.get_json(&keys::network(net_id))
    }

    fn put_network(&self, network: &Network) -> Result<()> {
        self.db.put_json(&keys::network(&network.net_id), network)
    }

    fn get_host(&self, host_id: &str) -> Result<Option<Host>> {
        self.db.get_json(&keys::host(host_id))
    }

    fn put_host(&self, host: &Host) -> Result<()> {
        self.db.put_json(&keys::host(&host.id), host)
    }

    fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
        self.db.get_json(&keys::node(node_id))
    }

    fn list_nodes(&self, network: &str) -> Result<Vec<Node>> {
        let nodes: Vec<Node> = self.db.scan_json(keys::NODE_PREFIX)?;
        Ok(nodes.into_iter().filter(|n| n.network == network).collect())
    }

    fn put_node(&self, node: &Node) -> Result<()> {
        self.db.put_json(&keys::node(&node.id), node)
    }

    fn get_ext_client(&self, network: &str, client_id: &str) -> Result<Option<ExtClient>> {
        self.db.get_json(&keys::ext_client(network, client_id))
    }

    fn list_ext_clients(&self, network: &str) -> Result<Vec<ExtClient>> {
        self.db.scan_json(&keys::ext_clients_in(network))
    }

    fn list_all_ext_clients(&self) -> Result<Vec<ExtClient>> {
        self.db.scan_json(keys::EXT_CLIENT_PREFIX)
    }

    fn insert_ext_client(&self, client: &ExtClient) -> Result<bool> {
        let key = keys::ext_client(&client.network, &client.client_id);
        let inserted = self.db.kv_insert(&key, &serde_json::to_string(client)?)?;
        debug!("insert {} -> {}", key, inserted);
        Ok(inserted)
    }

    fn save_ext_client(&self, client: &ExtClient) -> Result<()> {
        self.db
            .put_json(&keys::ext_client(&client.network, &client.client_id), client)
    }

    fn delete_ext_client(&self, network: &str, client_id: &str) -> Result<bool> {
        self.db.kv_delete(&keys::ext_client(network, client_id))
    }

    fn claim_address(&self, network: &str, address: &str, client_id: &str) -> Result<bool> {
        self.db.kv_insert(&keys::address_lease(network, address), client_id)
    }

    fn release_address(&self, network: &str, address: &str) -> Result<()> {
        self.db.kv_delete(&keys::address_lease(network, address))?;
        Ok(())
    }

    fn get_network_user(&self, network: &str, user_id: &str) -> Result<Option<NetworkUser>> {
        match self.db.kv_get_versioned(&keys::network_user(network, user_id))? {
            Some((value, version)) => {
                let mut user: NetworkUser = serde_json::from_str(&value)?;
                user.version = version;
                Ok(Some(user))
            }
            None => Ok(None),
        }
    }

    fn list_network_users(&self, user_id: &str) -> Result<Vec<NetworkUser>> {
        let users: Vec<NetworkUser> = self.db.scan_json(keys::NETWORK_USER_PREFIX)?;
        Ok(users.into_iter().filter(|u| u.id == user_id).collect())
    }

    fn put_network_user(&self, user: &NetworkUser) -> Result<()> {
        self.db.put_json(&keys::network_user(&user.network, &user.id), user)
    }

    fn compare_and_swap_network_user(&self, user: &NetworkUser) -> Result<bool> {
        let expected = if user.version == 0 {
            None
        } else {
            Some(user.version)
        };
        self.db.kv_compare_and_swap(
            &keys::network_user(&user.network, &user.id),
            expected,
            &serde_json::to_string(user)?,
        )
    }
}
