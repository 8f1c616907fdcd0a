//! External client service
//!
//! Orchestrates every ext-client operation: validate, gate, write to the
//! store, then hand events to the propagator. Propagation is submitted
//! synchronously after the write so a cancelled request cannot skip it.

use super::access::{AccessGate, Caller};
use super::acl::{self, AclEngine};
use super::alloc;
use super::names::generate_client_id;
use super::propagate::Propagator;
use super::resolver::{ConfigResolver, PeerConfig};
use super::validate::ExtClientRequest;
use crate::store::TopologyStore;
use netmesh_common::{Error, ExtClient, Network, Node, Result, WgKeyPair};
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Private key stored for clients that brought their own public key
pub const PRIVATE_KEY_PLACEHOLDER: &str = "[ENTER PRIVATE KEY]";

/// Attempts at finding an unused generated id
const GENERATED_ID_ATTEMPTS: usize = 10;

#[derive(Clone)]
pub struct ExtClientService {
    store: Arc<dyn TopologyStore>,
    resolver: ConfigResolver,
    gate: AccessGate,
    propagator: Propagator,
}

impl ExtClientService {
    pub fn new(
        store: Arc<dyn TopologyStore>,
        acl: AclEngine,
        gate: AccessGate,
        propagator: Propagator,
    ) -> Self {
        let resolver = ConfigResolver::new(store.clone(), acl);
        Self {
            store,
            resolver,
            gate,
            propagator,
        }
    }

    pub fn propagator(&self) -> &Propagator {
        &self.propagator
    }

    /// Every client the caller may see, sorted by client id
    pub fn list_visible(&self, caller: &Caller) -> Result<Vec<ExtClient>> {
        let mut clients = match self.gate.visible_networks(caller)? {
            None => self.store.list_all_ext_clients()?,
            Some(memberships) => {
                let mut clients = Vec::new();
                for membership in memberships {
                    clients.extend(self.store.list_ext_clients(&membership.network)?);
                }
                clients
            }
        };
        clients.sort_by(|a, b| {
            a.client_id
                .cmp(&b.client_id)
                .then_with(|| a.network.cmp(&b.network))
        });
        debug!("Listed {} visible clients", clients.len());
        Ok(clients)
    }

    pub fn list_network(&self, caller: &Caller, network: &str) -> Result<Vec<ExtClient>> {
        self.gate.authorize_network(caller, network)?;
        self.store.list_ext_clients(network)
    }

    pub fn get(&self, caller: &Caller, network: &str, client_id: &str) -> Result<ExtClient> {
        let client = self.load(network, client_id)?;
        self.gate.authorize_read(caller, &client)?;
        Ok(client)
    }

    /// Fetch a client and resolve its tunnel config
    pub fn config(&self, caller: &Caller, network: &str, client_id: &str) -> Result<(ExtClient, PeerConfig)> {
        let client = self.get(caller, network, client_id)?;
        let config = self.resolver.resolve(&client)?;
        Ok((client, config))
    }

    /// Create a client attached to ingress gateway `node_id`
    pub fn create(&self, caller: &Caller, network: &str, node_id: &str, req: ExtClientRequest) -> Result<ExtClient> {
        self.gate.admit(caller)?;
        req.validate()?;

        let node = self
            .store
            .get_node(node_id)?
            .filter(|n| n.is_ingress_gateway && n.network == network)
            .ok_or_else(|| Error::not_found("ingress gateway", node_id))?;
        let host = self
            .store
            .get_host(&node.host_id)?
            .ok_or_else(|| Error::not_found("host", &node.host_id))?;
        let net = self
            .store
            .get_network(network)?
            .ok_or_else(|| Error::not_found("network", network))?;

        let client_id = match req.client_id() {
            Some(id) => {
                if self.store.get_ext_client(network, id)?.is_some() {
                    return Err(already_exists(network, id));
                }
                id.to_string()
            }
            None => self.unused_generated_id(network)?,
        };

        let (public_key, private_key) = match req.public_key() {
            Some(key) => (key.to_string(), PRIVATE_KEY_PLACEHOLDER.to_string()),
            None => {
                let kp = WgKeyPair::generate();
                (kp.public_key, kp.private_key)
            }
        };

        let nodes = self.store.list_nodes(network)?;
        let denied_acls = match req.denied_acls.clone() {
            Some(denied) => denied,
            None => acl::default_denied_acls(&net, &nodes, &node.id),
        };

        let reservation = self.gate.reserve_create(caller, network, &client_id)?;
        let (address, address6) = match self.lease_addresses(&net, &nodes, &client_id) {
            Ok(addresses) => addresses,
            Err(e) => {
                if let Some(r) = &reservation {
                    self.gate.release(r);
                }
                return Err(e);
            }
        };

        let client = ExtClient {
            client_id: client_id.clone(),
            public_key,
            private_key,
            address,
            address6,
            dns: req.dns().unwrap_or_default().to_string(),
            extra_allowed_ips: req.extra_allowed_ips.clone().unwrap_or_default(),
            enabled: acl::default_enabled(&net, req.enabled),
            denied_acls,
            owner_id: reservation
                .as_ref()
                .map(|r| r.user_id.clone())
                .unwrap_or_default(),
            ingress_gateway_id: node.id.clone(),
            ingress_gateway_endpoint: host.peer_endpoint(),
            network: network.to_string(),
            last_modified: chrono::Utc::now().timestamp(),
        };

        let inserted = self.store.insert_ext_client(&client);
        if !matches!(inserted, Ok(true)) {
            if let Some(r) = &reservation {
                self.gate.release(r);
            }
            self.release_addresses(&client);
            return match inserted {
                Ok(_) => Err(already_exists(network, &client_id)),
                Err(e) => Err(e),
            };
        }

        self.propagator.on_create(&client);
        info!(
            "Created ext client {}/{} on {} at {}",
            network, client.client_id, node.id, client.address
        );
        Ok(client)
    }

    pub fn update(&self, caller: &Caller, network: &str, client_id: &str, req: ExtClientRequest) -> Result<ExtClient> {
        self.gate.admit(caller)?;
        req.validate()?;

        let old = self.load(network, client_id)?;
        self.gate.authorize_mutation(caller, &old)?;

        let mut new = old.clone();
        if let Some(id) = req.client_id() {
            new.client_id = id.to_string();
        }
        if let Some(key) = req.public_key() {
            if key != old.public_key {
                new.public_key = key.to_string();
                new.private_key = PRIVATE_KEY_PLACEHOLDER.to_string();
            }
        }
        if let Some(ranges) = &req.extra_allowed_ips {
            new.extra_allowed_ips = ranges.clone();
        }
        if let Some(dns) = &req.dns {
            new.dns = dns.trim().to_string();
        }
        if let Some(enabled) = req.enabled {
            new.enabled = enabled;
        }
        if let Some(denied) = &req.denied_acls {
            new.denied_acls = denied.clone();
        }
        new.last_modified = chrono::Utc::now().timestamp();

        let renamed = new.client_id != old.client_id;
        if renamed {
            if !self.store.insert_ext_client(&new)? {
                return Err(already_exists(network, &new.client_id));
            }
            if let Err(e) = self.store.delete_ext_client(network, &old.client_id) {
                if let Err(undo) = self.store.delete_ext_client(network, &new.client_id) {
                    warn!("Failed to undo rename of {}/{}: {}", network, old.client_id, undo);
                }
                return Err(e);
            }
            if old.is_owned() {
                self.gate
                    .transfer(&old.owner_id, network, &old.client_id, &new.client_id);
            }
        } else {
            self.store.save_ext_client(&new)?;
        }

        let peer_affecting = acl::is_peer_affecting(&old, &new);
        self.propagator.on_update(&old, &new, peer_affecting);

        if renamed {
            info!("Renamed ext client {}/{} -> {}", network, old.client_id, new.client_id);
        } else {
            info!("Updated ext client {}/{}", network, new.client_id);
        }
        Ok(new)
    }

    /// Delete a client. The ingress gateway need not exist any more.
    pub fn delete(&self, caller: &Caller, network: &str, client_id: &str) -> Result<ExtClient> {
        self.gate.admit(caller)?;
        let client = self.load(network, client_id)?;
        self.gate.authorize_mutation(caller, &client)?;

        if client.is_owned() {
            self.gate.dissociate(&client.owner_id, network, &client.client_id);
        }
        if !self.store.delete_ext_client(network, client_id)? {
            return Err(Error::not_found("ext client", client_id));
        }
        self.release_addresses(&client);

        self.propagator.on_delete(&client);
        info!("Deleted ext client {}/{}", network, client_id);
        Ok(client)
    }

    /// First free v4 and v6 addresses, each held under its own lease key so
    /// concurrent creates never share one.
    fn lease_addresses(&self, net: &Network, nodes: &[Node], client_id: &str) -> Result<(String, String)> {
        let existing = self.store.list_ext_clients(&net.net_id)?;
        let mut used = alloc::used_addresses(nodes, &existing);

        let address = self.lease(&net.net_id, client_id, &mut used, |used| {
            alloc::allocate_v4(&net.address_range, used)
        })?;
        let address6 = self.lease(&net.net_id, client_id, &mut used, |used| {
            alloc::allocate_v6(&net.address_range6, used)
        });
        match address6 {
            Ok(address6) => Ok((address, address6)),
            Err(e) => {
                if !address.is_empty() {
                    self.release_address(&net.net_id, &address);
                }
                Err(e)
            }
        }
    }

    fn lease(
        &self,
        network: &str,
        client_id: &str,
        used: &mut HashSet<IpAddr>,
        allocate: impl Fn(&HashSet<IpAddr>) -> Result<String>,
    ) -> Result<String> {
        loop {
            let address = allocate(used)?;
            if address.is_empty() || self.store.claim_address(network, &address, client_id)? {
                return Ok(address);
            }
            debug!("Address {} in {} is leased, trying the next one", address, network);
            let ip = address
                .parse()
                .map_err(|_| Error::internal(format!("allocated invalid address {}", address)))?;
            used.insert(ip);
        }
    }

    fn release_addresses(&self, client: &ExtClient) {
        for address in [&client.address, &client.address6] {
            if !address.is_empty() {
                self.release_address(&client.network, address);
            }
        }
    }

    fn release_address(&self, network: &str, address: &str) {
        if let Err(e) = self.store.release_address(network, address) {
            warn!("Failed to release address {} in {}: {}", address, network, e);
        }
    }

    fn load(&self, network: &str, client_id: &str) -> Result<ExtClient> {
        self.store
            .get_ext_client(network, client_id)?
            .ok_or_else(|| Error::not_found("ext client", client_id))
    }

    fn unused_generated_id(&self, network: &str) -> Result<String> {
        for _ in 0..GENERATED_ID_ATTEMPTS {
            let id = generate_client_id();
            if self.store.get_ext_client(network, &id)?.is_none() {
                return Ok(id);
            }
        }
        Err(Error::internal("could not generate an unused client id"))
    }
}

fn already_exists(network: &str, client_id: &str) -> Error {
    Error::bad_request(format!("client {} already exists on network {}", client_id, network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extclient::access::Capabilities;
    use crate::extclient::acl::tests::{egress_node, network, node};
    use crate::extclient::bus::{BroadcastBus, Event, Topic};
    use crate::store::SqliteStore;
    use netmesh_common::{AccessLevel, ErrorKind, Host, NetworkUser, Node};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast;

    struct Fixture {
        store: Arc<SqliteStore>,
        service: ExtClientService,
        events: broadcast::Receiver<Event>,
    }

    impl Fixture {
        fn new(default_acl: &str, multi_tenant: bool) -> Self {
            let store = Arc::new(SqliteStore::open_memory().unwrap());
            Self::over(store.clone(), store, default_acl, multi_tenant)
        }

        /// Seed `store` and run the service on `engine_store`, which may wrap it
        fn over(
            store: Arc<SqliteStore>,
            engine_store: Arc<dyn TopologyStore>,
            default_acl: &str,
            multi_tenant: bool,
        ) -> Self {
            store.put_network(&network(default_acl)).unwrap();
            store
                .put_host(&Host {
                    id: "h1".into(),
                    name: "gateway".into(),
                    public_key: WgKeyPair::generate().public_key,
                    endpoint_ip: "203.0.113.5".parse().unwrap(),
                    listen_port: 51821,
                    proxy_enabled: false,
                    proxy_listen_port: 0,
                    mtu: 0,
                })
                .unwrap();
            store
                .put_node(&Node {
                    host_id: "h1".into(),
                    address: "10.0.0.1".into(),
                    is_ingress_gateway: true,
                    ..node("gw1")
                })
                .unwrap();

            let bus = Arc::new(BroadcastBus::new(64));
            let events = bus.subscribe();
            let (propagator, _worker) = Propagator::spawn(bus, 64, 4);
            let gate = AccessGate::new(engine_store.clone(), Capabilities { multi_tenant });
            let service = ExtClientService::new(engine_store, AclEngine::default(), gate, propagator);
            Self {
                store,
                service,
                events,
            }
        }

        fn add_user(&self, id: &str, level: AccessLevel, limit: usize) {
            self.store
                .put_network_user(&NetworkUser {
                    id: id.into(),
                    network: "net1".into(),
                    access_level: level,
                    client_limit: limit,
                    clients: vec![],
                    version: 0,
                })
                .unwrap();
        }

        async fn next_topics(&mut self, n: usize) -> Vec<Topic> {
            let mut topics = Vec::new();
            for _ in 0..n {
                let event = tokio::time::timeout(std::time::Duration::from_secs(5), self.events.recv())
                    .await
                    .unwrap()
                    .unwrap();
                topics.push(event.topic());
            }
            topics.sort_by_key(|t| t.as_str());
            topics
        }
    }

    fn named(id: &str) -> ExtClientRequest {
        ExtClientRequest {
            client_id: Some(id.into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_defaults() {
        let mut f = Fixture::new("allow", false);
        let c = f.service.create(&Caller::Admin, "net1", "gw1", named("cli1")).unwrap();

        assert!(c.enabled);
        assert_eq!(c.address, "10.0.0.2");
        assert_eq!(c.ingress_gateway_endpoint, "203.0.113.5:51821");
        assert!(c.denied_acls.is_empty());
        assert!(!c.is_owned());
        assert_eq!(c.private_key.len(), 44);

        assert_eq!(f.next_topics(2).await, vec![Topic::DnsCreate, Topic::PeersUpdate]);
    }

    #[tokio::test]
    async fn test_create_on_deny_network() {
        let f = Fixture::new("deny", false);
        f.store.put_node(&egress_node("n2", &["192.168.0.0/24"])).unwrap();

        let req = ExtClientRequest {
            public_key: Some(WgKeyPair::generate().public_key),
            ..Default::default()
        };
        let c = f.service.create(&Caller::Admin, "net1", "gw1", req).unwrap();
        assert!(!c.enabled);
        assert_eq!(c.private_key, PRIVATE_KEY_PLACEHOLDER);
        assert_eq!(c.denied_acls.iter().collect::<Vec<_>>(), vec!["n2"]);
        assert_eq!(c.client_id.split('-').count(), 3);
    }

    #[tokio::test]
    async fn test_create_rejections() {
        let f = Fixture::new("allow", false);
        f.store.put_node(&node("plain")).unwrap();

        let missing = f.service.create(&Caller::Admin, "net1", "nope", named("a"));
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);

        let not_gateway = f.service.create(&Caller::Admin, "net1", "plain", named("a"));
        assert_eq!(not_gateway.unwrap_err().kind(), ErrorKind::NotFound);

        let wrong_net = f.service.create(&Caller::Admin, "net2", "gw1", named("a"));
        assert_eq!(wrong_net.unwrap_err().kind(), ErrorKind::NotFound);

        let bad = f.service.create(&Caller::Admin, "net1", "gw1", named("bad id"));
        assert_eq!(bad.unwrap_err().kind(), ErrorKind::BadRequest);

        f.service.create(&Caller::Admin, "net1", "gw1", named("dup")).unwrap();
        let dup = f.service.create(&Caller::Admin, "net1", "gw1", named("dup"));
        assert_eq!(dup.unwrap_err().kind(), ErrorKind::BadRequest);
    }

    #[tokio::test]
    async fn test_user_quota_and_ownership() {
        let f = Fixture::new("allow", true);
        f.add_user("alice", AccessLevel::NetUser, 2);
        let alice = Caller::User("alice".into());

        let c = f.service.create(&alice, "net1", "gw1", named("a1")).unwrap();
        assert_eq!(c.owner_id, "alice");
        f.service.create(&alice, "net1", "gw1", named("a2")).unwrap();

        let err = f.service.create(&alice, "net1", "gw1", named("a3")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert!(f.store.get_ext_client("net1", "a3").unwrap().is_none());

        // Deleting frees quota
        f.service.delete(&alice, "net1", "a1").unwrap();
        f.service.create(&alice, "net1", "gw1", named("a3")).unwrap();
        let user = f.store.get_network_user("net1", "alice").unwrap().unwrap();
        assert_eq!(user.clients, vec!["a2".to_string(), "a3".to_string()]);
    }

    #[tokio::test]
    async fn test_users_only_touch_their_own() {
        let f = Fixture::new("allow", true);
        f.add_user("alice", AccessLevel::NetUser, 5);
        f.add_user("bob", AccessLevel::NetUser, 5);
        f.service
            .create(&Caller::User("alice".into()), "net1", "gw1", named("mine"))
            .unwrap();

        let bob = Caller::User("bob".into());
        assert_eq!(f.service.get(&bob, "net1", "mine").unwrap_err().kind(), ErrorKind::Forbidden);
        assert_eq!(
            f.service.update(&bob, "net1", "mine", ExtClientRequest::default()).unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(f.service.delete(&bob, "net1", "mine").unwrap_err().kind(), ErrorKind::Forbidden);

        assert_eq!(f.service.list_visible(&bob).unwrap().len(), 1);
        assert_eq!(
            f.service.list_visible(&Caller::User("eve".into())).unwrap().len(),
            0
        );
    }

    #[tokio::test]
    async fn test_rename_moves_record_and_ownership() {
        let mut f = Fixture::new("allow", true);
        f.add_user("alice", AccessLevel::NetUser, 5);
        let alice = Caller::User("alice".into());
        f.service.create(&alice, "net1", "gw1", named("old")).unwrap();
        f.next_topics(2).await;

        let renamed = f.service.update(&alice, "net1", "old", named("new")).unwrap();
        assert_eq!(renamed.client_id, "new");
        assert!(f.store.get_ext_client("net1", "old").unwrap().is_none());
        assert!(f.store.get_ext_client("net1", "new").unwrap().is_some());

        let user = f.store.get_network_user("net1", "alice").unwrap().unwrap();
        assert_eq!(user.clients, vec!["new".to_string()]);

        match f.events.recv().await.unwrap() {
            Event::DnsReplace { old, new } => {
                assert_eq!(old.client_id, "old");
                assert_eq!(new.client_id, "new");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_update_fields() {
        let mut f = Fixture::new("allow", false);
        f.service.create(&Caller::Admin, "net1", "gw1", named("c")).unwrap();
        f.next_topics(2).await;

        let req = ExtClientRequest {
            enabled: Some(false),
            dns: Some("1.1.1.1".into()),
            public_key: Some(WgKeyPair::generate().public_key),
            ..Default::default()
        };
        let updated = f.service.update(&Caller::Admin, "net1", "c", req).unwrap();
        assert!(!updated.enabled);
        assert_eq!(updated.dns, "1.1.1.1");
        assert_eq!(updated.private_key, PRIVATE_KEY_PLACEHOLDER);
        assert_eq!(f.next_topics(1).await, vec![Topic::PeersUpdate]);

        let missing = f.service.update(&Caller::Admin, "net1", "ghost", ExtClientRequest::default());
        assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_without_gateway() {
        let mut f = Fixture::new("allow", false);
        f.service.create(&Caller::Admin, "net1", "gw1", named("c")).unwrap();
        f.next_topics(2).await;

        let db = f.store.database();
        db.kv_delete(&netmesh_common::keys::node("gw1")).unwrap();

        f.service.delete(&Caller::Admin, "net1", "c").unwrap();
        assert_eq!(f.next_topics(2).await, vec![Topic::DnsDelete, Topic::PeersUpdate]);
        assert_eq!(
            f.service.get(&Caller::Admin, "net1", "c").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_list_visible_is_sorted() {
        let f = Fixture::new("allow", false);
        for id in ["zeta", "alpha", "mid"] {
            f.service.create(&Caller::Admin, "net1", "gw1", named(id)).unwrap();
        }
        let ids: Vec<String> = f
            .service
            .list_visible(&Caller::Admin)
            .unwrap()
            .into_iter()
            .map(|c| c.client_id)
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    /// Store whose ext-client deletes fail while `fail_deletes` is set
    struct FailingDeletes {
        inner: Arc<SqliteStore>,
        fail_deletes: AtomicBool,
    }

    impl TopologyStore for FailingDeletes {
        fn get_network(&self, net_id: &str) -> Result<Option<netmesh_common::Network>> {
            self.inner.get_network(net_id)
        }
        fn put_network(&self, network: &netmesh_common::Network) -> Result<()> {
            self.inner.put_network(network)
        }
        fn get_host(&self, host_id: &str) -> Result<Option<Host>> {
            self.inner.get_host(host_id)
        }
        fn put_host(&self, host: &Host) -> Result<()> {
            self.inner.put_host(host)
        }
        fn get_node(&self, node_id: &str) -> Result<Option<Node>> {
            self.inner.get_node(node_id)
        }
        fn list_nodes(&self, network: &str) -> Result<Vec<Node>> {
            self.inner.list_nodes(network)
        }
        fn put_node(&self, node: &Node) -> Result<()> {
            self.inner.put_node(node)
        }
        fn get_ext_client(&self, network: &str, client_id: &str) -> Result<Option<ExtClient>> {
            self.inner.get_ext_client(network, client_id)
        }
        fn list_ext_clients(&self, network: &str) -> Result<Vec<ExtClient>> {
            self.inner.list_ext_clients(network)
        }
        fn list_all_ext_clients(&self) -> Result<Vec<ExtClient>> {
            self.inner.list_all_ext_clients()
        }
        fn insert_ext_client(&self, client: &ExtClient) -> Result<bool> {
            self.inner.insert_ext_client(client)
        }
        fn save_ext_client(&self, client: &ExtClient) -> Result<()> {
            self.inner.save_ext_client(client)
        }
        fn delete_ext_client(&self, network: &str, client_id: &str) -> Result<bool> {
            if self.fail_deletes.load(Ordering::SeqCst) && client_id == "old" {
                return Err(Error::internal("disk on fire"));
            }
            self.inner.delete_ext_client(network, client_id)
        }
        fn claim_address(&self, network: &str, address: &str, client_id: &str) -> Result<bool> {
            self.inner.claim_address(network, address, client_id)
        }
        fn release_address(&self, network: &str, address: &str) -> Result<()> {
            self.inner.release_address(network, address)
        }
        fn get_network_user(&self, network: &str, user_id: &str) -> Result<Option<NetworkUser>> {
            self.inner.get_network_user(network, user_id)
        }
        fn list_network_users(&self, user_id: &str) -> Result<Vec<NetworkUser>> {
            self.inner.list_network_users(user_id)
        }
        fn put_network_user(&self, user: &NetworkUser) -> Result<()> {
            self.inner.put_network_user(user)
        }
        fn compare_and_swap_network_user(&self, user: &NetworkUser) -> Result<bool> {
            self.inner.compare_and_swap_network_user(user)
        }
    }

    #[tokio::test]
    async fn test_failed_rename_leaves_only_old_record() {
        let sqlite = Arc::new(SqliteStore::open_memory().unwrap());
        let failing = Arc::new(FailingDeletes {
            inner: sqlite.clone(),
            fail_deletes: AtomicBool::new(false),
        });
        let mut f = Fixture::over(sqlite, failing.clone(), "allow", false);
        f.service.create(&Caller::Admin, "net1", "gw1", named("old")).unwrap();
        f.next_topics(2).await;

        failing.fail_deletes.store(true, Ordering::SeqCst);
        let err = f.service.update(&Caller::Admin, "net1", "old", named("new")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        assert!(f.store.get_ext_client("net1", "old").unwrap().is_some());
        assert!(f.store.get_ext_client("net1", "new").unwrap().is_none());
        assert!(f.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_leased_address_is_skipped_and_released() {
        let f = Fixture::new("allow", false);
        assert!(f.store.claim_address("net1", "10.0.0.2", "elsewhere").unwrap());

        let c = f.service.create(&Caller::Admin, "net1", "gw1", named("a")).unwrap();
        assert_eq!(c.address, "10.0.0.3");
        assert!(!f.store.claim_address("net1", "10.0.0.3", "other").unwrap());

        f.service.delete(&Caller::Admin, "net1", "a").unwrap();
        assert!(f.store.claim_address("net1", "10.0.0.3", "other").unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_creates_get_distinct_addresses() {
        let f = Fixture::new("allow", false);
        let service = Arc::new(f.service.clone());
        let handles: Vec<_> = (0..16)
            .map(|i| {
                let service = service.clone();
                std::thread::spawn(move || {
                    service
                        .create(&Caller::Admin, "net1", "gw1", named(&format!("c{}", i)))
                        .unwrap()
                        .address
                })
            })
            .collect();
        let addresses: HashSet<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(addresses.len(), 16);
    }
}
