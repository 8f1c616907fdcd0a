//! Access control gate
//!
//! Administrators bypass every check. Everyone else is scoped by their
//! per-network [`NetworkUser`] record: access level, owned client ids and
//! client quota.
//!
//! Quota reservation is a read-modify-write on one record. It runs as a
//! versioned compare-and-swap with a bounded number of retries, so concurrent
//! creations by the same user can never push them past their limit.

use crate::store::TopologyStore;
use netmesh_common::{Error, ExtClient, NetworkUser, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts before a contended reservation gives up
pub const MAX_CAS_ATTEMPTS: usize = 5;

/// Who is making a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Admin,
    User(String),
}

impl Caller {
    pub fn is_admin(&self) -> bool {
        matches!(self, Caller::Admin)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Caller::Admin => None,
            Caller::User(id) => Some(id),
        }
    }
}

/// Feature switches fixed at startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Lets non-admin users manage their own clients
    #[serde(default)]
    pub multi_tenant: bool,
}

/// Ownership recorded by a successful reservation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub user_id: String,
    pub network: String,
    pub client_id: String,
}

#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn TopologyStore>,
    capabilities: Capabilities,
}

impl AccessGate {
    pub fn new(store: Arc<dyn TopologyStore>, capabilities: Capabilities) -> Self {
        Self {
            store,
            capabilities,
        }
    }

    /// Reject non-admin callers outright when multi-tenancy is off.
    pub fn admit(&self, caller: &Caller) -> Result<()> {
        if caller.is_admin() || self.capabilities.multi_tenant {
            Ok(())
        } else {
            Err(Error::forbidden("multi-tenant access is disabled"))
        }
    }

    /// Check quota and record `client_id` as owned by the caller.
    ///
    /// Returns `None` for administrators, who own nothing.
    pub fn reserve_create(&self, caller: &Caller, network: &str, client_id: &str) -> Result<Option<Reservation>> {
        self.admit(caller)?;
        let user_id = match caller.user_id() {
            None => return Ok(None),
            Some(id) => id,
        };

        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let mut user = self.require_user(network, user_id)?;
            if !user.access_level.can_provision() {
                return Err(Error::forbidden(format!(
                    "user {} has no access to network {}",
                    user_id, network
                )));
            }
            if !user.under_quota() {
                return Err(Error::forbidden(format!(
                    "user {} reached the client limit ({}) on network {}",
                    user_id, user.client_limit, network
                )));
            }
            user.associate(client_id);

            if self.store.compare_and_swap_network_user(&user)? {
                debug!(
                    "Reserved {} for {} on {} (attempt {})",
                    client_id, user_id, network, attempt
                );
                return Ok(Some(Reservation {
                    user_id: user_id.to_string(),
                    network: network.to_string(),
                    client_id: client_id.to_string(),
                }));
            }
            debug!("Reservation for {} on {} lost a race, retrying", user_id, network);
        }

        Err(Error::Conflict {
            key: netmesh_common::keys::network_user(network, user_id),
        })
    }

    /// Undo a reservation whose client was never written.
    pub fn release(&self, reservation: &Reservation) {
        self.dissociate(&reservation.user_id, &reservation.network, &reservation.client_id);
    }

    /// Gate for update and delete
    pub fn authorize_mutation(&self, caller: &Caller, client: &ExtClient) -> Result<()> {
        self.authorize(caller, client)
    }

    /// Gate for reading one client or its config
    pub fn authorize_read(&self, caller: &Caller, client: &ExtClient) -> Result<()> {
        self.authorize(caller, client)
    }

    fn authorize(&self, caller: &Caller, client: &ExtClient) -> Result<()> {
        self.admit(caller)?;
        let user_id = match caller.user_id() {
            None => return Ok(()),
            Some(id) => id,
        };
        let user = self
            .store
            .get_network_user(&client.network, user_id)?
            .ok_or_else(|| no_record(user_id, &client.network))?;

        if user.access_level.is_net_admin() || user.owns(&client.client_id) {
            Ok(())
        } else {
            Err(Error::forbidden(format!(
                "user {} does not own client {}",
                user_id, client.client_id
            )))
        }
    }

    /// Gate for listing one network
    pub fn authorize_network(&self, caller: &Caller, network: &str) -> Result<()> {
        self.admit(caller)?;
        match caller.user_id() {
            None => Ok(()),
            Some(user_id) => {
                let user = self.require_user(network, user_id)?;
                if user.access_level.has_access() {
                    Ok(())
                } else {
                    Err(no_record(user_id, network))
                }
            }
        }
    }

    /// Networks whose clients the caller may list. `None` means all of them.
    pub fn visible_networks(&self, caller: &Caller) -> Result<Option<Vec<NetworkUser>>> {
        self.admit(caller)?;
        match caller.user_id() {
            None => Ok(None),
            Some(user_id) => Ok(Some(
                self.store
                    .list_network_users(user_id)?
                    .into_iter()
                    .filter(|u| u.access_level.has_access())
                    .collect(),
            )),
        }
    }

    /// Move ownership of a renamed client. Best effort.
    pub fn transfer(&self, owner_id: &str, network: &str, old_id: &str, new_id: &str) {
        self.modify_user(owner_id, network, |user| {
            let removed = user.dissociate(old_id);
            let added = user.associate(new_id);
            removed || added
        });
    }

    /// Drop ownership of a deleted client. Best effort.
    pub fn dissociate(&self, owner_id: &str, network: &str, client_id: &str) {
        self.modify_user(owner_id, network, |user| user.dissociate(client_id));
    }

    fn modify_user<F>(&self, user_id: &str, network: &str, mut change: F)
    where
        F: FnMut(&mut NetworkUser) -> bool,
    {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let mut user = match self.store.get_network_user(network, user_id) {
                Ok(Some(user)) => user,
                Ok(None) => {
                    warn!("No network user {} on {} to update", user_id, network);
                    return;
                }
                Err(e) => {
                    warn!("Failed to load network user {} on {}: {}", user_id, network, e);
                    return;
                }
            };
            if !change(&mut user) {
                return;
            }
            match self.store.compare_and_swap_network_user(&user) {
                Ok(true) => return,
                Ok(false) => continue,
                Err(e) => {
                    warn!("Failed to save network user {} on {}: {}", user_id, network, e);
                    return;
                }
            }
        }
        warn!(
            "Gave up updating network user {} on {} after {} attempts",
            user_id, network, MAX_CAS_ATTEMPTS
        );
    }

    fn require_user(&self, network: &str, user_id: &str) -> Result<NetworkUser> {
        self.store
            .get_network_user(network, user_id)?
            .ok_or_else(|| no_record(user_id, network))
    }
}

fn no_record(user_id: &str, network: &str) -> Error {
    Error::forbidden(format!("user {} has no access to network {}", user_id, network))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extclient::acl::tests::client;
    use crate::store::SqliteStore;
    use netmesh_common::{AccessLevel, ErrorKind};

    fn gate(multi_tenant: bool) -> (Arc<SqliteStore>, AccessGate) {
        let store = Arc::new(SqliteStore::open_memory().unwrap());
        let gate = AccessGate::new(store.clone(), Capabilities { multi_tenant });
        (store, gate)
    }

    fn user(id: &str, level: AccessLevel, limit: usize, clients: &[&str]) -> NetworkUser {
        NetworkUser {
            id: id.into(),
            network: "net1".into(),
            access_level: level,
            client_limit: limit,
            clients: clients.iter().map(|c| c.to_string()).collect(),
            version: 0,
        }
    }

    fn alice() -> Caller {
        Caller::User("alice".into())
    }

    #[test]
    fn test_admin_bypasses_everything() {
        let (_, gate) = gate(false);
        assert_eq!(gate.reserve_create(&Caller::Admin, "net1", "c1").unwrap(), None);
        assert!(gate.authorize_mutation(&Caller::Admin, &client(&[])).is_ok());
        assert!(gate.visible_networks(&Caller::Admin).unwrap().is_none());
    }

    #[test]
    fn test_single_tenant_rejects_users() {
        let (store, gate) = gate(false);
        store.put_network_user(&user("alice", AccessLevel::NetAdmin, 10, &[])).unwrap();
        let err = gate.reserve_create(&alice(), "net1", "c1").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_reserve_records_ownership() {
        let (store, gate) = gate(true);
        store.put_network_user(&user("alice", AccessLevel::NetUser, 2, &[])).unwrap();

        let r = gate.reserve_create(&alice(), "net1", "c1").unwrap().unwrap();
        assert_eq!(r.user_id, "alice");

        let stored = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert_eq!(stored.clients, vec!["c1".to_string()]);
    }

    #[test]
    fn test_quota_rejects_full_user() {
        let (store, gate) = gate(true);
        store
            .put_network_user(&user("alice", AccessLevel::NetUser, 3, &["a", "b", "c"]))
            .unwrap();
        let err = gate.reserve_create(&alice(), "net1", "d").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }

    #[test]
    fn test_net_admin_ignores_quota_but_owns() {
        let (store, gate) = gate(true);
        store
            .put_network_user(&user("alice", AccessLevel::NetAdmin, 1, &["a"]))
            .unwrap();
        assert!(gate.reserve_create(&alice(), "net1", "b").unwrap().is_some());
        let stored = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert!(stored.owns("b"));
    }

    #[test]
    fn test_no_access_and_missing_user() {
        let (store, gate) = gate(true);
        assert_eq!(
            gate.reserve_create(&alice(), "net1", "c1").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        store.put_network_user(&user("alice", AccessLevel::NoAccess, 5, &[])).unwrap();
        assert_eq!(
            gate.reserve_create(&alice(), "net1", "c1").unwrap_err().kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn test_authorize_mutation() {
        let (store, gate) = gate(true);
        store.put_network_user(&user("alice", AccessLevel::NetUser, 5, &["cli1"])).unwrap();
        store.put_network_user(&user("bob", AccessLevel::NetUser, 5, &[])).unwrap();
        store.put_network_user(&user("carol", AccessLevel::NetAdmin, 5, &[])).unwrap();

        let c = client(&[]);
        assert!(gate.authorize_mutation(&alice(), &c).is_ok());
        assert!(gate.authorize_mutation(&Caller::User("carol".into()), &c).is_ok());
        assert_eq!(
            gate.authorize_mutation(&Caller::User("bob".into()), &c).unwrap_err().kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            gate.authorize_read(&Caller::User("dave".into()), &c).unwrap_err().kind(),
            ErrorKind::Forbidden
        );
    }

    #[test]
    fn test_transfer_and_dissociate() {
        let (store, gate) = gate(true);
        store.put_network_user(&user("alice", AccessLevel::NetUser, 5, &["old"])).unwrap();

        gate.transfer("alice", "net1", "old", "new");
        let stored = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert_eq!(stored.clients, vec!["new".to_string()]);

        gate.dissociate("alice", "net1", "new");
        let stored = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert!(stored.clients.is_empty());

        // Missing users are logged, not fatal
        gate.dissociate("ghost", "net1", "new");
    }

    #[test]
    fn test_visible_networks() {
        let (store, gate) = gate(true);
        store.put_network_user(&user("alice", AccessLevel::NetUser, 5, &[])).unwrap();
        store
            .put_network_user(&NetworkUser {
                network: "net2".into(),
                ..user("alice", AccessLevel::NoAccess, 5, &[])
            })
            .unwrap();

        let visible = gate.visible_networks(&alice()).unwrap().unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].network, "net1");
    }

    #[test]
    fn test_concurrent_reservations_respect_quota() {
        let (store, gate) = gate(true);
        store.put_network_user(&user("alice", AccessLevel::NetUser, 3, &[])).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = gate.clone();
                std::thread::spawn(move || gate.reserve_create(&alice(), "net1", &format!("c{}", i)))
            })
            .collect();
        let granted = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|r| matches!(r, Ok(Some(_))))
            .count();

        let stored = store.get_network_user("net1", "alice").unwrap().unwrap();
        assert!(granted <= 3);
        assert_eq!(stored.clients.len(), granted);
    }
}
