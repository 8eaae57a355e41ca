use std::path::Path;
use std::sync::Mutex;

use domain::common::entity::{ForwardId, PeerId};
use domain::common::error::DomainError;
use domain::forward::entity::{ForwardRule, NewForward};
use domain::forward::error::ForwardError;
use domain::peer::entity::{NewPeer, Peer};
use domain::peer::error::PeerError;
use ports::secondary::registry_port::RegistryPort;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;

/// redb table: key = peer id, value = JSON-serialized `Peer`.
const PEERS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("peers");

/// redb table: key = forward id, value = JSON-serialized `ForwardRule`.
const FORWARDS_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("forwards");

/// redb table: monotonic id counters. Ids are never reused.
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const NEXT_PEER_ID: &str = "next_peer_id";
const NEXT_FORWARD_ID: &str = "next_forward_id";

fn registry_err<E: std::fmt::Display>(context: &'static str) -> impl FnOnce(E) -> DomainError {
    move |e| DomainError::Registry(format!("{context}: {e}"))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DomainError> {
    serde_json::from_slice(bytes).map_err(registry_err("deserialize"))
}

/// Persistent peer and forward registry backed by redb.
///
/// Every mutation runs in one write transaction, so uniqueness checks,
/// id allocation and the forward cascade commit or roll back together.
pub struct RedbRegistry {
    db: Database,
    /// Serialize writes to prevent concurrent mutation.
    write_lock: Mutex<()>,
}

impl RedbRegistry {
    /// Open (or create) the registry database at `path`.
    pub fn open(path: &Path) -> Result<Self, DomainError> {
        let db = Database::create(path).map_err(registry_err("redb open failed"))?;

        // Ensure the tables exist so read transactions never miss them.
        let txn = db.begin_write().map_err(registry_err("redb txn begin"))?;
        {
            txn.open_table(PEERS_TABLE)
                .map_err(registry_err("redb table create"))?;
            txn.open_table(FORWARDS_TABLE)
                .map_err(registry_err("redb table create"))?;
            txn.open_table(COUNTERS_TABLE)
                .map_err(registry_err("redb table create"))?;
        }
        txn.commit().map_err(registry_err("redb commit"))?;

        tracing::debug!(path = %path.display(), "registry opened");
        Ok(Self {
            db,
            write_lock: Mutex::new(()),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ()>, DomainError> {
        self.write_lock.lock().map_err(registry_err("lock poisoned"))
    }

    fn read_all<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, u64, &'static [u8]>,
    ) -> Result<Vec<T>, DomainError> {
        let txn = self.db.begin_read().map_err(registry_err("redb read txn"))?;
        let table = txn
            .open_table(table)
            .map_err(registry_err("redb read table"))?;
        let mut rows = Vec::new();
        for entry in table.iter().map_err(registry_err("redb iter"))? {
            let (_id, value) = entry.map_err(registry_err("redb iter"))?;
            rows.push(decode(value.value())?);
        }
        Ok(rows)
    }

    fn read_one<T: DeserializeOwned>(
        &self,
        table: TableDefinition<'static, u64, &'static [u8]>,
        id: u64,
    ) -> Result<Option<T>, DomainError> {
        let txn = self.db.begin_read().map_err(registry_err("redb read txn"))?;
        let table = txn
            .open_table(table)
            .map_err(registry_err("redb read table"))?;
        match table.get(id).map_err(registry_err("redb get"))? {
            Some(value) => Ok(Some(decode(value.value())?)),
            None => Ok(None),
        }
    }
}

/// Bump the named counter inside `txn` and return the new value.
fn next_id(txn: &redb::WriteTransaction, counter: &str) -> Result<u64, DomainError> {
    let mut counters = txn
        .open_table(COUNTERS_TABLE)
        .map_err(registry_err("redb write table"))?;
    let current = counters
        .get(counter)
        .map_err(registry_err("redb get"))?
        .map(|v| v.value())
        .unwrap_or(0);
    let next = current + 1;
    counters
        .insert(counter, next)
        .map_err(registry_err("redb insert"))?;
    Ok(next)
}

impl RegistryPort for RedbRegistry {
    fn list_peers(&self) -> Result<Vec<Peer>, DomainError> {
        self.read_all(PEERS_TABLE)
    }

    fn get_peer(&self, id: PeerId) -> Result<Option<Peer>, DomainError> {
        self.read_one(PEERS_TABLE, id.0)
    }

    fn find_peer_by_name(&self, name: &str) -> Result<Option<Peer>, DomainError> {
        Ok(self.list_peers()?.into_iter().find(|p| p.name == name))
    }

    fn insert_peer(&self, peer: NewPeer) -> Result<PeerId, DomainError> {
        let _lock = self.lock()?;

        let txn = self.db.begin_write().map_err(registry_err("redb write txn"))?;
        let id = {
            let mut table = txn
                .open_table(PEERS_TABLE)
                .map_err(registry_err("redb write table"))?;
            for entry in table.iter().map_err(registry_err("redb iter"))? {
                let (_id, value) = entry.map_err(registry_err("redb iter"))?;
                let existing: Peer = decode(value.value())?;
                if existing.name == peer.name {
                    return Err(PeerError::DuplicateName { name: peer.name }.into());
                }
                if existing.tunnel_address == peer.tunnel_address {
                    return Err(PeerError::DuplicateAddress {
                        address: peer.tunnel_address.to_string(),
                    }
                    .into());
                }
                if existing.public_key == peer.keys.public_key {
                    return Err(PeerError::DuplicateKey.into());
                }
            }

            let id = PeerId(next_id(&txn, NEXT_PEER_ID)?);
            let row = serde_json::to_vec(&peer.into_peer(id))
                .map_err(registry_err("serialize"))?;
            table
                .insert(id.0, row.as_slice())
                .map_err(registry_err("redb insert"))?;
            id
        };
        txn.commit().map_err(registry_err("redb write commit"))?;

        Ok(id)
    }

    fn delete_peer(&self, id: PeerId) -> Result<bool, DomainError> {
        let _lock = self.lock()?;

        let txn = self.db.begin_write().map_err(registry_err("redb write txn"))?;
        let (removed, cascaded) = {
            let mut peers = txn
                .open_table(PEERS_TABLE)
                .map_err(registry_err("redb write table"))?;
            let removed = peers
                .remove(id.0)
                .map_err(registry_err("redb remove"))?
                .is_some();

            let mut forwards = txn
                .open_table(FORWARDS_TABLE)
                .map_err(registry_err("redb write table"))?;
            let mut owned = Vec::new();
            for entry in forwards.iter().map_err(registry_err("redb iter"))? {
                let (key, value) = entry.map_err(registry_err("redb iter"))?;
                let rule: ForwardRule = decode(value.value())?;
                if rule.peer_id == id {
                    owned.push(key.value());
                }
            }
            for key in &owned {
                forwards.remove(*key).map_err(registry_err("redb remove"))?;
            }
            (removed, owned.len())
        };
        txn.commit().map_err(registry_err("redb write commit"))?;

        if removed {
            tracing::debug!(peer_id = id.0, forwards = cascaded, "peer row deleted");
        }
        Ok(removed)
    }

    fn list_forwards(&self) -> Result<Vec<ForwardRule>, DomainError> {
        self.read_all(FORWARDS_TABLE)
    }

    fn get_forward(&self, id: ForwardId) -> Result<Option<ForwardRule>, DomainError> {
        self.read_one(FORWARDS_TABLE, id.0)
    }

    fn insert_forward(&self, forward: NewForward) -> Result<ForwardId, DomainError> {
        let _lock = self.lock()?;

        let txn = self.db.begin_write().map_err(registry_err("redb write txn"))?;
        let id = {
            let peers = txn
                .open_table(PEERS_TABLE)
                .map_err(registry_err("redb write table"))?;
            let owner_exists = peers
                .get(forward.peer_id.0)
                .map_err(registry_err("redb get"))?
                .is_some();
            if !owner_exists {
                return Err(PeerError::NotFound {
                    reference: forward.peer_id.to_string(),
                }
                .into());
            }

            let id = ForwardId(next_id(&txn, NEXT_FORWARD_ID)?);
            let row = serde_json::to_vec(&forward.into_rule(id))
                .map_err(registry_err("serialize"))?;
            let mut table = txn
                .open_table(FORWARDS_TABLE)
                .map_err(registry_err("redb write table"))?;
            table
                .insert(id.0, row.as_slice())
                .map_err(registry_err("redb insert"))?;
            id
        };
        txn.commit().map_err(registry_err("redb write commit"))?;

        Ok(id)
    }

    fn delete_forward(&self, id: ForwardId) -> Result<bool, DomainError> {
        let _lock = self.lock()?;

        let txn = self.db.begin_write().map_err(registry_err("redb write txn"))?;
        let removed = {
            let mut table = txn
                .open_table(FORWARDS_TABLE)
                .map_err(registry_err("redb write table"))?;
            table
                .remove(id.0)
                .map_err(registry_err("redb remove"))?
                .is_some()
        };
        txn.commit().map_err(registry_err("redb write commit"))?;

        Ok(removed)
    }

    fn set_forward_enabled(&self, id: ForwardId, enabled: bool) -> Result<(), DomainError> {
        let _lock = self.lock()?;

        let txn = self.db.begin_write().map_err(registry_err("redb write txn"))?;
        {
            let mut table = txn
                .open_table(FORWARDS_TABLE)
                .map_err(registry_err("redb write table"))?;
            let current = table
                .get(id.0)
                .map_err(registry_err("redb get"))?
                .map(|v| v.value().to_vec());
            let Some(bytes) = current else {
                return Err(ForwardError::NotFound { id: id.to_string() }.into());
            };
            let mut rule: ForwardRule = decode(&bytes)?;
            rule.enabled = enabled;
            let row = serde_json::to_vec(&rule).map_err(registry_err("serialize"))?;
            table
                .insert(id.0, row.as_slice())
                .map_err(registry_err("redb insert"))?;
        }
        txn.commit().map_err(registry_err("redb write commit"))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    use domain::common::entity::Protocol;
    use domain::forward::entity::PortMapping;
    use domain::peer::entity::KeyPair;
    use tempfile::NamedTempFile;

    fn make_registry() -> (RedbRegistry, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let registry = RedbRegistry::open(tmp.path()).unwrap();
        (registry, tmp)
    }

    fn new_peer(name: &str, host: u8) -> NewPeer {
        NewPeer {
            name: name.to_string(),
            description: String::new(),
            tunnel_address: Ipv4Addr::new(10, 0, 0, host),
            keys: KeyPair {
                private_key: format!("private-{name}"),
                public_key: format!("public-{name}"),
            },
            created_at: 1_700_000_000,
        }
    }

    fn new_forward(peer_id: PeerId, public_port: u16) -> NewForward {
        NewForward {
            peer_id,
            mapping: PortMapping {
                protocol: Protocol::Tcp,
                public_port,
                peer_address: Ipv4Addr::new(10, 0, 0, 2),
                target_port: 22,
            },
            enabled: true,
            created_at: 1_700_000_000,
        }
    }

    #[test]
    fn insert_and_get_peer() {
        let (registry, _tmp) = make_registry();
        let id = registry.insert_peer(new_peer("laptop", 2)).unwrap();

        let peer = registry.get_peer(id).unwrap().unwrap();
        assert_eq!(peer.name, "laptop");
        assert_eq!(peer.public_key, "public-laptop");
        assert_eq!(
            registry.find_peer_by_name("laptop").unwrap().unwrap().id,
            id
        );
        assert_eq!(
            registry.list_tunnel_addresses().unwrap(),
            vec![Ipv4Addr::new(10, 0, 0, 2)]
        );
    }

    #[test]
    fn duplicate_name_rejected() {
        let (registry, _tmp) = make_registry();
        registry.insert_peer(new_peer("laptop", 2)).unwrap();
        let err = registry.insert_peer(new_peer("laptop", 3)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(registry.list_peers().unwrap().len(), 1);
    }

    #[test]
    fn duplicate_address_and_key_rejected() {
        let (registry, _tmp) = make_registry();
        registry.insert_peer(new_peer("laptop", 2)).unwrap();

        let err = registry.insert_peer(new_peer("phone", 2)).unwrap_err();
        assert!(err.to_string().contains("10.0.0.2"));

        let mut same_key = new_peer("tablet", 4);
        same_key.keys.public_key = "public-laptop".to_string();
        assert!(registry.insert_peer(same_key).is_err());
    }

    #[test]
    fn ids_are_not_reused_after_delete() {
        let (registry, _tmp) = make_registry();
        let first = registry.insert_peer(new_peer("laptop", 2)).unwrap();
        assert!(registry.delete_peer(first).unwrap());
        let second = registry.insert_peer(new_peer("phone", 3)).unwrap();
        assert!(second.0 > first.0);
    }

    #[test]
    fn delete_peer_cascades_forwards() {
        let (registry, _tmp) = make_registry();
        let laptop = registry.insert_peer(new_peer("laptop", 2)).unwrap();
        let phone = registry.insert_peer(new_peer("phone", 3)).unwrap();
        registry.insert_forward(new_forward(laptop, 8022)).unwrap();
        registry.insert_forward(new_forward(laptop, 8080)).unwrap();
        let kept = registry.insert_forward(new_forward(phone, 9000)).unwrap();

        assert!(registry.delete_peer(laptop).unwrap());
        let remaining = registry.list_forwards().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, kept);
        assert!(!registry.delete_peer(laptop).unwrap());
    }

    #[test]
    fn forward_requires_existing_peer() {
        let (registry, _tmp) = make_registry();
        let err = registry
            .insert_forward(new_forward(PeerId(42), 8022))
            .unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn toggle_and_port_availability() {
        let (registry, _tmp) = make_registry();
        let peer = registry.insert_peer(new_peer("laptop", 2)).unwrap();
        let id = registry.insert_forward(new_forward(peer, 8022)).unwrap();

        assert!(!registry.is_port_available(8022, Protocol::Tcp, None).unwrap());
        assert!(registry.is_port_available(8022, Protocol::Udp, None).unwrap());
        assert!(registry.is_port_available(8022, Protocol::Tcp, Some(id)).unwrap());

        registry.set_forward_enabled(id, false).unwrap();
        assert!(!registry.get_forward(id).unwrap().unwrap().enabled);
        assert!(registry.is_port_available(8022, Protocol::Tcp, None).unwrap());
    }

    #[test]
    fn toggle_unknown_forward_is_not_found() {
        let (registry, _tmp) = make_registry();
        assert!(matches!(
            registry.set_forward_enabled(ForwardId(9), true),
            Err(DomainError::NotFound(_))
        ));
    }

    #[test]
    fn rows_survive_reopen() {
        let tmp = NamedTempFile::new().unwrap();
        {
            let registry = RedbRegistry::open(tmp.path()).unwrap();
            let peer = registry.insert_peer(new_peer("laptop", 2)).unwrap();
            registry.insert_forward(new_forward(peer, 8022)).unwrap();
        }
        let registry = RedbRegistry::open(tmp.path()).unwrap();
        assert_eq!(registry.list_peers().unwrap().len(), 1);
        assert_eq!(registry.list_forwards().unwrap()[0].public_port, 8022);
    }
}
