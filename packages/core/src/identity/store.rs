// Хранилище идентичностей: локальное устройство + известные пиры
//
// The peer map lock is held only to find or insert an entry; each entry has
// its own mutex so writes to one peer never wait on another.

use crate::crypto::keys::PublicKeys;
use crate::identity::{DeviceId, DeviceIdentity, PeerDevice};
use crate::protocol::validation::validate_device_id;
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use crate::utils::sync::{lock, read, write};
use crate::utils::time::Clock;
use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, info, warn};

pub struct IdentityStore {
    clock: Arc<dyn Clock>,
    max_device_id_len: usize,
    local: OnceCell<Arc<DeviceIdentity>>,
    peers: RwLock<HashMap<DeviceId, Arc<Mutex<PeerDevice>>>>,
}

impl IdentityStore {
    pub fn new(clock: Arc<dyn Clock>, max_device_id_len: usize) -> Self {
        Self {
            clock,
            max_device_id_len,
            local: OnceCell::new(),
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// This device's identity, generated on first call.
    pub fn local_identity(&self) -> Arc<DeviceIdentity> {
        self.local
            .get_or_init(|| {
                let identity = DeviceIdentity::generate(self.clock.now_millis());
                info!(
                    target: "identity",
                    device = short_id(identity.device_id()),
                    "Generated device identity"
                );
                Arc::new(identity)
            })
            .clone()
    }

    pub fn has_local_identity(&self) -> bool {
        self.local.get().is_some()
    }

    /// Install a restored identity. Fails once an identity exists.
    pub fn install_identity(&self, identity: Arc<DeviceIdentity>) -> Result<()> {
        self.local.set(identity).map_err(|_| {
            PalisadeError::InvalidInput("local identity already initialized".to_string())
        })
    }

    /// Record a peer's public keys on first contact.
    ///
    /// Known peers keep their record; different keys for a known device id
    /// are refused with `KeyMismatch`.
    pub fn remember_peer(&self, device_id: &str, public_keys: PublicKeys) -> Result<PeerDevice> {
        validate_device_id(device_id, self.max_device_id_len)
            .map_err(|_| PalisadeError::InvalidInput(format!("invalid device id {:?}", device_id)))?;
        if self.local.get().is_some_and(|local| local.device_id() == device_id) {
            return Err(PalisadeError::InvalidInput(
                "cannot remember the local device as a peer".to_string(),
            ));
        }

        let entry = {
            let mut peers = write(&self.peers);
            match peers.get(device_id) {
                Some(entry) => entry.clone(),
                None => {
                    let peer = PeerDevice::new(
                        device_id.to_string(),
                        public_keys,
                        self.clock.now_millis(),
                    );
                    debug!(target: "identity", peer = short_id(device_id), "Remembered new peer");
                    peers.insert(device_id.to_string(), Arc::new(Mutex::new(peer.clone())));
                    return Ok(peer);
                }
            }
        };

        let peer = lock(&entry);
        if peer.public_keys != public_keys {
            warn!(target: "identity", peer = short_id(device_id), "Public keys differ from record");
            return Err(PalisadeError::KeyMismatch(device_id.to_string()));
        }
        Ok(peer.clone())
    }

    pub fn lookup_peer(&self, device_id: &str) -> Result<PeerDevice> {
        let entry = self
            .entry(device_id)
            .ok_or_else(|| PalisadeError::UnknownPeer(device_id.to_string()))?;
        let peer = lock(&entry).clone();
        Ok(peer)
    }

    pub fn contains_peer(&self, device_id: &str) -> bool {
        read(&self.peers).contains_key(device_id)
    }

    /// Mutate one peer record under its entry lock.
    pub(crate) fn update_peer<R>(
        &self,
        device_id: &str,
        update: impl FnOnce(&mut PeerDevice) -> R,
    ) -> Result<R> {
        let entry = self
            .entry(device_id)
            .ok_or_else(|| PalisadeError::UnknownPeer(device_id.to_string()))?;
        let mut peer = lock(&entry);
        let result = update(&mut peer);
        peer.updated_at = self.clock.now_millis();
        Ok(result)
    }

    /// Copies of every peer record, ordered by device id.
    pub fn snapshot(&self) -> Vec<PeerDevice> {
        let entries: Vec<_> = read(&self.peers).values().cloned().collect();
        let mut peers: Vec<PeerDevice> = entries.iter().map(|e| lock(e).clone()).collect();
        peers.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        peers
    }

    /// Replace the peer table with persisted records.
    pub fn restore(&self, peers: Vec<PeerDevice>) {
        let restored = peers
            .into_iter()
            .map(|peer| (peer.device_id.clone(), Arc::new(Mutex::new(peer))))
            .collect();
        *write(&self.peers) = restored;
    }

    fn entry(&self, device_id: &str) -> Option<Arc<Mutex<PeerDevice>>> {
        read(&self.peers).get(device_id).cloned()
    }
}

impl std::fmt::Debug for IdentityStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityStore")
            .field("local", &self.local.get().map(|l| l.device_id().to_string()))
            .field("peers", &read(&self.peers).len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trust::TrustState;
    use crate::utils::time::ManualClock;

    fn store() -> IdentityStore {
        IdentityStore::new(Arc::new(ManualClock::new(1_000)), 64)
    }

    fn keys() -> PublicKeys {
        DeviceIdentity::generate(0).public_keys()
    }

    #[test]
    fn test_local_identity_created_once() {
        let store = store();
        assert!(!store.has_local_identity());
        let first = store.local_identity();
        let second = store.local_identity();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.created_at(), 1_000);
    }

    #[test]
    fn test_install_after_generate_fails() {
        let store = store();
        store.local_identity();
        assert!(store.install_identity(Arc::new(DeviceIdentity::generate(0))).is_err());
    }

    #[test]
    fn test_remember_and_lookup() {
        let store = store();
        let peer_keys = keys();
        let peer = store.remember_peer("peer-1", peer_keys).unwrap();
        assert_eq!(peer.trust, TrustState::Unverified);
        assert_eq!(store.lookup_peer("peer-1").unwrap().public_keys, peer_keys);
        assert!(matches!(store.lookup_peer("nobody"), Err(PalisadeError::UnknownPeer(_))));
    }

    #[test]
    fn test_same_keys_are_idempotent() {
        let store = store();
        let peer_keys = keys();
        store.remember_peer("peer-1", peer_keys).unwrap();
        store.update_peer("peer-1", |p| p.trust = TrustState::TofuAccepted).unwrap();
        let again = store.remember_peer("peer-1", peer_keys).unwrap();
        assert_eq!(again.trust, TrustState::TofuAccepted);
    }

    #[test]
    fn test_changed_keys_refused() {
        let store = store();
        store.remember_peer("peer-1", keys()).unwrap();
        assert_eq!(
            store.remember_peer("peer-1", keys()).err(),
            Some(PalisadeError::KeyMismatch("peer-1".to_string()))
        );
    }

    #[test]
    fn test_local_device_is_not_a_peer() {
        let store = store();
        let local = store.local_identity();
        assert!(matches!(
            store.remember_peer(local.device_id(), local.public_keys()),
            Err(PalisadeError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_snapshot_restore() {
        let store = store();
        store.remember_peer("b", keys()).unwrap();
        store.remember_peer("a", keys()).unwrap();
        let snapshot = store.snapshot();
        assert_eq!(snapshot[0].device_id, "a");

        let other = self::store();
        other.restore(snapshot.clone());
        assert_eq!(other.snapshot(), snapshot);
    }
}
