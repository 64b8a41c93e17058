// Модели данных для хранилища
//
// Только публичные данные и запечатанные приватные ключи. Сессионные ключи
// сюда не попадают никогда.

use crate::crypto::keys::PublicKeys;
use crate::identity::{DeviceId, PeerDevice};
use crate::trust::TrustedRoot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const STATE_VERSION: u32 = 1;

/// Приватные ключи устройства, зашифрованные паролем
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub device_id: String,
    pub created_at: u64,
    pub public_keys: PublicKeys,
    pub salt: Vec<u8>,
    pub iterations: u32,
    pub nonce: Vec<u8>,
    /// AES-256-GCM over the bincode of the private keys
    pub ciphertext: Vec<u8>,
}

/// Everything `SecureCore::save_state` writes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub identity: Option<StoredIdentity>,
    #[serde(default)]
    pub peers: Vec<PeerDevice>,
    #[serde(default)]
    pub trusted_roots: Vec<TrustedRoot>,
    /// Next outbound epoch per peer; epoch numbers never repeat across restarts
    #[serde(default)]
    pub next_epochs: BTreeMap<DeviceId, u64>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            identity: None,
            peers: Vec::new(),
            trusted_roots: Vec::new(),
            next_epochs: BTreeMap::new(),
        }
    }
}
