//! Device identities: this device's long-term keys and the peers it knows.

pub mod store;

pub use store::IdentityStore;

use crate::crypto::keys::{
    DeviceKeyPairs, Fingerprint, PrivateKeys, PublicKeys, SecretBytes, KEY_LENGTH,
};
use crate::trust::TrustState;
use crate::utils::b64;
use crate::utils::error::{PalisadeError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Device identifier (UUID v4 for locally generated identities).
pub type DeviceId = String;

/// This device's long-term identity.
///
/// Immutable once created. Not `Clone`: share it behind an `Arc`.
pub struct DeviceIdentity {
    device_id: DeviceId,
    created_at: u64,
    keys: DeviceKeyPairs,
}

impl DeviceIdentity {
    pub fn generate(created_at: u64) -> Self {
        Self {
            device_id: crate::utils::uuid::generate_v4(),
            created_at,
            keys: DeviceKeyPairs::generate(),
        }
    }

    pub fn from_private_keys(device_id: DeviceId, created_at: u64, private: &PrivateKeys) -> Self {
        Self {
            device_id,
            created_at,
            keys: DeviceKeyPairs::from_secret_bytes(&private.signing, private.encryption),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn created_at(&self) -> u64 {
        self.created_at
    }

    pub fn public_keys(&self) -> PublicKeys {
        self.keys.public_keys()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public_keys().fingerprint()
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.keys.sign(message)
    }

    pub fn public_bundle(&self) -> PublicKeyBundle {
        PublicKeyBundle::new(&self.device_id, &self.public_keys())
    }

    pub(crate) fn agreement_secret(&self) -> SecretBytes {
        self.keys.agreement_secret()
    }

    pub(crate) fn private_keys(&self) -> PrivateKeys {
        self.keys.private_keys()
    }
}

impl fmt::Debug for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceIdentity")
            .field("device_id", &self.device_id)
            .field("created_at", &self.created_at)
            .field("fingerprint", &self.fingerprint().to_string())
            .finish_non_exhaustive()
    }
}

/// Public identity material exchanged out of band (JSON, base64 keys).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyBundle {
    pub device_id: DeviceId,
    pub signing_key: String,
    pub encryption_key: String,
}

impl PublicKeyBundle {
    pub fn new(device_id: &str, keys: &PublicKeys) -> Self {
        Self {
            device_id: device_id.to_string(),
            signing_key: b64::encode(keys.signing),
            encryption_key: b64::encode(keys.encryption),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn public_keys(&self) -> Result<PublicKeys> {
        Ok(PublicKeys {
            signing: decode_key(&self.signing_key, "signing")?,
            encryption: decode_key(&self.encryption_key, "encryption")?,
        })
    }
}

fn decode_key(encoded: &str, what: &str) -> Result<[u8; KEY_LENGTH]> {
    let bytes = b64::decode(encoded)?;
    bytes.as_slice().try_into().map_err(|_| {
        PalisadeError::InvalidInput(format!("{} key must be {} bytes", what, KEY_LENGTH))
    })
}

/// A remote device as known to this one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerDevice {
    pub device_id: DeviceId,
    pub public_keys: PublicKeys,
    pub trust: TrustState,
    pub first_seen: u64,
    pub updated_at: u64,
    #[serde(default)]
    pub revocation_reason: Option<String>,
}

impl PeerDevice {
    pub fn new(device_id: DeviceId, public_keys: PublicKeys, now: u64) -> Self {
        Self {
            device_id,
            public_keys,
            trust: TrustState::Unverified,
            first_seen: now,
            updated_at: now,
            revocation_reason: None,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        self.public_keys.fingerprint()
    }

    pub fn is_revoked(&self) -> bool {
        self.trust == TrustState::Revoked
    }
}
