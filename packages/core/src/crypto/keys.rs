// Ключевой материал
// Все секретные типы обнуляются при drop и не реализуют Serialize

use crate::error::CryptoError;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

pub const KEY_LENGTH: usize = 32;
pub const SIGNATURE_LENGTH: usize = 64;

/// Variable-length secret (private keys, DH outputs).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecretBytes(Vec<u8>);

impl SecretBytes {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Concatenate secrets without leaving unzeroized copies behind.
    pub fn concat(parts: &[&SecretBytes]) -> Self {
        let mut out = Vec::with_capacity(parts.iter().map(|p| p.len()).sum());
        for part in parts {
            out.extend_from_slice(part.as_bytes());
        }
        Self(out)
    }
}

impl fmt::Debug for SecretBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretBytes([REDACTED; {}])", self.0.len())
    }
}

/// 256-bit symmetric key (epoch keys, chain keys, message keys).
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_LENGTH]);

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Take the first 32 bytes of a longer KDF or MAC output.
    pub fn from_prefix(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() < KEY_LENGTH {
            return Err(CryptoError::KeyDerivationError(format!(
                "need {} bytes of key material, got {}",
                KEY_LENGTH,
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LENGTH];
        key.copy_from_slice(&bytes[..KEY_LENGTH]);
        let out = Self(key);
        key.zeroize();
        Ok(out)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

/// Public halves of a device identity, distributed to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PublicKeys {
    /// Ed25519 verifying key
    pub signing: [u8; KEY_LENGTH],
    /// X25519 public key
    pub encryption: [u8; KEY_LENGTH],
}

impl PublicKeys {
    pub fn fingerprint(&self) -> Fingerprint {
        let mut hasher = Sha256::new();
        hasher.update(b"palisade/fingerprint/v1");
        hasher.update(self.signing);
        hasher.update(self.encryption);
        Fingerprint(hasher.finalize().into())
    }

    /// Verify an Ed25519 signature made by this device.
    pub fn verify(&self, message: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        verify_signature(&self.signing, message, signature)
    }
}

/// SHA-256 over both public keys; compared out of band by users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub [u8; 32]);

impl fmt::Display for Fingerprint {
    /// Groups of four hex digits: `3fa1 09c2 ...`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = hex::encode(self.0);
        for (i, chunk) in encoded.as_bytes().chunks(4).enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            // hex output is ASCII
            f.write_str(std::str::from_utf8(chunk).map_err(|_| fmt::Error)?)?;
        }
        Ok(())
    }
}

/// Long-term key pairs of one device.
pub struct DeviceKeyPairs {
    pub(crate) signing: SigningKey,
    pub(crate) encryption: StaticSecret,
}

impl DeviceKeyPairs {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
            encryption: StaticSecret::random_from_rng(OsRng),
        }
    }

    pub fn from_secret_bytes(
        signing: &[u8; KEY_LENGTH],
        encryption: [u8; KEY_LENGTH],
    ) -> Self {
        Self {
            signing: SigningKey::from_bytes(signing),
            encryption: StaticSecret::from(encryption),
        }
    }

    pub fn public_keys(&self) -> PublicKeys {
        PublicKeys {
            signing: self.signing.verifying_key().to_bytes(),
            encryption: X25519Public::from(&self.encryption).to_bytes(),
        }
    }

    pub fn sign(&self, message: &[u8]) -> Vec<u8> {
        self.signing.sign(message).to_bytes().to_vec()
    }

    /// X25519 private key as suite input.
    pub(crate) fn agreement_secret(&self) -> SecretBytes {
        SecretBytes::new(self.encryption.to_bytes().to_vec())
    }

    pub(crate) fn private_keys(&self) -> PrivateKeys {
        PrivateKeys {
            signing: self.signing.to_bytes(),
            encryption: self.encryption.to_bytes(),
        }
    }
}

/// Незашифрованные приватные ключи для временного хранения при sealing
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct PrivateKeys {
    pub signing: [u8; KEY_LENGTH],
    pub encryption: [u8; KEY_LENGTH],
}

pub fn verify_signature(
    public_key: &[u8; KEY_LENGTH],
    message: &[u8],
    signature: &[u8],
) -> Result<(), CryptoError> {
    let verifying_key = VerifyingKey::from_bytes(public_key)
        .map_err(|_| CryptoError::SignatureVerificationError)?;
    let sig_bytes: &[u8; SIGNATURE_LENGTH] = signature
        .try_into()
        .map_err(|_| CryptoError::SignatureVerificationError)?;
    let signature = Signature::from_bytes(sig_bytes);
    verifying_key
        .verify_strict(message, &signature)
        .map_err(CryptoError::from)
}
