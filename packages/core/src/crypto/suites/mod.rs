//! Криптографические наборы (Crypto Suites)
//!
//! Every [`EncryptionLevel`] maps to one [`SuiteParams`] configuration of the
//! same [`ComposedSuite`]. Levels differ only in the primitives plugged in:
//!
//! | Level       | AEAD               | KDF / MAC        | Signed envelopes |
//! |-------------|--------------------|------------------|------------------|
//! | Basic       | ChaCha20-Poly1305  | HKDF/HMAC-SHA256 | no               |
//! | Enhanced    | AES-256-GCM        | HKDF/HMAC-SHA256 | no               |
//! | Military    | AES-256-GCM        | HKDF/HMAC-SHA512 | Ed25519          |
//! | QuantumSafe | XChaCha20-Poly1305 | HKDF/HMAC-SHA512 | Ed25519          |
//!
//! Key agreement is X25519 everywhere. QuantumSafe adds a second HKDF
//! extract stage where a post-quantum shared secret would be mixed in; no
//! post-quantum algorithm is implemented.
//!
//! ```rust
//! use palisade_core::crypto::{suite_for, EncryptionLevel, PrimitiveSuite};
//!
//! let suite = suite_for(EncryptionLevel::Military);
//! assert!(suite.signs_envelopes());
//! assert_eq!(suite.nonce_len(), 12);
//! ```

pub mod composed;

use crate::crypto::provider::PrimitiveSuite;
use crate::crypto::EncryptionLevel;

pub use composed::ComposedSuite;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AeadAlgorithm {
    ChaCha20Poly1305,
    Aes256Gcm,
    XChaCha20Poly1305,
}

impl AeadAlgorithm {
    pub const fn nonce_len(self) -> usize {
        match self {
            AeadAlgorithm::ChaCha20Poly1305 | AeadAlgorithm::Aes256Gcm => 12,
            AeadAlgorithm::XChaCha20Poly1305 => 24,
        }
    }
}

/// Hash behind both HKDF and HMAC.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashFunction {
    Sha256,
    Sha512,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SuiteParams {
    pub level: EncryptionLevel,
    pub aead: AeadAlgorithm,
    pub hash: HashFunction,
    pub signs_envelopes: bool,
    /// Extra HKDF-SHA512 stage over the derived key (hybrid slot)
    pub hybrid_stage: bool,
}

impl SuiteParams {
    pub const fn for_level(level: EncryptionLevel) -> Self {
        match level {
            EncryptionLevel::Basic => Self {
                level,
                aead: AeadAlgorithm::ChaCha20Poly1305,
                hash: HashFunction::Sha256,
                signs_envelopes: false,
                hybrid_stage: false,
            },
            EncryptionLevel::Enhanced => Self {
                level,
                aead: AeadAlgorithm::Aes256Gcm,
                hash: HashFunction::Sha256,
                signs_envelopes: false,
                hybrid_stage: false,
            },
            EncryptionLevel::Military => Self {
                level,
                aead: AeadAlgorithm::Aes256Gcm,
                hash: HashFunction::Sha512,
                signs_envelopes: true,
                hybrid_stage: false,
            },
            EncryptionLevel::QuantumSafe => Self {
                level,
                aead: AeadAlgorithm::XChaCha20Poly1305,
                hash: HashFunction::Sha512,
                signs_envelopes: true,
                hybrid_stage: true,
            },
        }
    }
}

static BASIC: ComposedSuite = ComposedSuite::new(SuiteParams::for_level(EncryptionLevel::Basic));
static ENHANCED: ComposedSuite =
    ComposedSuite::new(SuiteParams::for_level(EncryptionLevel::Enhanced));
static MILITARY: ComposedSuite =
    ComposedSuite::new(SuiteParams::for_level(EncryptionLevel::Military));
static QUANTUM_SAFE: ComposedSuite =
    ComposedSuite::new(SuiteParams::for_level(EncryptionLevel::QuantumSafe));

/// Shared, stateless suite for a level.
pub fn suite_for(level: EncryptionLevel) -> &'static dyn PrimitiveSuite {
    match level {
        EncryptionLevel::Basic => &BASIC,
        EncryptionLevel::Enhanced => &ENHANCED,
        EncryptionLevel::Military => &MILITARY,
        EncryptionLevel::QuantumSafe => &QUANTUM_SAFE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_level_has_its_own_suite() {
        for level in EncryptionLevel::ALL {
            let suite = suite_for(level);
            assert_eq!(suite.level(), level);
            assert_eq!(suite.suite_id(), level.tag() as u16);
            assert_eq!(suite.tag_len(), 16);
        }
    }

    #[test]
    fn test_suite_table() {
        assert_eq!(suite_for(EncryptionLevel::Basic).nonce_len(), 12);
        assert_eq!(suite_for(EncryptionLevel::QuantumSafe).nonce_len(), 24);
        assert!(!suite_for(EncryptionLevel::Enhanced).signs_envelopes());
        assert!(suite_for(EncryptionLevel::QuantumSafe).signs_envelopes());
    }
}
