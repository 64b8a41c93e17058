//! Defines the PrimitiveSuite trait for crypto-agility.

use crate::crypto::keys::{SecretBytes, SymmetricKey};
use crate::crypto::{EncryptionLevel, SuiteID};
use crate::error::{AuthenticationFailure, CryptoError};
use core::fmt::Debug;
use zeroize::Zeroizing;

/// Label for deriving a message key from a chain key
pub const RATCHET_MESSAGE_LABEL: &[u8] = b"palisade/ratchet/message";

/// Label for deriving the next chain key
pub const RATCHET_CHAIN_LABEL: &[u8] = b"palisade/ratchet/chain";

/// All cryptographic operations the protocol needs from one toolkit.
///
/// The protocol depends only on this trait; every [`EncryptionLevel`] is one
/// instantiation of it. Implementations are stateless and shared across
/// threads.
pub trait PrimitiveSuite: Send + Sync + Debug {
    /// Level this suite is bound to.
    fn level(&self) -> EncryptionLevel;

    /// Returns the SuiteID associated with this suite.
    fn suite_id(&self) -> SuiteID {
        self.level().tag() as SuiteID
    }

    /// Nonce length expected by `seal`/`open`.
    fn nonce_len(&self) -> usize;

    /// Authentication tag length produced by `seal`.
    fn tag_len(&self) -> usize {
        16
    }

    /// Whether envelopes at this level carry an identity signature.
    fn signs_envelopes(&self) -> bool;

    /// Generates a new key-agreement pair as `(public, private)`.
    fn generate_keypair(&self) -> Result<(Vec<u8>, SecretBytes), CryptoError>;

    /// Diffie-Hellman between a private key and a peer public key.
    ///
    /// Rejects non-contributory (low-order) results.
    fn agree(&self, private: &SecretBytes, peer_public: &[u8]) -> Result<SecretBytes, CryptoError>;

    /// Derives a symmetric session key from a shared secret bound to `context`.
    fn derive_session_key(
        &self,
        shared_secret: &SecretBytes,
        context: &[u8],
    ) -> Result<SymmetricKey, CryptoError>;

    /// Keyed MAC over `data`. The output may be key material (ratchet
    /// steps), so it is wiped on drop.
    fn mac(&self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError>;

    /// One-way ratchet step: `(message_key, next_chain_key)`.
    ///
    /// Both outputs are MACs of the chain key under distinct labels, so the
    /// previous chain key cannot be recovered from either.
    fn ratchet_step(
        &self,
        chain_key: &SymmetricKey,
    ) -> Result<(SymmetricKey, SymmetricKey), CryptoError> {
        let message = self.mac(chain_key, RATCHET_MESSAGE_LABEL)?;
        let chain = self.mac(chain_key, RATCHET_CHAIN_LABEL)?;
        Ok((SymmetricKey::from_prefix(&message)?, SymmetricKey::from_prefix(&chain)?))
    }

    /// AEAD encryption with a detached tag: `(ciphertext, tag)`.
    fn seal(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError>;

    /// AEAD decryption. Fails closed with the opaque [`AuthenticationFailure`].
    fn open(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, AuthenticationFailure>;

    /// Generates a cryptographically secure random nonce of `nonce_len()` bytes.
    fn generate_nonce(&self) -> Vec<u8>;
}
