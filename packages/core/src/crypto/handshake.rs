//! Per-epoch key agreement.
//!
//! ```text
//! Initiator (A)                                   Responder (B)
//! =============                                   =============
//! EK_A = fresh X25519 pair
//! DH1 = DH(EK_A, IK_B)                            DH1 = DH(IK_B, EK_A)
//! DH2 = DH(IK_A, IK_B)                            DH2 = DH(IK_B, IK_A)
//! K   = HKDF(DH1 || DH2, ctx(A, B, epoch, level, EK_A_pub))
//! EK_A private zeroized                           EK_A_pub travels in the envelope
//! ```
//!
//! DH1 gives every epoch a fresh secret; DH2 binds both long-term identities.
//! The derived key seeds one [`ChainRatchet`](crate::crypto::ratchet::ChainRatchet)
//! per direction.

use crate::crypto::keys::{SecretBytes, SymmetricKey, KEY_LENGTH};
use crate::crypto::provider::PrimitiveSuite;
use crate::crypto::EncryptionLevel;
use crate::error::CryptoError;
use crate::utils::logging::{short_hex, short_id};
use tracing::{debug, trace};

const CONTEXT_DOMAIN: &[u8] = b"palisade/epoch/v1";

/// Everything the epoch key is bound to besides the DH outputs.
#[derive(Debug, Clone, Copy)]
pub struct EpochContext<'a> {
    pub initiator: &'a str,
    pub responder: &'a str,
    pub epoch: u64,
    pub level: EncryptionLevel,
}

impl EpochContext<'_> {
    /// Length-prefixed encoding, unambiguous for any id contents.
    pub fn to_bytes(&self, ephemeral_public: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(
            CONTEXT_DOMAIN.len() + self.initiator.len() + self.responder.len() + 64,
        );
        out.extend_from_slice(CONTEXT_DOMAIN);
        for field in [self.initiator.as_bytes(), self.responder.as_bytes()] {
            out.extend_from_slice(&(field.len() as u16).to_be_bytes());
            out.extend_from_slice(field);
        }
        out.extend_from_slice(&self.epoch.to_be_bytes());
        out.push(self.level.tag());
        out.extend_from_slice(ephemeral_public);
        out
    }
}

/// Initiator output: the key plus the public half the responder needs.
#[derive(Debug)]
pub struct EpochKeys {
    pub ephemeral_public: [u8; KEY_LENGTH],
    pub epoch_key: SymmetricKey,
}

pub fn initiate(
    suite: &dyn PrimitiveSuite,
    local_static: &SecretBytes,
    peer_static_public: &[u8; KEY_LENGTH],
    context: &EpochContext<'_>,
) -> Result<EpochKeys, CryptoError> {
    debug!(
        target: "crypto::handshake",
        peer = short_id(context.responder),
        epoch = context.epoch,
        level = %context.level,
        "Starting epoch agreement as initiator"
    );

    let (ephemeral_public, ephemeral_private) = suite.generate_keypair()?;
    let ephemeral_public: [u8; KEY_LENGTH] = ephemeral_public
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::KeyGenerationError("ephemeral key has wrong length".to_string()))?;

    let dh1 = suite.agree(&ephemeral_private, peer_static_public)?;
    // ephemeral private key is gone before the KDF runs
    drop(ephemeral_private);
    let dh2 = suite.agree(local_static, peer_static_public)?;

    let ikm = SecretBytes::concat(&[&dh1, &dh2]);
    let epoch_key = suite.derive_session_key(&ikm, &context.to_bytes(&ephemeral_public))?;

    trace!(
        target: "crypto::handshake",
        ephemeral = %short_hex(&ephemeral_public),
        "Epoch key derived"
    );
    Ok(EpochKeys {
        ephemeral_public,
        epoch_key,
    })
}

pub fn respond(
    suite: &dyn PrimitiveSuite,
    local_static: &SecretBytes,
    initiator_static_public: &[u8; KEY_LENGTH],
    ephemeral_public: &[u8],
    context: &EpochContext<'_>,
) -> Result<SymmetricKey, CryptoError> {
    debug!(
        target: "crypto::handshake",
        peer = short_id(context.initiator),
        epoch = context.epoch,
        level = %context.level,
        "Deriving epoch key as responder"
    );
    if ephemeral_public.len() != KEY_LENGTH {
        return Err(CryptoError::InvalidInputError(
            "Invalid ephemeral public key length".to_string(),
        ));
    }

    let dh1 = suite.agree(local_static, ephemeral_public)?;
    let dh2 = suite.agree(local_static, initiator_static_public)?;

    let ikm = SecretBytes::concat(&[&dh1, &dh2]);
    suite.derive_session_key(&ikm, &context.to_bytes(ephemeral_public))
}
