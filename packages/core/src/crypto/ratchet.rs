//! Symmetric chain ratchet for per-message keys within one epoch.
//!
//! # Security Properties
//!
//! - Forward secrecy: a chain key is zeroized as soon as its successor exists
//! - Key uniqueness: one message key per sequence number
//! - Determinism: both ends seeded with the epoch key produce the same keys
//!
//! Sequence numbers start at 1. The receiving side derives keys tentatively
//! ([`ChainRatchet::derive_at`]) and commits only after the message
//! authenticated, so a forged envelope cannot move the chain.

use crate::crypto::keys::SymmetricKey;
use crate::crypto::provider::PrimitiveSuite;
use crate::error::CryptoError;
use crate::utils::error::{PalisadeError, Result};

/// Key for exactly one message.
#[derive(Debug)]
pub struct MessageKey {
    key: SymmetricKey,
    sequence: u64,
}

impl MessageKey {
    pub fn key(&self) -> &SymmetricKey {
        &self.key
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

/// Ratchet state computed by `derive_at`, not yet applied.
#[derive(Debug)]
pub struct PendingAdvance {
    message_key: MessageKey,
    chain_key: SymmetricKey,
}

impl PendingAdvance {
    pub fn message_key(&self) -> &MessageKey {
        &self.message_key
    }
}

pub struct ChainRatchet {
    suite: &'static dyn PrimitiveSuite,
    chain_key: SymmetricKey,
    /// Sequence the next derived key belongs to
    next_sequence: u64,
}

impl ChainRatchet {
    /// The epoch key becomes the first chain key.
    pub fn new(suite: &'static dyn PrimitiveSuite, seed: SymmetricKey) -> Self {
        Self {
            suite,
            chain_key: seed,
            next_sequence: 1,
        }
    }

    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Highest sequence already consumed (0 before the first message).
    pub fn last_sequence(&self) -> u64 {
        self.next_sequence - 1
    }

    /// Sender side: key for the next sequence, chain moves immediately.
    pub fn advance(&mut self) -> std::result::Result<MessageKey, CryptoError> {
        if self.next_sequence == u64::MAX {
            return Err(CryptoError::KeyDerivationError(
                "ratchet sequence exhausted".to_string(),
            ));
        }
        let (message, next_chain) = self.suite.ratchet_step(&self.chain_key)?;
        // old chain key is zeroized on drop
        self.chain_key = next_chain;
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        Ok(MessageKey {
            key: message,
            sequence,
        })
    }

    /// Receiver side: derive the key for `target` without touching the state.
    ///
    /// Rejects sequences at or below the last accepted one and forward gaps
    /// larger than `max_skip`.
    pub fn derive_at(&self, target: u64, max_skip: u64) -> Result<PendingAdvance> {
        if target < self.next_sequence {
            return Err(PalisadeError::ReplayRejected {
                sequence: target,
                last_accepted: self.last_sequence(),
            });
        }
        if target - self.next_sequence > max_skip {
            return Err(PalisadeError::MalformedEnvelope(format!(
                "sequence {} skips more than {} messages",
                target, max_skip
            )));
        }

        let mut chain = self.chain_key.clone();
        let mut sequence = self.next_sequence;
        loop {
            let (message, next_chain) = self.suite.ratchet_step(&chain)?;
            chain = next_chain;
            if sequence == target {
                return Ok(PendingAdvance {
                    message_key: MessageKey {
                        key: message,
                        sequence,
                    },
                    chain_key: chain,
                });
            }
            sequence += 1;
        }
    }

    /// Apply a pending advance. Stale advances (already passed) are ignored.
    pub fn commit(&mut self, pending: PendingAdvance) {
        let sequence = pending.message_key.sequence;
        if sequence < self.next_sequence {
            return;
        }
        self.chain_key = pending.chain_key;
        self.next_sequence = sequence + 1;
    }
}

impl std::fmt::Debug for ChainRatchet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainRatchet")
            .field("level", &self.suite.level())
            .field("next_sequence", &self.next_sequence)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{suite_for, EncryptionLevel};

    fn test_seed() -> SymmetricKey {
        let mut seed = [0u8; 32];
        for (i, byte) in seed.iter_mut().enumerate() {
            *byte = i as u8;
        }
        SymmetricKey::from_bytes(seed)
    }

    fn ratchet() -> ChainRatchet {
        ChainRatchet::new(suite_for(EncryptionLevel::Enhanced), test_seed())
    }

    #[test]
    fn test_starts_at_sequence_one() {
        let mut sender = ratchet();
        assert_eq!(sender.last_sequence(), 0);
        let key = sender.advance().unwrap();
        assert_eq!(key.sequence(), 1);
        assert_eq!(sender.next_sequence(), 2);
    }

    #[test]
    fn test_keys_are_unique() {
        let mut sender = ratchet();
        let k1 = sender.advance().unwrap();
        let k2 = sender.advance().unwrap();
        assert_ne!(k1.key().as_bytes(), k2.key().as_bytes());
    }

    #[test]
    fn test_derive_at_matches_sender() {
        let mut sender = ratchet();
        let receiver = ratchet();
        let mut last = None;
        for _ in 0..5 {
            last = Some(sender.advance().unwrap());
        }
        let pending = receiver.derive_at(5, 1000).unwrap();
        assert_eq!(
            pending.message_key().key().as_bytes(),
            last.unwrap().key().as_bytes()
        );
    }

    #[test]
    fn test_derive_at_is_tentative_until_commit() {
        let mut receiver = ratchet();
        let pending = receiver.derive_at(3, 1000).unwrap();
        assert_eq!(receiver.next_sequence(), 1);
        receiver.commit(pending);
        assert_eq!(receiver.last_sequence(), 3);
    }

    #[test]
    fn test_replay_and_older_sequence_rejected() {
        let mut receiver = ratchet();
        let pending = receiver.derive_at(4, 1000).unwrap();
        receiver.commit(pending);
        assert!(matches!(
            receiver.derive_at(4, 1000),
            Err(PalisadeError::ReplayRejected { sequence: 4, last_accepted: 4 })
        ));
        assert!(matches!(
            receiver.derive_at(3, 1000),
            Err(PalisadeError::ReplayRejected { .. })
        ));
    }

    #[test]
    fn test_gap_beyond_max_skip_rejected() {
        let receiver = ratchet();
        assert!(receiver.derive_at(11, 10).is_ok());
        assert!(matches!(
            receiver.derive_at(12, 10),
            Err(PalisadeError::MalformedEnvelope(_))
        ));
    }
}
