//! Directional sessions and their key material.
//!
//! ```text
//! NoSession ──► Establishing ──► Active ──► Expiring ──► Retired
//!                    │                                      ▲
//!                    └──────── timeout ──► NoSession        │
//!        any state ───────────── revocation ────────────────┘
//! ```
//!
//! Outbound sessions only encrypt, inbound sessions only decrypt. A session
//! is pinned to one level; its keys never leave this module.

pub mod manager;

pub use manager::{MaintenanceReport, SessionManager};

use crate::crypto::keys::{SymmetricKey, KEY_LENGTH};
use crate::crypto::provider::PrimitiveSuite;
use crate::crypto::ratchet::ChainRatchet;
use crate::crypto::EncryptionLevel;
use crate::identity::{DeviceId, DeviceIdentity};
use crate::protocol::Envelope;
use crate::rotation::SessionStats;
use crate::utils::error::{PalisadeError, Result};
use crate::utils::logging::short_id;
use std::fmt;

/// Bytes of the nonce that carry the sequence number
const NONCE_SEQUENCE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    Outbound,
    Inbound,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId {
    pub local: DeviceId,
    pub peer: DeviceId,
    pub epoch: u64,
    pub direction: Direction,
}

impl SessionId {
    pub fn new(local: &str, peer: &str, epoch: u64, direction: Direction) -> Self {
        Self {
            local: local.to_string(),
            peer: peer.to_string(),
            epoch,
            direction,
        }
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let arrow = match self.direction {
            Direction::Outbound => "->",
            Direction::Inbound => "<-",
        };
        write!(
            f,
            "{}{}{}#{}",
            short_id(&self.local),
            arrow,
            short_id(&self.peer),
            self.epoch
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoSession,
    Establishing,
    Active,
    Expiring,
    Retired,
}

pub struct Session {
    id: SessionId,
    suite: &'static dyn PrimitiveSuite,
    state: SessionState,
    /// None once retired
    ratchet: Option<ChainRatchet>,
    ephemeral_public: [u8; KEY_LENGTH],
    created_at: u64,
    messages: u64,
    grace_deadline: Option<u64>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        suite: &'static dyn PrimitiveSuite,
        epoch_key: SymmetricKey,
        ephemeral_public: [u8; KEY_LENGTH],
        created_at: u64,
    ) -> Self {
        Self {
            id,
            suite,
            state: SessionState::Active,
            ratchet: Some(ChainRatchet::new(suite, epoch_key)),
            ephemeral_public,
            created_at,
            messages: 0,
            grace_deadline: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn epoch(&self) -> u64 {
        self.id.epoch
    }

    pub fn level(&self) -> EncryptionLevel {
        self.suite.level()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn messages(&self) -> u64 {
        self.messages
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            created_at: self.created_at,
            messages: self.messages,
            level: self.level(),
        }
    }

    /// Active sessions decrypt; Expiring ones until the grace deadline.
    pub fn can_decrypt(&self, now: u64) -> bool {
        match self.state {
            SessionState::Active => true,
            SessionState::Expiring => self.grace_deadline.is_some_and(|deadline| now < deadline),
            _ => false,
        }
    }

    pub(crate) fn mark_expiring(&mut self, grace_deadline: u64) {
        if self.state == SessionState::Active {
            self.state = SessionState::Expiring;
            self.grace_deadline = Some(grace_deadline);
        }
    }

    /// Destroy key material. Idempotent.
    pub(crate) fn retire(&mut self) {
        self.state = SessionState::Retired;
        // ChainRatchet zeroizes its chain key on drop
        self.ratchet = None;
        self.grace_deadline = None;
    }

    fn expired(&self) -> PalisadeError {
        PalisadeError::SessionExpired {
            peer: self.id.peer.clone(),
            epoch: self.id.epoch,
        }
    }

    /// Encrypt the next message of this epoch into an envelope.
    pub(crate) fn seal(&mut self, plaintext: &[u8], signer: &DeviceIdentity) -> Result<Envelope> {
        if self.state != SessionState::Active {
            return Err(self.expired());
        }
        let ratchet = match self.ratchet.as_mut() {
            Some(ratchet) => ratchet,
            None => return Err(self.expired()),
        };
        let message_key = ratchet.advance()?;

        let mut nonce = self.suite.generate_nonce();
        nonce[..NONCE_SEQUENCE_LEN].copy_from_slice(&message_key.sequence().to_be_bytes());

        let mut envelope = Envelope {
            sender: self.id.local.clone(),
            recipient: self.id.peer.clone(),
            epoch: self.id.epoch,
            sequence: message_key.sequence(),
            level: self.suite.level(),
            ephemeral_public: self.ephemeral_public,
            nonce,
            ciphertext: Vec::new(),
            tag: Vec::new(),
            signature: None,
        };
        let (ciphertext, tag) = self.suite.seal(
            message_key.key(),
            &envelope.nonce,
            plaintext,
            &envelope.associated_data(),
        )?;
        envelope.ciphertext = ciphertext;
        envelope.tag = tag;
        if self.suite.signs_envelopes() {
            envelope.signature = Some(signer.sign(&envelope.signing_bytes()));
        }

        self.messages += 1;
        Ok(envelope)
    }

    /// Decrypt an envelope of this epoch. The ratchet moves only on success.
    pub(crate) fn open(&mut self, envelope: &Envelope, max_skip: u64) -> Result<Vec<u8>> {
        if envelope.level != self.suite.level() || envelope.ephemeral_public != self.ephemeral_public {
            return Err(PalisadeError::AuthenticationFailure);
        }
        let suite = self.suite;
        let ratchet = match self.ratchet.as_mut() {
            Some(ratchet) => ratchet,
            None => return Err(self.expired()),
        };
        let pending = ratchet.derive_at(envelope.sequence, max_skip)?;

        if envelope.nonce.len() < NONCE_SEQUENCE_LEN
            || envelope.nonce[..NONCE_SEQUENCE_LEN] != envelope.sequence.to_be_bytes()
        {
            return Err(PalisadeError::AuthenticationFailure);
        }

        let plaintext = suite.open(
            pending.message_key().key(),
            &envelope.nonce,
            &envelope.ciphertext,
            &envelope.tag,
            &envelope.associated_data(),
        )?;
        ratchet.commit(pending);
        self.messages += 1;
        Ok(plaintext)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("level", &self.level())
            .field("state", &self.state)
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}
