//! The envelope a sender hands to transport.

use crate::crypto::keys::KEY_LENGTH;
use crate::crypto::EncryptionLevel;
use crate::identity::DeviceId;
use crate::protocol::WIRE_VERSION;

const AD_DOMAIN: &[u8] = b"palisade/envelope/v1";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub sender: DeviceId,
    pub recipient: DeviceId,
    pub epoch: u64,
    /// Starts at 1, strictly increasing within an epoch
    pub sequence: u64,
    pub level: EncryptionLevel,
    /// Sender's ephemeral X25519 key for this epoch
    pub ephemeral_public: [u8; KEY_LENGTH],
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
    pub tag: Vec<u8>,
    /// Ed25519 over `signing_bytes()`, present exactly for signing levels
    pub signature: Option<Vec<u8>>,
}

impl Envelope {
    /// Canonical header bytes bound into the AEAD.
    pub fn associated_data(&self) -> Vec<u8> {
        let mut ad = Vec::with_capacity(
            AD_DOMAIN.len() + self.sender.len() + self.recipient.len() + 64,
        );
        ad.extend_from_slice(AD_DOMAIN);
        ad.push(WIRE_VERSION);
        for id in [&self.sender, &self.recipient] {
            ad.extend_from_slice(&(id.len() as u16).to_be_bytes());
            ad.extend_from_slice(id.as_bytes());
        }
        ad.extend_from_slice(&self.epoch.to_be_bytes());
        ad.extend_from_slice(&self.sequence.to_be_bytes());
        ad.push(self.level.tag());
        ad.extend_from_slice(&self.ephemeral_public);
        ad
    }

    /// Bytes covered by the optional identity signature.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let mut bytes = self.associated_data();
        bytes.extend_from_slice(&(self.nonce.len() as u16).to_be_bytes());
        bytes.extend_from_slice(&self.nonce);
        bytes.extend_from_slice(&(self.ciphertext.len() as u64).to_be_bytes());
        bytes.extend_from_slice(&self.ciphertext);
        bytes.extend_from_slice(&self.tag);
        bytes
    }
}
