// Wire format конверта: b"PS" + версия + MessagePack тело
//
// The codec knows nothing about sessions: it checks shape only. Whether the
// epoch exists is decided by the session layer before any decryption.

use crate::config::Config;
use crate::crypto::keys::KEY_LENGTH;
use crate::crypto::EncryptionLevel;
use crate::protocol::validation::{validate_envelope, EnvelopeLimits};
use crate::protocol::{Envelope, MAGIC, WIRE_VERSION};
use crate::utils::error::{PalisadeError, Result};
use rmp_serde::{Deserializer, Serializer};
use serde::{Deserialize, Serialize};
use std::io::Cursor;
use tracing::debug;

const HEADER_LEN: usize = MAGIC.len() + 1;

/// MessagePack body; level travels as its numeric tag.
#[derive(Serialize, Deserialize)]
struct WireEnvelope {
    sender: String,
    recipient: String,
    epoch: u64,
    sequence: u64,
    level: u8,
    #[serde(with = "serde_bytes")]
    ephemeral_public: Vec<u8>,
    #[serde(with = "serde_bytes")]
    nonce: Vec<u8>,
    #[serde(with = "serde_bytes")]
    ciphertext: Vec<u8>,
    #[serde(with = "serde_bytes")]
    tag: Vec<u8>,
    #[serde(default, with = "serde_bytes")]
    signature: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy)]
pub struct MessageCodec {
    limits: EnvelopeLimits,
}

impl MessageCodec {
    pub fn new(limits: EnvelopeLimits) -> Self {
        Self { limits }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(EnvelopeLimits {
            max_ciphertext_len: config.max_ciphertext_len,
            max_device_id_len: config.max_device_id_len,
        })
    }

    pub fn limits(&self) -> &EnvelopeLimits {
        &self.limits
    }

    pub fn encode(&self, envelope: &Envelope) -> Result<Vec<u8>> {
        validate_envelope(envelope, &self.limits)?;

        let wire = WireEnvelope {
            sender: envelope.sender.clone(),
            recipient: envelope.recipient.clone(),
            epoch: envelope.epoch,
            sequence: envelope.sequence,
            level: envelope.level.tag(),
            ephemeral_public: envelope.ephemeral_public.to_vec(),
            nonce: envelope.nonce.clone(),
            ciphertext: envelope.ciphertext.clone(),
            tag: envelope.tag.clone(),
            signature: envelope.signature.clone(),
        };

        let mut buffer = Vec::with_capacity(HEADER_LEN + envelope.ciphertext.len() + 160);
        buffer.extend_from_slice(MAGIC);
        buffer.push(WIRE_VERSION);
        wire.serialize(&mut Serializer::new(&mut buffer))
            .map_err(|e| PalisadeError::SerializationError(format!("MessagePack pack error: {}", e)))?;
        Ok(buffer)
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<Envelope> {
        let envelope = self.decode_unchecked(bytes).map_err(|e| {
            debug!(target: "codec", error = %e, len = bytes.len(), "Rejected envelope");
            e
        })?;
        validate_envelope(&envelope, &self.limits)?;
        Ok(envelope)
    }

    fn decode_unchecked(&self, bytes: &[u8]) -> Result<Envelope> {
        if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
            return Err(PalisadeError::MalformedEnvelope("bad magic".to_string()));
        }
        if bytes[MAGIC.len()] != WIRE_VERSION {
            return Err(PalisadeError::MalformedEnvelope(format!(
                "unsupported version {}",
                bytes[MAGIC.len()]
            )));
        }
        // ids and ciphertext plus room for framing and the fixed-size fields
        if bytes.len() > HEADER_LEN + self.limits.max_ciphertext_len + 2 * self.limits.max_device_id_len + 512 {
            return Err(PalisadeError::MalformedEnvelope("envelope too large".to_string()));
        }

        let body = &bytes[HEADER_LEN..];
        let mut cursor = Cursor::new(body);
        let wire = WireEnvelope::deserialize(&mut Deserializer::new(&mut cursor))
            .map_err(|e| PalisadeError::MalformedEnvelope(format!("MessagePack unpack error: {}", e)))?;
        if cursor.position() as usize != body.len() {
            return Err(PalisadeError::MalformedEnvelope("trailing bytes".to_string()));
        }

        let level = EncryptionLevel::from_tag(wire.level).ok_or_else(|| {
            PalisadeError::MalformedEnvelope(format!("unknown level tag {}", wire.level))
        })?;
        let ephemeral_public: [u8; KEY_LENGTH] =
            wire.ephemeral_public.as_slice().try_into().map_err(|_| {
                PalisadeError::MalformedEnvelope("ephemeral key must be 32 bytes".to_string())
            })?;

        Ok(Envelope {
            sender: wire.sender,
            recipient: wire.recipient,
            epoch: wire.epoch,
            sequence: wire.sequence,
            level,
            ephemeral_public,
            nonce: wire.nonce,
            ciphertext: wire.ciphertext,
            tag: wire.tag,
            signature: wire.signature,
        })
    }
}

impl Default for MessageCodec {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}
