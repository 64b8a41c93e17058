// Валидация полей конверта
//
// Все ошибки здесь: MalformedEnvelope. Проверки идут до любой криптографии.

use crate::crypto::keys::SIGNATURE_LENGTH;
use crate::crypto::suite_for;
use crate::protocol::Envelope;
use crate::utils::error::{PalisadeError, Result};

/// Limits applied by the codec.
#[derive(Debug, Clone, Copy)]
pub struct EnvelopeLimits {
    pub max_ciphertext_len: usize,
    pub max_device_id_len: usize,
}

fn malformed(reason: impl Into<String>) -> PalisadeError {
    PalisadeError::MalformedEnvelope(reason.into())
}

/// Валидация идентификатора устройства
pub fn validate_device_id(id: &str, max_len: usize) -> Result<()> {
    if id.is_empty() {
        return Err(malformed("device id is empty"));
    }
    if id.len() > max_len {
        return Err(malformed(format!("device id longer than {} bytes", max_len)));
    }
    if id.chars().any(char::is_control) {
        return Err(malformed("device id contains control characters"));
    }
    Ok(())
}

/// Валидация конверта
pub fn validate_envelope(envelope: &Envelope, limits: &EnvelopeLimits) -> Result<()> {
    validate_device_id(&envelope.sender, limits.max_device_id_len)?;
    validate_device_id(&envelope.recipient, limits.max_device_id_len)?;

    if envelope.sequence == 0 {
        return Err(malformed("sequence must be at least 1"));
    }

    let suite = suite_for(envelope.level);
    if envelope.nonce.len() != suite.nonce_len() {
        return Err(malformed(format!(
            "nonce must be {} bytes for level {}",
            suite.nonce_len(),
            envelope.level
        )));
    }
    if envelope.tag.len() != suite.tag_len() {
        return Err(malformed(format!("tag must be {} bytes", suite.tag_len())));
    }
    if envelope.ciphertext.len() > limits.max_ciphertext_len {
        return Err(malformed(format!(
            "ciphertext exceeds {} bytes",
            limits.max_ciphertext_len
        )));
    }

    match (&envelope.signature, suite.signs_envelopes()) {
        (Some(signature), true) if signature.len() == SIGNATURE_LENGTH => Ok(()),
        (Some(_), true) => Err(malformed("signature has wrong length")),
        (None, true) => Err(malformed(format!(
            "level {} requires a signature",
            envelope.level
        ))),
        (Some(_), false) => Err(malformed(format!(
            "level {} does not carry signatures",
            envelope.level
        ))),
        (None, false) => Ok(()),
    }
}
