use thiserror::Error;

/// Errors raised by a [`PrimitiveSuite`](crate::crypto::provider::PrimitiveSuite)
/// while producing key material or sealing data.
///
/// Opening sealed data never reports through this type: it fails with the
/// opaque [`AuthenticationFailure`] instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Failed to generate keys: {0}")]
    KeyGenerationError(String),
    #[error("Key agreement failed: {0}")]
    KeyAgreementError(String),
    #[error("Signing failed: {0}")]
    SigningError(String),
    #[error("Signature verification failed")]
    SignatureVerificationError,
    #[error("AEAD encryption failed: {0}")]
    AeadEncryptionError(String),
    #[error("Key derivation failed: {0}")]
    KeyDerivationError(String),
    #[error("Invalid input: {0}")]
    InvalidInputError(String),
}

/// The single failure `open` is allowed to report.
///
/// Carries no detail on purpose: a tag mismatch, a truncated tag and a nonce
/// of the wrong size are indistinguishable to the caller.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("authentication failure")]
pub struct AuthenticationFailure;

impl From<ed25519_dalek::SignatureError> for CryptoError {
    fn from(_: ed25519_dalek::SignatureError) -> Self {
        CryptoError::SignatureVerificationError
    }
}

impl From<hkdf::InvalidLength> for CryptoError {
    fn from(err: hkdf::InvalidLength) -> Self {
        CryptoError::KeyDerivationError(err.to_string())
    }
}
