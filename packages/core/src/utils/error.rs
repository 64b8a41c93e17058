// Типы ошибок протокола

use crate::error::{AuthenticationFailure, CryptoError};
use thiserror::Error;

/// Protocol-level error taxonomy.
///
/// Variants carry detail for local logs only. Anything that goes back to a
/// remote peer must pass through [`PalisadeError::remote_code`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PalisadeError {
    #[error("authentication failure")]
    AuthenticationFailure,

    #[error("replay rejected: sequence {sequence} is not above {last_accepted}")]
    ReplayRejected { sequence: u64, last_accepted: u64 },

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("session expired: peer {peer}, epoch {epoch}")]
    SessionExpired { peer: String, epoch: u64 },

    #[error("session establishment with {0} timed out")]
    EstablishmentTimeout(String),

    #[error("peer {0} is not verified")]
    UntrustedPeer(String),

    #[error("peer {0} is revoked")]
    PeerRevoked(String),

    #[error("public keys for device {0} do not match the keys on file")]
    KeyMismatch(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cryptography error: {0}")]
    CryptoError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

/// What the external layer may do after a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// Surface to the caller; never retried automatically.
    NeverRetry,
    /// Re-request identity material for the peer, then try again.
    RefreshIdentity,
    /// Retry with backoff (owned by the external layer).
    RetryWithBackoff,
    /// Local problem: configuration, storage or a programming error.
    Local,
}

/// The only status a remote peer ever learns about a rejected envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCode {
    Accepted,
    Rejected,
}

impl PalisadeError {
    pub fn recovery(&self) -> Recovery {
        match self {
            PalisadeError::AuthenticationFailure
            | PalisadeError::ReplayRejected { .. }
            | PalisadeError::SessionExpired { .. }
            | PalisadeError::UntrustedPeer(_)
            | PalisadeError::PeerRevoked(_)
            | PalisadeError::KeyMismatch(_) => Recovery::NeverRetry,
            PalisadeError::MalformedEnvelope(_) | PalisadeError::UnknownPeer(_) => {
                Recovery::RefreshIdentity
            }
            PalisadeError::EstablishmentTimeout(_) => Recovery::RetryWithBackoff,
            PalisadeError::StorageError(_)
            | PalisadeError::SerializationError(_)
            | PalisadeError::CryptoError(_)
            | PalisadeError::InvalidInput(_) => Recovery::Local,
        }
    }

    /// Collapse any failure into the code a remote peer may see.
    pub fn remote_code(&self) -> RemoteCode {
        RemoteCode::Rejected
    }
}

impl From<AuthenticationFailure> for PalisadeError {
    fn from(_: AuthenticationFailure) -> Self {
        PalisadeError::AuthenticationFailure
    }
}

impl From<CryptoError> for PalisadeError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::SignatureVerificationError => PalisadeError::AuthenticationFailure,
            other => PalisadeError::CryptoError(other.to_string()),
        }
    }
}

impl From<std::io::Error> for PalisadeError {
    fn from(err: std::io::Error) -> Self {
        PalisadeError::StorageError(err.to_string())
    }
}

impl From<serde_json::Error> for PalisadeError {
    fn from(err: serde_json::Error) -> Self {
        PalisadeError::SerializationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PalisadeError>;
