// Palisade Core
// Multi-level end-to-end encryption: sessions, key rotation, trust and audit

#![warn(clippy::all)]
#![allow(clippy::too_many_arguments)]

// Модули
pub mod api;
pub mod audit;
pub mod config;
pub mod crypto;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod rotation;
pub mod session;
pub mod storage;
pub mod trust;
pub mod utils;

// Re-exports для удобства
#[cfg(feature = "runtime")]
pub use api::runtime::RotationDriver;
pub use api::{ReceivedMessage, SecureCore};
pub use audit::{AuditEntry, AuditKind, AuditLog, AuditSink, FileSink, MemorySink};
pub use config::Config;
pub use crypto::keys::{Fingerprint, PublicKeys};
pub use crypto::EncryptionLevel;
pub use identity::{DeviceId, DeviceIdentity, PeerDevice, PublicKeyBundle};
pub use protocol::{Envelope, MessageCodec};
pub use session::{SessionId, SessionState};
pub use storage::{FileStore, MemoryStore, StateStore};
pub use trust::{Evidence, SignatureChain, SignatureLink, TrustState, TrustedRoot};
pub use utils::error::{PalisadeError, Result};
