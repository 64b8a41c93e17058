//! Криптографический модуль
//!
//! # Архитектура
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │              SessionManager (one session per peer/epoch)    │
//! └─────────────────────────────────────────────────────────────┘
//!                │                           │
//!                ▼                           ▼
//! ┌───────────────────────────┐  ┌──────────────────────────┐
//! │   Epoch handshake         │  │  ChainRatchet            │
//! │  - fresh ephemeral X25519 │  │  - one key per sequence  │
//! │  - epoch key via KDF      │  │  - chain keys zeroized   │
//! └───────────────────────────┘  └──────────────────────────┘
//!                │                           │
//!                └─────────────┬─────────────┘
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              PrimitiveSuite (one per EncryptionLevel)       │
//! │  - Agreement (X25519)                                       │
//! │  - AEAD (ChaCha20-Poly1305, AES-256-GCM, XChaCha20-Poly1305)│
//! │  - KDF / MAC (HKDF + HMAC over SHA-256 or SHA-512)          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

/// PrimitiveSuite trait для crypto-agility
pub mod provider;

/// Encryption levels and their wire tags
pub mod level;

/// Suite configurations, one per level
pub mod suites;

/// Key material types (zeroized on drop)
pub mod keys;

/// Per-epoch key agreement
pub mod handshake;

/// Symmetric one-way ratchet
pub mod ratchet;

/// Sealing the device identity at rest
pub mod master_key;

pub use level::EncryptionLevel;
pub use provider::PrimitiveSuite;
pub use suites::suite_for;

pub type SuiteID = u16;
