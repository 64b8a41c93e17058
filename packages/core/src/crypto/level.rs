use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Strength tier chosen per message by the caller.
///
/// Each level maps to exactly one suite configuration (see
/// [`suites::suite_for`](crate::crypto::suites::suite_for)). A session is
/// pinned to the level it was established under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EncryptionLevel {
    Basic,
    Enhanced,
    Military,
    QuantumSafe,
}

impl EncryptionLevel {
    pub const ALL: [EncryptionLevel; 4] = [
        EncryptionLevel::Basic,
        EncryptionLevel::Enhanced,
        EncryptionLevel::Military,
        EncryptionLevel::QuantumSafe,
    ];

    /// Wire tag; also the suite id.
    pub fn tag(self) -> u8 {
        match self {
            EncryptionLevel::Basic => 1,
            EncryptionLevel::Enhanced => 2,
            EncryptionLevel::Military => 3,
            EncryptionLevel::QuantumSafe => 4,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(EncryptionLevel::Basic),
            2 => Some(EncryptionLevel::Enhanced),
            3 => Some(EncryptionLevel::Military),
            4 => Some(EncryptionLevel::QuantumSafe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EncryptionLevel::Basic => "basic",
            EncryptionLevel::Enhanced => "enhanced",
            EncryptionLevel::Military => "military",
            EncryptionLevel::QuantumSafe => "quantum-safe",
        }
    }
}

impl fmt::Display for EncryptionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "basic" => Ok(EncryptionLevel::Basic),
            "enhanced" => Ok(EncryptionLevel::Enhanced),
            "military" => Ok(EncryptionLevel::Military),
            "quantum-safe" | "quantumsafe" => Ok(EncryptionLevel::QuantumSafe),
            other => Err(format!("unknown encryption level: {}", other)),
        }
    }
}
