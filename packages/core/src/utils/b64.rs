use crate::utils::error::{PalisadeError, Result};
use base64::engine::general_purpose;
use base64::Engine;

pub fn encode(data: impl AsRef<[u8]>) -> String {
    general_purpose::STANDARD.encode(data)
}

pub fn decode(data: &str) -> Result<Vec<u8>> {
    general_purpose::STANDARD
        .decode(data)
        .map_err(|e| PalisadeError::InvalidInput(format!("Base64 decode failed: {}", e)))
}
