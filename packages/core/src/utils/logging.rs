// Логирование: короткие идентификаторы для tracing-полей

/// First eight characters of an identifier, enough to correlate log lines.
pub fn short_id(id: &str) -> &str {
    match id.char_indices().nth(8) {
        Some((idx, _)) => &id[..idx],
        None => id,
    }
}

/// Hex of the first four bytes of a public value (never call with secrets).
pub fn short_hex(bytes: &[u8]) -> String {
    hex::encode(&bytes[..bytes.len().min(4)])
}
