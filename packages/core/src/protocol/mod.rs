// Протокол: конверт сообщения, wire-кодек и валидация

pub mod codec;
pub mod envelope;
pub mod validation;

pub use codec::MessageCodec;
pub use envelope::Envelope;

/// First bytes of every encoded envelope
pub const MAGIC: &[u8; 2] = b"PS";

/// Wire format version
pub const WIRE_VERSION: u8 = 1;
