// Шифрование приватных ключей устройства паролем
// PBKDF2-HMAC-SHA256 для деривации ключа + AES-256-GCM для шифрования

use crate::crypto::keys::{PrivateKeys, PublicKeys, KEY_LENGTH};
use crate::storage::models::StoredIdentity;
use crate::utils::error::{PalisadeError, Result};
use crate::utils::serialization;
use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use zeroize::Zeroizing;

const NONCE_LENGTH: usize = 12;

/// Parameters for one sealing operation.
#[derive(Debug, Clone, Copy)]
pub struct SealParams {
    pub iterations: u32,
    pub salt_length: usize,
}

/// Деривировать мастер-ключ из пароля с использованием PBKDF2
pub fn derive_master_key(
    passphrase: &str,
    salt: &[u8],
    iterations: u32,
) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    if passphrase.is_empty() {
        return Err(PalisadeError::InvalidInput(
            "Passphrase cannot be empty".to_string(),
        ));
    }
    if salt.len() < 16 || iterations == 0 {
        return Err(PalisadeError::InvalidInput(
            "Invalid PBKDF2 parameters".to_string(),
        ));
    }

    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), salt, iterations, &mut *key);
    Ok(key)
}

/// Генерировать случайную соль
pub fn generate_salt(length: usize) -> Vec<u8> {
    let mut salt = vec![0u8; length];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Зашифровать приватные ключи устройства
///
/// The device id is bound as associated data, so a sealed blob cannot be
/// re-labelled as another device.
pub fn seal_identity(
    device_id: &str,
    created_at: u64,
    public_keys: PublicKeys,
    keys: &PrivateKeys,
    passphrase: &str,
    params: SealParams,
) -> Result<StoredIdentity> {
    let salt = generate_salt(params.salt_length);
    let master_key = derive_master_key(passphrase, &salt, params.iterations)?;
    let cipher = Aes256Gcm::new((&*master_key).into());

    let mut nonce = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);

    let plaintext = Zeroizing::new(serialization::to_bytes(keys)?);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce),
            Payload {
                msg: plaintext.as_slice(),
                aad: device_id.as_bytes(),
            },
        )
        .map_err(|e| PalisadeError::CryptoError(format!("Encryption failed: {}", e)))?;

    Ok(StoredIdentity {
        device_id: device_id.to_string(),
        created_at,
        public_keys,
        salt,
        iterations: params.iterations,
        nonce: nonce.to_vec(),
        ciphertext,
    })
}

/// Расшифровать приватные ключи устройства
///
/// A wrong passphrase and a tampered blob both surface as
/// `AuthenticationFailure`.
pub fn open_identity(stored: &StoredIdentity, passphrase: &str) -> Result<PrivateKeys> {
    if stored.nonce.len() != NONCE_LENGTH {
        return Err(PalisadeError::SerializationError(
            "Invalid sealed identity nonce".to_string(),
        ));
    }
    let master_key = derive_master_key(passphrase, &stored.salt, stored.iterations)?;
    let cipher = Aes256Gcm::new((&*master_key).into());

    let plaintext = cipher
        .decrypt(
            Nonce::from_slice(&stored.nonce),
            Payload {
                msg: stored.ciphertext.as_slice(),
                aad: stored.device_id.as_bytes(),
            },
        )
        .map(Zeroizing::new)
        .map_err(|_| PalisadeError::AuthenticationFailure)?;

    serialization::from_bytes(&plaintext)
}
