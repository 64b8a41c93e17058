//! The one suite implementation, parameterized by [`SuiteParams`].

use super::{AeadAlgorithm, HashFunction, SuiteParams};
use crate::crypto::keys::{SecretBytes, SymmetricKey, KEY_LENGTH};
use crate::crypto::provider::PrimitiveSuite;
use crate::crypto::EncryptionLevel;
use crate::error::{AuthenticationFailure, CryptoError};
use aes_gcm::Aes256Gcm;
use chacha20poly1305::aead::generic_array::typenum::Unsigned;
use chacha20poly1305::aead::{AeadCore, AeadInPlace, KeyInit, Nonce, Tag};
use chacha20poly1305::{ChaCha20Poly1305, XChaCha20Poly1305};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand_core::RngCore;
use sha2::{Sha256, Sha512};
use tracing::trace;
use x25519_dalek::{PublicKey as X25519Public, StaticSecret};
use zeroize::{Zeroize, Zeroizing};

/// HKDF salt for every epoch key
const KDF_SALT: &[u8] = b"palisade/kdf/v1";

/// Salt of the extra extract stage; a post-quantum secret would join here
const HYBRID_STAGE_SALT: &[u8] = b"palisade/hybrid-stage/v1";

#[derive(Debug, Clone, Copy)]
pub struct ComposedSuite {
    params: SuiteParams,
}

impl ComposedSuite {
    pub const fn new(params: SuiteParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SuiteParams {
        &self.params
    }

    fn hkdf_expand(
        &self,
        salt: &[u8],
        ikm: &[u8],
        info: &[u8],
    ) -> Result<[u8; KEY_LENGTH], CryptoError> {
        let mut okm = [0u8; KEY_LENGTH];
        match self.params.hash {
            HashFunction::Sha256 => Hkdf::<Sha256>::new(Some(salt), ikm).expand(info, &mut okm)?,
            HashFunction::Sha512 => Hkdf::<Sha512>::new(Some(salt), ikm).expand(info, &mut okm)?,
        }
        Ok(okm)
    }
}

fn read_x25519(bytes: &[u8], what: &str) -> Result<[u8; KEY_LENGTH], CryptoError> {
    bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidInputError(format!("Invalid {} length", what)))
}

fn seal_detached<C>(
    key: &SymmetricKey,
    nonce: &[u8],
    plaintext: &[u8],
    associated_data: &[u8],
) -> Result<(Vec<u8>, Vec<u8>), CryptoError>
where
    C: AeadInPlace + KeyInit,
{
    if nonce.len() != C::NonceSize::USIZE {
        return Err(CryptoError::InvalidInputError(format!(
            "nonce must be {} bytes, got {}",
            C::NonceSize::USIZE,
            nonce.len()
        )));
    }
    let cipher = C::new_from_slice(key.as_bytes())
        .map_err(|_| CryptoError::InvalidInputError("Invalid AEAD key length".to_string()))?;
    let mut buffer = plaintext.to_vec();
    let tag = cipher
        .encrypt_in_place_detached(Nonce::<C>::from_slice(nonce), associated_data, &mut buffer)
        .map_err(|e| CryptoError::AeadEncryptionError(e.to_string()))?;
    Ok((buffer, tag.to_vec()))
}

fn open_detached<C>(
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
    tag: &[u8],
    associated_data: &[u8],
) -> Result<Vec<u8>, AuthenticationFailure>
where
    C: AeadInPlace + KeyInit,
{
    // from_slice panics on a length mismatch
    if nonce.len() != C::NonceSize::USIZE || tag.len() != <C as AeadCore>::TagSize::USIZE {
        return Err(AuthenticationFailure);
    }
    let cipher = C::new_from_slice(key.as_bytes()).map_err(|_| AuthenticationFailure)?;
    let mut buffer = ciphertext.to_vec();
    match cipher.decrypt_in_place_detached(
        Nonce::<C>::from_slice(nonce),
        associated_data,
        &mut buffer,
        Tag::<C>::from_slice(tag),
    ) {
        Ok(()) => Ok(buffer),
        Err(_) => {
            buffer.zeroize();
            Err(AuthenticationFailure)
        }
    }
}

impl PrimitiveSuite for ComposedSuite {
    fn level(&self) -> EncryptionLevel {
        self.params.level
    }

    fn nonce_len(&self) -> usize {
        self.params.aead.nonce_len()
    }

    fn signs_envelopes(&self) -> bool {
        self.params.signs_envelopes
    }

    fn generate_keypair(&self) -> Result<(Vec<u8>, SecretBytes), CryptoError> {
        let private_key = StaticSecret::random_from_rng(OsRng);
        let public_key = X25519Public::from(&private_key);
        Ok((
            public_key.to_bytes().to_vec(),
            SecretBytes::new(private_key.to_bytes().to_vec()),
        ))
    }

    fn agree(&self, private: &SecretBytes, peer_public: &[u8]) -> Result<SecretBytes, CryptoError> {
        let mut private_bytes = read_x25519(private.as_bytes(), "X25519 private key")?;
        let peer_bytes = read_x25519(peer_public, "X25519 public key")?;
        let secret = StaticSecret::from(private_bytes);
        private_bytes.zeroize();

        let shared = secret.diffie_hellman(&X25519Public::from(peer_bytes));
        if !shared.was_contributory() {
            return Err(CryptoError::KeyAgreementError(
                "peer public key produced a non-contributory secret".to_string(),
            ));
        }
        Ok(SecretBytes::new(shared.as_bytes().to_vec()))
    }

    fn derive_session_key(
        &self,
        shared_secret: &SecretBytes,
        context: &[u8],
    ) -> Result<SymmetricKey, CryptoError> {
        let mut okm = self.hkdf_expand(KDF_SALT, shared_secret.as_bytes(), context)?;
        if self.params.hybrid_stage {
            let mut staged = [0u8; KEY_LENGTH];
            Hkdf::<Sha512>::new(Some(HYBRID_STAGE_SALT), &okm).expand(context, &mut staged)?;
            okm.zeroize();
            okm = staged;
            staged.zeroize();
        }
        trace!(target: "crypto::suite", level = %self.params.level, "Derived session key");
        let key = SymmetricKey::from_bytes(okm);
        okm.zeroize();
        Ok(key)
    }

    fn mac(&self, key: &SymmetricKey, data: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        // Mac and KeyInit both provide new_from_slice
        let tag = match self.params.hash {
            HashFunction::Sha256 => {
                let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
                mac.update(data);
                let mut out = mac.finalize().into_bytes();
                let tag = Zeroizing::new(out.to_vec());
                out.as_mut_slice().zeroize();
                tag
            }
            HashFunction::Sha512 => {
                let mut mac = <Hmac<Sha512> as Mac>::new_from_slice(key.as_bytes())
                    .map_err(|e| CryptoError::KeyDerivationError(e.to_string()))?;
                mac.update(data);
                let mut out = mac.finalize().into_bytes();
                let tag = Zeroizing::new(out.to_vec());
                out.as_mut_slice().zeroize();
                tag
            }
        };
        Ok(tag)
    }

    fn seal(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        plaintext: &[u8],
        associated_data: &[u8],
    ) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
        match self.params.aead {
            AeadAlgorithm::ChaCha20Poly1305 => {
                seal_detached::<ChaCha20Poly1305>(key, nonce, plaintext, associated_data)
            }
            AeadAlgorithm::Aes256Gcm => {
                seal_detached::<Aes256Gcm>(key, nonce, plaintext, associated_data)
            }
            AeadAlgorithm::XChaCha20Poly1305 => {
                seal_detached::<XChaCha20Poly1305>(key, nonce, plaintext, associated_data)
            }
        }
    }

    fn open(
        &self,
        key: &SymmetricKey,
        nonce: &[u8],
        ciphertext: &[u8],
        tag: &[u8],
        associated_data: &[u8],
    ) -> Result<Vec<u8>, AuthenticationFailure> {
        match self.params.aead {
            AeadAlgorithm::ChaCha20Poly1305 => {
                open_detached::<ChaCha20Poly1305>(key, nonce, ciphertext, tag, associated_data)
            }
            AeadAlgorithm::Aes256Gcm => {
                open_detached::<Aes256Gcm>(key, nonce, ciphertext, tag, associated_data)
            }
            AeadAlgorithm::XChaCha20Poly1305 => {
                open_detached::<XChaCha20Poly1305>(key, nonce, ciphertext, tag, associated_data)
            }
        }
    }

    fn generate_nonce(&self) -> Vec<u8> {
        let mut nonce = vec![0u8; self.nonce_len()];
        OsRng.fill_bytes(&mut nonce);
        nonce
    }
}
