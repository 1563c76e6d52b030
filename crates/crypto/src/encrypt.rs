use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use rand::rngs::OsRng;
use rand::RngCore;

use greenafrica_core::Secret;

use crate::keys::hash;
use crate::{CryptoError, Result};

const NONCE_LEN: usize = 12;

/// Encrypt data with a symmetric key using ChaCha20-Poly1305
///
/// Output is `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
pub fn encrypt_symmetric(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut result = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);

    Ok(result)
}

/// Decrypt data produced by [`encrypt_symmetric`]
pub fn decrypt_symmetric(key: &[u8; 32], ciphertext: &[u8]) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort);
    }

    let nonce = Nonce::from_slice(&ciphertext[..NONCE_LEN]);
    let encrypted = &ciphertext[NONCE_LEN..];

    let cipher = ChaCha20Poly1305::new_from_slice(key).map_err(|_| CryptoError::InvalidKey)?;

    cipher
        .decrypt(nonce, encrypted)
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Seals custodial account keys before they reach the mirror store.
///
/// The symmetric key is the SHA-256 of the configured custody secret, so any
/// passphrase length is accepted.
#[derive(Clone)]
pub struct CustodyCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for CustodyCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CustodyCipher(***)")
    }
}

impl CustodyCipher {
    pub fn new(secret: &Secret) -> Result<Self> {
        if secret.is_empty() {
            return Err(CryptoError::InvalidKey);
        }
        Ok(Self {
            key: hash(secret.expose().as_bytes()),
        })
    }

    /// Encrypt a raw private key, returning base64 ciphertext
    pub fn seal_private_key(&self, private_key: &[u8]) -> Result<Secret> {
        let sealed = encrypt_symmetric(&self.key, private_key)?;
        Ok(Secret::new(BASE64.encode(sealed)))
    }

    pub fn open_private_key(&self, sealed: &Secret) -> Result<Vec<u8>> {
        let raw = BASE64
            .decode(sealed.expose())
            .map_err(|e| CryptoError::InvalidEncoding(e.to_string()))?;
        decrypt_symmetric(&self.key, &raw)
    }
}
