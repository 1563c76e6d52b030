//! GreenAfrica Cryptography
//!
//! Operator signing keys and custodial private key sealing.
//!
//! Custodial keys are generated server-side when a ledger account is created
//! and leave this crate only as ciphertext (`nonce || ChaCha20-Poly1305`),
//! base64-encoded for storage in the mirror store.

mod encrypt;
mod keys;
mod sign;

pub use encrypt::*;
pub use keys::*;
pub use sign::*;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptionFailed,
    #[error("Decryption failed")]
    DecryptionFailed,
    #[error("Invalid key")]
    InvalidKey,
    #[error("Ciphertext too short")]
    CiphertextTooShort,
    #[error("Invalid encoding: {0}")]
    InvalidEncoding(String),
}

pub type Result<T> = std::result::Result<T, CryptoError>;
