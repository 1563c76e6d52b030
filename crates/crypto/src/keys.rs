use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

use greenafrica_core::Secret;

use crate::{CryptoError, Result};

/// Keypair for signing ledger transactions (Ed25519)
pub struct SigningKeypair {
    pub signing_key: SigningKey,
    pub verifying_key: VerifyingKey,
}

impl Clone for SigningKeypair {
    fn clone(&self) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&self.signing_key.to_bytes()),
            verifying_key: self.verifying_key,
        }
    }
}

impl std::fmt::Debug for SigningKeypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKeypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

impl SigningKeypair {
    /// Generate a new random signing keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Create from raw secret key bytes
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(secret);
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
        }
    }

    /// Load from a hex-encoded 32-byte secret (optionally `0x`-prefixed)
    pub fn from_secret_hex(secret: &Secret) -> Result<Self> {
        let raw = secret.expose().trim();
        let raw = raw.strip_prefix("0x").unwrap_or(raw);
        let bytes = hex::decode(raw).map_err(|_| CryptoError::InvalidKey)?;
        let array: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKey)?;
        Ok(Self::from_secret_bytes(&array))
    }

    /// Get the public key as bytes
    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key.to_bytes()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key_bytes())
    }

    /// Get the secret key as bytes
    pub fn secret_key_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }
}

/// Hash data using SHA-256
pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signing_keypair_roundtrip_bytes() {
        let kp = SigningKeypair::generate();
        let restored = SigningKeypair::from_secret_bytes(&kp.secret_key_bytes());
        assert_eq!(restored.public_key_bytes(), kp.public_key_bytes());
    }

    #[test]
    fn test_from_secret_hex() {
        let kp = SigningKeypair::generate();
        let secret = Secret::new(format!("0x{}", hex::encode(kp.secret_key_bytes())));
        let restored = SigningKeypair::from_secret_hex(&secret).unwrap();
        assert_eq!(restored.public_key_hex(), kp.public_key_hex());
    }

    #[test]
    fn test_from_secret_hex_rejects_bad_input() {
        assert!(matches!(
            SigningKeypair::from_secret_hex(&Secret::new("not-hex")),
            Err(CryptoError::InvalidKey)
        ));
        assert!(matches!(
            SigningKeypair::from_secret_hex(&Secret::new("abcd")),
            Err(CryptoError::InvalidKey)
        ));
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let kp = SigningKeypair::from_secret_bytes(&[7u8; 32]);
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&hex::encode([7u8; 32])));
        assert!(debug.contains(&kp.public_key_hex()));
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(hash(b"green"), hash(b"green"));
        assert_ne!(hash(b"green"), hash(b"points"));
    }
}
