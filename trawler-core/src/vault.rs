//! Encryption of stored account secrets with ChaCha20-Poly1305.
//!
//! Secrets are sealed with a random 96-bit nonce per value and persisted as
//! base64 over `nonce || ciphertext`. The key is supplied as base64 in the
//! engine configuration.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use thiserror::Error;

const NONCE_LENGTH: usize = 12;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("vault key must be 32 bytes, got {0}")]
    KeyLength(usize),
    #[error("vault key is not valid base64: {0}")]
    KeyEncoding(base64::DecodeError),
    #[error("sealed value is malformed")]
    Malformed,
    #[error("failed to seal secret")]
    Seal,
    #[error("failed to open secret (wrong key or tampered value)")]
    Open,
}

pub type VaultResult<T> = std::result::Result<T, VaultError>;

#[derive(Clone)]
pub struct SecretVault {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretVault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretVault").finish_non_exhaustive()
    }
}

impl SecretVault {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    pub fn from_base64_key(encoded: &str) -> VaultResult<Self> {
        let bytes = BASE64.decode(encoded).map_err(VaultError::KeyEncoding)?;
        let key: [u8; 32] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::KeyLength(bytes.len()))?;
        Ok(Self::new(key))
    }

    pub fn seal(&self, plaintext: &str) -> VaultResult<String> {
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Seal)?;
        let mut payload = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        payload.extend_from_slice(&nonce);
        payload.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(payload))
    }

    pub fn open(&self, sealed: &str) -> VaultResult<String> {
        let payload = BASE64.decode(sealed).map_err(|_| VaultError::Malformed)?;
        if payload.len() <= NONCE_LENGTH {
            return Err(VaultError::Malformed);
        }
        let (nonce, ciphertext) = payload.split_at(NONCE_LENGTH);
        let cipher = ChaCha20Poly1305::new((&self.key).into());
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| VaultError::Open)?;
        String::from_utf8(plaintext).map_err(|_| VaultError::Malformed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vault() -> SecretVault {
        SecretVault::new([0x42; 32])
    }

    #[test]
    fn seal_open_round_trip() {
        let v = vault();
        let sealed = v.seal("hunter2").unwrap();
        assert_ne!(sealed, "hunter2");
        assert_eq!(v.open(&sealed).unwrap(), "hunter2");
    }

    #[test]
    fn nonces_differ_between_seals() {
        let v = vault();
        let a = v.seal("same").unwrap();
        let b = v.seal("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails_to_open() {
        let sealed = vault().seal("secret").unwrap();
        let other = SecretVault::new([0x43; 32]);
        assert!(matches!(other.open(&sealed), Err(VaultError::Open)));
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let v = vault();
        assert!(matches!(v.open("AAAA"), Err(VaultError::Malformed)));
        assert!(matches!(v.open("not base64 !!"), Err(VaultError::Malformed)));
    }

    #[test]
    fn key_must_be_32_bytes() {
        let short = BASE64.encode([1u8; 16]);
        assert!(matches!(
            SecretVault::from_base64_key(&short),
            Err(VaultError::KeyLength(16))
        ));
    }
}
