//! # AES-256-GCM Sealing
//!
//! Authenticated encryption for payload ciphertexts and recipient boxes.
//!
//! An encoded payload carries its nonces next to the ciphertext rather than
//! prefixed to it, so this module works with explicit `(nonce, ciphertext)`
//! pairs. Fresh nonces come from [`random_nonce`]; the recipient nonce is
//! shared by every box of one payload, which is safe because each box is
//! sealed under a different pairwise key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use thiserror::Error;

use crate::config::{AES_KEY_LENGTH, AES_NONCE_LENGTH};

/// Errors that can occur during sealing or opening.
///
/// Kept vague on purpose: a wrong key and a tampered box look the same.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptionError {
    #[error("encryption failed")]
    EncryptFailed,

    #[error("decryption failed -- wrong key or corrupted ciphertext")]
    DecryptFailed,

    #[error("invalid key length: expected {AES_KEY_LENGTH} bytes")]
    InvalidKeyLength,
}

/// Draw a random 96-bit nonce from the OS RNG.
pub fn random_nonce() -> [u8; AES_NONCE_LENGTH] {
    let mut nonce = [0u8; AES_NONCE_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Draw a random AES-256 key from the OS RNG.
pub fn random_key() -> [u8; AES_KEY_LENGTH] {
    let mut key = [0u8; AES_KEY_LENGTH];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Seal `plaintext` under `key` with the caller's nonce.
///
/// The returned ciphertext includes the 16-byte GCM tag.
pub fn seal(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    plaintext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::EncryptFailed)?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|_| EncryptionError::EncryptFailed)
}

/// Open a ciphertext produced by [`seal`].
pub fn open(
    key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    ciphertext: &[u8],
) -> Result<Vec<u8>, EncryptionError> {
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| EncryptionError::DecryptFailed)?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| EncryptionError::DecryptFailed)
}

/// Open a recipient box and return the master key inside it.
pub fn open_master_key(
    box_key: &[u8; AES_KEY_LENGTH],
    nonce: &[u8; AES_NONCE_LENGTH],
    sealed_box: &[u8],
) -> Result<[u8; AES_KEY_LENGTH], EncryptionError> {
    let raw = open(box_key, nonce, sealed_box)?;
    raw.as_slice()
        .try_into()
        .map_err(|_| EncryptionError::InvalidKeyLength)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        let mut key = [0u8; 32];
        for (i, byte) in key.iter_mut().enumerate() {
            *byte = i as u8;
        }
        key
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let nonce = random_nonce();
        let sealed = seal(&key, &nonce, b"private state").unwrap();
        assert_eq!(sealed.len(), b"private state".len() + crate::config::AES_TAG_LENGTH);
        assert_eq!(open(&key, &nonce, &sealed).unwrap(), b"private state");
    }

    #[test]
    fn test_wrong_nonce_fails() {
        let key = test_key();
        let sealed = seal(&key, &[1u8; 12], b"data").unwrap();
        assert_eq!(
            open(&key, &[2u8; 12], &sealed),
            Err(EncryptionError::DecryptFailed)
        );
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = test_key();
        let nonce = random_nonce();
        let mut sealed = seal(&key, &nonce, b"data").unwrap();
        sealed[0] ^= 0xff;
        assert!(open(&key, &nonce, &sealed).is_err());
    }

    #[test]
    fn test_master_key_box() {
        let box_key = test_key();
        let master = random_key();
        let nonce = random_nonce();
        let sealed = seal(&box_key, &nonce, &master).unwrap();
        assert_eq!(open_master_key(&box_key, &nonce, &sealed).unwrap(), master);
    }

    #[test]
    fn test_box_with_wrong_length_is_rejected() {
        let box_key = test_key();
        let nonce = random_nonce();
        let sealed = seal(&box_key, &nonce, b"short").unwrap();
        assert_eq!(
            open_master_key(&box_key, &nonce, &sealed),
            Err(EncryptionError::InvalidKeyLength)
        );
    }
}
