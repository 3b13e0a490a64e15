//! # Key Management
//!
//! X25519 keys for private transaction parties.
//!
//! A [`PublicKey`] identifies a party: it is the sender key of a payload, one
//! of its recipient keys, and the target of a resend request. A [`KeyPair`]
//! is what the local enclave holds for each key it owns.
//!
//! Public keys travel between nodes as base64 strings; logs and the node's
//! HTTP surface render them as hex. Key bytes of the secret half are never
//! logged.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use x25519_dalek::StaticSecret;

use crate::config::PUBLIC_KEY_LENGTH;

/// Errors that can occur while parsing or loading keys.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    #[error("invalid public key: expected {PUBLIC_KEY_LENGTH} bytes")]
    InvalidPublicKey,

    #[error("invalid secret key: expected {PUBLIC_KEY_LENGTH} bytes")]
    InvalidSecretKey,

    #[error("invalid key encoding: {0}")]
    Encoding(String),
}

// ---------------------------------------------------------------------------
// PublicKey
// ---------------------------------------------------------------------------

/// The public half of a party's X25519 key.
///
/// Value semantics throughout: two keys are the same party iff their bytes
/// match. `Ord` is bytewise so key sets iterate deterministically.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PublicKey {
    bytes: [u8; PUBLIC_KEY_LENGTH],
}

impl PublicKey {
    /// Create a key from raw bytes.
    pub fn from_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self { bytes }
    }

    /// Try to create a key from a slice, checking the length.
    pub fn try_from_slice(slice: &[u8]) -> Result<Self, KeyError> {
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            slice.try_into().map_err(|_| KeyError::InvalidPublicKey)?;
        Ok(Self { bytes })
    }

    /// Parse the base64 form used on the wire.
    pub fn from_base64(encoded: &str) -> Result<Self, KeyError> {
        let raw = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::try_from_slice(&raw)
    }

    /// Parse a hex string, as written by `ptm-node init`.
    pub fn from_hex(encoded: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(encoded.trim()).map_err(|e| KeyError::Encoding(e.to_string()))?;
        Self::try_from_slice(&raw)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    /// Base64 representation, the wire form.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bytes)
    }

    /// Hex-encoded representation. 64 characters for 32 bytes.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl From<&x25519_dalek::PublicKey> for PublicKey {
    fn from(key: &x25519_dalek::PublicKey) -> Self {
        Self {
            bytes: key.to_bytes(),
        }
    }
}

impl From<&PublicKey> for x25519_dalek::PublicKey {
    fn from(key: &PublicKey) -> Self {
        x25519_dalek::PublicKey::from(key.bytes)
    }
}

// ---------------------------------------------------------------------------
// KeyPair
// ---------------------------------------------------------------------------

/// A locally owned X25519 keypair.
///
/// Deliberately not `Serialize`: exporting secret material goes through
/// [`KeyPair::secret_key_hex`] so it is always an explicit act.
pub struct KeyPair {
    secret: StaticSecret,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh keypair from the OS RNG.
    pub fn generate() -> Self {
        Self::from_secret(StaticSecret::random_from_rng(OsRng))
    }

    /// Rebuild a keypair from its 32 secret bytes.
    pub fn from_secret_bytes(bytes: [u8; PUBLIC_KEY_LENGTH]) -> Self {
        Self::from_secret(StaticSecret::from(bytes))
    }

    /// Rebuild a keypair from a hex-encoded secret.
    pub fn from_secret_hex(encoded: &str) -> Result<Self, KeyError> {
        let raw = hex::decode(encoded.trim()).map_err(|e| KeyError::Encoding(e.to_string()))?;
        let bytes: [u8; PUBLIC_KEY_LENGTH] =
            raw.as_slice().try_into().map_err(|_| KeyError::InvalidSecretKey)?;
        Ok(Self::from_secret_bytes(bytes))
    }

    fn from_secret(secret: StaticSecret) -> Self {
        let public = PublicKey::from(&x25519_dalek::PublicKey::from(&secret));
        Self { secret, public }
    }

    /// The public half.
    pub fn public_key(&self) -> PublicKey {
        self.public
    }

    /// Raw Diffie-Hellman output with a peer key. Feed it through
    /// [`crate::crypto::exchange::derive_box_key`], never use it directly.
    pub fn diffie_hellman(&self, peer: &PublicKey) -> [u8; 32] {
        let peer = x25519_dalek::PublicKey::from(peer);
        self.secret.diffie_hellman(&peer).to_bytes()
    }

    /// Export the secret half as hex. Handle with care.
    pub fn secret_key_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }
}

impl Clone for KeyPair {
    fn clone(&self) -> Self {
        Self::from_secret_bytes(self.secret.to_bytes())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyPair(pub={})", self.public.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base64_round_trip() {
        let key = KeyPair::generate().public_key();
        let parsed = PublicKey::from_base64(&key.to_base64()).unwrap();
        assert_eq!(parsed, key);
    }

    #[test]
    fn test_known_base64_key_parses() {
        let key = PublicKey::from_base64("ROAZBWtSacxXQrOe3FGAqJDyJjFePR5ce4TSIzmJ0Bc=").unwrap();
        assert_eq!(key.as_bytes().len(), 32);
    }

    #[test]
    fn test_short_key_is_rejected() {
        assert_eq!(
            PublicKey::try_from_slice(&[1u8; 16]),
            Err(KeyError::InvalidPublicKey)
        );
        assert!(matches!(
            PublicKey::from_base64("AAAA"),
            Err(KeyError::InvalidPublicKey)
        ));
    }

    #[test]
    fn test_garbage_base64_is_rejected() {
        assert!(matches!(
            PublicKey::from_base64("not base64 at all!"),
            Err(KeyError::Encoding(_))
        ));
    }

    #[test]
    fn test_secret_hex_round_trip_preserves_public_key() {
        let kp = KeyPair::generate();
        let restored = KeyPair::from_secret_hex(&kp.secret_key_hex()).unwrap();
        assert_eq!(restored.public_key(), kp.public_key());
    }

    #[test]
    fn test_diffie_hellman_is_symmetric() {
        let alice = KeyPair::generate();
        let bob = KeyPair::generate();
        assert_eq!(
            alice.diffie_hellman(&bob.public_key()),
            bob.diffie_hellman(&alice.public_key())
        );
    }

    #[test]
    fn test_debug_does_not_leak_secret() {
        let kp = KeyPair::generate();
        let debug = format!("{:?}", kp);
        assert!(!debug.contains(&kp.secret_key_hex()));
        assert!(debug.contains(&kp.public_key().to_hex()));
    }
}
