//! # Transaction Hashes
//!
//! A private transaction is identified by its [`MessageHash`]: the SHA-512
//! digest of the payload ciphertext. Every node holding any view of the
//! transaction computes the same hash, which is what lets views from
//! different senders merge into one staging row.
//!
//! [`SecurityHash`] is the opaque per-dependency value carried in a
//! payload's affected-contract map. It is compared, never interpreted.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Compute the SHA-512 hash of the input data.
pub fn sha512(data: &[u8]) -> Vec<u8> {
    let mut hasher = Sha512::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

// ---------------------------------------------------------------------------
// MessageHash
// ---------------------------------------------------------------------------

/// Identity of a private transaction.
///
/// Ordered bytewise. Storage keys are the raw bytes, so sled's iteration
/// order is the same order.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageHash(Vec<u8>);

impl MessageHash {
    /// Wrap an existing digest.
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    /// Hash a payload ciphertext.
    pub fn of_cipher_text(cipher_text: &[u8]) -> Self {
        Self(sha512(cipher_text))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

impl fmt::Debug for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageHash({})", self.to_base64())
    }
}

impl fmt::Display for MessageHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

// ---------------------------------------------------------------------------
// SecurityHash
// ---------------------------------------------------------------------------

/// Opaque hash attached to an affected-contract entry.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SecurityHash(Vec<u8>);

impl SecurityHash {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SecurityHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecurityHash({})", hex::encode(&self.0))
    }
}
