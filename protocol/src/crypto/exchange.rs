//! # Recipient Box Key Derivation
//!
//! Each recipient box is sealed under a key shared by exactly two parties:
//! the payload's sender and one recipient. Both sides run X25519 and feed
//! the raw shared secret through BLAKE3 in key-derivation mode together
//! with both public keys.
//!
//! The public keys are hashed in sorted order so the sender computing
//! `KDF(secret, S, R)` and the recipient computing `KDF(secret, R, S)` land
//! on the same box key.

use crate::config::{AES_KEY_LENGTH, RECIPIENT_BOX_KDF_CONTEXT};
use crate::crypto::keys::PublicKey;

/// Derive the box key for the pair `(ours, theirs)` from their X25519
/// shared secret.
pub fn derive_box_key(
    shared_secret: &[u8; 32],
    ours: &PublicKey,
    theirs: &PublicKey,
) -> [u8; AES_KEY_LENGTH] {
    let mut hasher = blake3::Hasher::new_derive_key(RECIPIENT_BOX_KDF_CONTEXT);
    hasher.update(shared_secret);

    let (first, second) = if ours <= theirs {
        (ours, theirs)
    } else {
        (theirs, ours)
    };
    hasher.update(first.as_bytes());
    hasher.update(second.as_bytes());

    let mut box_key = [0u8; AES_KEY_LENGTH];
    hasher.finalize_xof().fill(&mut box_key);
    box_key
}
