//! # Cryptographic Primitives
//!
//! Thin, typed wrappers around audited implementations:
//!
//! - **X25519** for the pairwise secret between a sender and each recipient.
//! - **BLAKE3** in derive-key mode to turn that secret into a box key.
//! - **AES-256-GCM** for both the payload ciphertext and the recipient boxes.
//! - **SHA-512** for transaction identity.

pub mod encryption;
pub mod exchange;
pub mod hash;
pub mod keys;

pub use encryption::{open, seal, EncryptionError};
pub use exchange::derive_box_key;
pub use hash::{MessageHash, SecurityHash};
pub use keys::{KeyError, KeyPair, PublicKey};
