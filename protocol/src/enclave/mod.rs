//! # Enclave
//!
//! The node's crypto capability: which keys it owns, whether it is up, and
//! the ability to open a payload addressed to one of those keys.
//!
//! Resend uses the enclave for two things. The owned key set decides
//! whether the node is a payload's sender. `unencrypt_transaction` proves
//! which owned key a relayed payload was sealed for; the plaintext itself is
//! discarded.

pub mod keyring;

use std::collections::BTreeSet;

use thiserror::Error;

use crate::crypto::{EncryptionError, PublicKey};
use crate::payload::EncodedPayload;

pub use keyring::KeyringEnclave;

/// Up/down state reported by an enclave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnclaveStatus {
    Started,
    Stopped,
}

/// Errors raised by enclave operations.
#[derive(Debug, Error)]
pub enum EnclaveError {
    /// No owned key opens any box of the payload, or the provided key is not
    /// owned at all.
    #[error("no owned key can open this payload")]
    KeyNotFound,

    #[error("enclave is not started")]
    Unavailable,

    /// A box opened but the payload itself did not.
    #[error("crypto failure: {0}")]
    Crypto(#[from] EncryptionError),
}

/// Crypto capability consumed by the resend orchestrator.
pub trait Enclave: Send + Sync {
    /// Keys owned by this node.
    fn public_keys(&self) -> BTreeSet<PublicKey>;

    fn status(&self) -> EnclaveStatus;

    /// Decrypt `payload` using the owned key `provided_key`.
    ///
    /// Fails with [`EnclaveError::KeyNotFound`] when that key cannot open
    /// any of the payload's boxes.
    fn unencrypt_transaction(
        &self,
        payload: &EncodedPayload,
        provided_key: &PublicKey,
    ) -> Result<Vec<u8>, EnclaveError>;
}
