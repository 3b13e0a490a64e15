use thiserror::Error;

use super::delegate::StoreError;
use crate::crypto::KeyError;
use crate::payload::PayloadError;
use crate::storage::DbError;

/// Errors surfaced by [`super::BatchResendManager`] operations.
///
/// Privacy violations during sync never appear here; they are counted into
/// the pass outcome instead.
#[derive(Debug, Error)]
pub enum ResendError {
    #[error("enclave is not available")]
    EnclaveUnavailable,

    /// No owned key opens a payload this node should be able to relay.
    #[error("{0}")]
    KeyNotFound(String),

    #[error("batch size must be at least 1")]
    InvalidBatchSize,

    #[error("invalid public key: {0}")]
    InvalidPublicKey(#[from] KeyError),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
