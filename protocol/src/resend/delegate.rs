//! # Commit Path
//!
//! How sync writes a staged payload into the primary store.
//!
//! This path stores the payload and nothing else. The node's ordinary
//! receive path may go on to trigger resends or notify peers; sync must not,
//! or a resync would feed itself. Hence "bypass resend mode".
//!
//! ## Privacy checks
//!
//! - A non-standard payload (party protection, private state validation)
//!   requires every transaction it affects to be present locally with the
//!   same privacy mode. Sync commits in stage order, so a legitimate
//!   dependency is already there by the time its dependants arrive.
//! - A standard private payload may not affect a locally known
//!   non-standard transaction.
//! - A private state validation payload must carry an execution hash.
//! - A payload whose hash is already stored under a different privacy mode
//!   is rejected.
//!
//! Failing any check yields [`StoreError::PrivacyViolation`].
//!
//! ## Merge
//!
//! A second view of a stored transaction adds its recipient keys and boxes
//! to the stored payload instead of replacing it. Views whose boxes carry no
//! key are only stored when nothing is stored yet.

use std::sync::Arc;

use thiserror::Error;
use tracing::debug;

use crate::crypto::MessageHash;
use crate::payload::{EncodedPayload, PayloadEncoder, PayloadError, PrivacyMode};
use crate::storage::{DbError, EncryptedTransaction, EncryptedTransactionStore};

/// Errors raised by the commit path.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("privacy violation: {0}")]
    PrivacyViolation(String),

    #[error(transparent)]
    Payload(#[from] PayloadError),

    #[error(transparent)]
    Db(#[from] DbError),
}

/// Commit path used by sync.
pub trait ResendStoreDelegate: Send + Sync {
    /// Store `raw` in the primary store without triggering any resend.
    fn store_payload_bypass_resend_mode(&self, raw: &[u8]) -> Result<MessageHash, StoreError>;
}

/// [`ResendStoreDelegate`] over an [`EncryptedTransactionStore`].
pub struct TransactionCommitter {
    encoder: Arc<dyn PayloadEncoder>,
    transactions: Arc<dyn EncryptedTransactionStore>,
}

impl TransactionCommitter {
    pub fn new(
        encoder: Arc<dyn PayloadEncoder>,
        transactions: Arc<dyn EncryptedTransactionStore>,
    ) -> Self {
        Self {
            encoder,
            transactions,
        }
    }

    fn stored_payload(&self, hash: &MessageHash) -> Result<Option<EncodedPayload>, StoreError> {
        match self.transactions.find_by_hash(hash)? {
            Some(tx) => Ok(Some(self.encoder.decode(&tx.encoded_payload)?)),
            None => Ok(None),
        }
    }

    fn check_privacy(&self, payload: &EncodedPayload) -> Result<(), StoreError> {
        if payload.privacy_mode == PrivacyMode::PrivateStateValidation
            && payload.exec_hash.is_empty()
        {
            return Err(StoreError::PrivacyViolation(
                "private state validation payload has no execution hash".into(),
            ));
        }

        for affected in payload.affected_contract_transactions.keys() {
            let stored = self.stored_payload(affected)?;
            if payload.privacy_mode.is_standard() {
                if let Some(stored) = stored {
                    if !stored.privacy_mode.is_standard() {
                        return Err(StoreError::PrivacyViolation(format!(
                            "standard private payload affects {:?} transaction {}",
                            stored.privacy_mode, affected
                        )));
                    }
                }
                continue;
            }

            match stored {
                None => {
                    return Err(StoreError::PrivacyViolation(format!(
                        "affected transaction {affected} is not known locally"
                    )))
                }
                Some(stored) if stored.privacy_mode != payload.privacy_mode => {
                    return Err(StoreError::PrivacyViolation(format!(
                        "affected transaction {} has privacy mode {:?}, expected {:?}",
                        affected, stored.privacy_mode, payload.privacy_mode
                    )))
                }
                Some(_) => {}
            }
        }
        Ok(())
    }
}

/// Add the keyed boxes of `incoming` that `stored` lacks. Returns whether
/// anything changed.
fn merge_recipients(stored: &mut EncodedPayload, incoming: &EncodedPayload) -> bool {
    let mut changed = false;
    for (key, sealed) in incoming
        .recipient_keys
        .iter()
        .zip(incoming.recipient_boxes.iter())
    {
        if !stored.recipient_keys.contains(key) {
            stored.recipient_keys.push(*key);
            stored.recipient_boxes.push(sealed.clone());
            changed = true;
        }
    }
    changed
}

impl ResendStoreDelegate for TransactionCommitter {
    fn store_payload_bypass_resend_mode(&self, raw: &[u8]) -> Result<MessageHash, StoreError> {
        let payload = self.encoder.decode(raw)?;
        let hash = payload.message_hash();
        self.check_privacy(&payload)?;

        match self.stored_payload(&hash)? {
            Some(mut stored) => {
                if stored.privacy_mode != payload.privacy_mode {
                    return Err(StoreError::PrivacyViolation(format!(
                        "transaction {} already stored with privacy mode {:?}",
                        hash, stored.privacy_mode
                    )));
                }
                if merge_recipients(&mut stored, &payload) {
                    let merged = self.encoder.encode(&stored)?;
                    self.transactions
                        .save(&EncryptedTransaction::new(hash.clone(), merged))?;
                    debug!(%hash, "merged recipient view into stored transaction");
                }
            }
            None => {
                self.transactions
                    .save(&EncryptedTransaction::new(hash.clone(), raw.to_vec()))?;
                debug!(%hash, "stored transaction");
            }
        }
        Ok(hash)
    }
}
