//! # Encoded Payload
//!
//! The in-memory form of a private transaction as it travels between nodes.
//!
//! A sender-side payload carries one recipient box per recipient key, in the
//! same order. A payload narrowed to a single recipient carries exactly that
//! recipient's box, with its key alongside when the key is known. Boxes
//! without keys appear on payloads a recipient stored before it knew which
//! of its keys the box was sealed for.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::AES_NONCE_LENGTH;
use crate::crypto::{MessageHash, PublicKey, SecurityHash};

/// Visibility rules attached to a payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PrivacyMode {
    /// Restricted to an explicit recipient list. Each recipient only ever
    /// sees its own box.
    #[default]
    StandardPrivate,
    /// Every party sees every other party's key; dependent transactions
    /// must share the mode.
    PartyProtection,
    /// Party protection plus an execution hash checked by every party.
    PrivateStateValidation,
}

impl PrivacyMode {
    /// Only [`PrivacyMode::StandardPrivate`] is standard. Everything else is
    /// handled uniformly by resend and commit.
    pub fn is_standard(&self) -> bool {
        matches!(self, PrivacyMode::StandardPrivate)
    }
}

/// A private transaction payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodedPayload {
    /// Key of the party that created the transaction.
    pub sender_key: PublicKey,
    /// AES-256-GCM ciphertext of the transaction body.
    pub cipher_text: Vec<u8>,
    /// Nonce used for `cipher_text`.
    pub cipher_text_nonce: [u8; AES_NONCE_LENGTH],
    /// Sealed master keys, one per recipient.
    pub recipient_boxes: Vec<Vec<u8>>,
    /// Nonce shared by every recipient box.
    pub recipient_nonce: [u8; AES_NONCE_LENGTH],
    /// Recipient keys, index-aligned with `recipient_boxes` when present.
    pub recipient_keys: Vec<PublicKey>,
    pub privacy_mode: PrivacyMode,
    /// Transactions this one depends on, with the security hash each party
    /// expects them to have.
    pub affected_contract_transactions: BTreeMap<MessageHash, SecurityHash>,
    /// Execution hash for private state validation. Empty otherwise.
    pub exec_hash: Vec<u8>,
}

impl EncodedPayload {
    /// Content hash of the payload: SHA-512 of the ciphertext. Identical for
    /// every view of the same transaction.
    pub fn message_hash(&self) -> MessageHash {
        MessageHash::of_cipher_text(&self.cipher_text)
    }

    /// Whether `key` is one of the visible recipients.
    pub fn has_recipient(&self, key: &PublicKey) -> bool {
        self.recipient_keys.contains(key)
    }

    /// The box aligned with `key`, if the key is listed and a box sits at
    /// its index.
    pub fn recipient_box(&self, key: &PublicKey) -> Option<&[u8]> {
        let index = self.recipient_keys.iter().position(|k| k == key)?;
        self.recipient_boxes.get(index).map(Vec::as_slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(byte: u8) -> PublicKey {
        PublicKey::from_bytes([byte; 32])
    }

    #[test]
    fn test_only_standard_private_is_standard() {
        assert!(PrivacyMode::StandardPrivate.is_standard());
        assert!(!PrivacyMode::PartyProtection.is_standard());
        assert!(!PrivacyMode::PrivateStateValidation.is_standard());
    }

    #[test]
    fn test_recipient_box_is_index_aligned() {
        let payload = EncodedPayload {
            recipient_keys: vec![key(1), key(2)],
            recipient_boxes: vec![b"one".to_vec(), b"two".to_vec()],
            ..Default::default()
        };
        assert_eq!(payload.recipient_box(&key(2)), Some(&b"two"[..]));
        assert_eq!(payload.recipient_box(&key(3)), None);
    }

    #[test]
    fn test_message_hash_ignores_recipient_view() {
        let full = EncodedPayload {
            cipher_text: b"ct".to_vec(),
            recipient_keys: vec![key(1), key(2)],
            recipient_boxes: vec![b"one".to_vec(), b"two".to_vec()],
            ..Default::default()
        };
        let narrowed = EncodedPayload {
            recipient_keys: vec![key(2)],
            recipient_boxes: vec![b"two".to_vec()],
            ..full.clone()
        };
        assert_eq!(full.message_hash(), narrowed.message_hash());
    }
}
