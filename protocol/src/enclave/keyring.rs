//! # Keyring Enclave
//!
//! An in-process [`Enclave`] holding X25519 keypairs in memory.
//!
//! ## Payload construction
//!
//! 1. Draw a random 32-byte master key and two random nonces.
//! 2. Seal the plaintext under the master key with the ciphertext nonce.
//! 3. For every recipient, derive the pairwise box key from
//!    `X25519(sender, recipient)` and seal the master key under it with the
//!    shared recipient nonce.
//!
//! Opening runs the same derivation from whichever side the local key is
//! on. The sender opens through any recipient's box; a recipient opens
//! through its own.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use tracing::{debug, info};

use super::{Enclave, EnclaveError, EnclaveStatus};
use crate::crypto::encryption::{open_master_key, random_key, random_nonce};
use crate::crypto::{derive_box_key, open, seal, KeyPair, PublicKey};
use crate::payload::EncodedPayload;

/// Enclave backed by an in-memory keyring.
pub struct KeyringEnclave {
    keys: BTreeMap<PublicKey, KeyPair>,
    status: RwLock<EnclaveStatus>,
}

impl KeyringEnclave {
    /// Build a started enclave owning `keypairs`.
    pub fn new(keypairs: Vec<KeyPair>) -> Self {
        let keys = keypairs
            .into_iter()
            .map(|kp| (kp.public_key(), kp))
            .collect::<BTreeMap<_, _>>();
        info!(owned_keys = keys.len(), "keyring enclave started");
        Self {
            keys,
            status: RwLock::new(EnclaveStatus::Started),
        }
    }

    /// Build an enclave with one freshly generated key.
    pub fn generate() -> Self {
        Self::new(vec![KeyPair::generate()])
    }

    pub fn start(&self) {
        *self.status.write() = EnclaveStatus::Started;
    }

    pub fn stop(&self) {
        *self.status.write() = EnclaveStatus::Stopped;
    }

    /// Encrypt `plaintext` from the owned key `sender` to `recipients`.
    ///
    /// The result is a sender-side standard private payload; callers set the
    /// privacy mode and affected transactions afterwards as needed.
    pub fn encrypt_payload(
        &self,
        plaintext: &[u8],
        sender: &PublicKey,
        recipients: &[PublicKey],
    ) -> Result<EncodedPayload, EnclaveError> {
        self.ensure_started()?;
        let sender_pair = self.keys.get(sender).ok_or(EnclaveError::KeyNotFound)?;

        let master_key = random_key();
        let cipher_text_nonce = random_nonce();
        let recipient_nonce = random_nonce();

        let cipher_text = seal(&master_key, &cipher_text_nonce, plaintext)?;
        let recipient_boxes = recipients
            .iter()
            .map(|recipient| {
                let shared = sender_pair.diffie_hellman(recipient);
                let box_key = derive_box_key(&shared, sender, recipient);
                seal(&box_key, &recipient_nonce, &master_key)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(EncodedPayload {
            sender_key: *sender,
            cipher_text,
            cipher_text_nonce,
            recipient_boxes,
            recipient_nonce,
            recipient_keys: recipients.to_vec(),
            ..Default::default()
        })
    }

    fn ensure_started(&self) -> Result<(), EnclaveError> {
        match *self.status.read() {
            EnclaveStatus::Started => Ok(()),
            EnclaveStatus::Stopped => Err(EnclaveError::Unavailable),
        }
    }

    /// `(box, counterparty)` pairs the owned key `ours` could open.
    fn candidate_boxes<'a>(
        &self,
        payload: &'a EncodedPayload,
        ours: &PublicKey,
    ) -> Vec<(&'a [u8], PublicKey)> {
        if payload.sender_key == *ours {
            return payload
                .recipient_keys
                .iter()
                .zip(payload.recipient_boxes.iter())
                .map(|(key, sealed)| (sealed.as_slice(), *key))
                .collect();
        }
        match payload.recipient_box(ours) {
            Some(sealed) => vec![(sealed, payload.sender_key)],
            None => payload
                .recipient_boxes
                .iter()
                .map(|sealed| (sealed.as_slice(), payload.sender_key))
                .collect(),
        }
    }
}

impl Enclave for KeyringEnclave {
    fn public_keys(&self) -> BTreeSet<PublicKey> {
        self.keys.keys().copied().collect()
    }

    fn status(&self) -> EnclaveStatus {
        *self.status.read()
    }

    fn unencrypt_transaction(
        &self,
        payload: &EncodedPayload,
        provided_key: &PublicKey,
    ) -> Result<Vec<u8>, EnclaveError> {
        self.ensure_started()?;
        let pair = self.keys.get(provided_key).ok_or(EnclaveError::KeyNotFound)?;

        for (sealed, counterparty) in self.candidate_boxes(payload, provided_key) {
            let shared = pair.diffie_hellman(&counterparty);
            let box_key = derive_box_key(&shared, provided_key, &counterparty);
            if let Ok(master_key) = open_master_key(&box_key, &payload.recipient_nonce, sealed) {
                let plaintext = open(&master_key, &payload.cipher_text_nonce, &payload.cipher_text)?;
                return Ok(plaintext);
            }
        }

        debug!(key = %provided_key, "no recipient box opened with provided key");
        Err(EnclaveError::KeyNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{BincodePayloadEncoder, PayloadEncoder};

    fn two_party() -> (KeyringEnclave, PublicKey, KeyringEnclave, PublicKey) {
        let sender = KeyPair::generate();
        let recipient = KeyPair::generate();
        let (s, r) = (sender.public_key(), recipient.public_key());
        (
            KeyringEnclave::new(vec![sender]),
            s,
            KeyringEnclave::new(vec![recipient]),
            r,
        )
    }

    #[test]
    fn test_recipient_opens_narrowed_view() {
        let (sender_node, s, recipient_node, r) = two_party();
        let payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();
        let view = BincodePayloadEncoder.for_recipient(&payload, &r).unwrap();

        assert_eq!(recipient_node.unencrypt_transaction(&view, &r).unwrap(), b"hello");
    }

    #[test]
    fn test_recipient_opens_box_without_listed_key() {
        let (sender_node, s, recipient_node, r) = two_party();
        let mut payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();
        payload.recipient_keys.clear();

        assert_eq!(recipient_node.unencrypt_transaction(&payload, &r).unwrap(), b"hello");
    }

    #[test]
    fn test_sender_opens_own_payload() {
        let (sender_node, s, _, r) = two_party();
        let payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();
        assert_eq!(sender_node.unencrypt_transaction(&payload, &s).unwrap(), b"hello");
    }

    #[test]
    fn test_only_matching_key_opens_box() {
        let (sender_node, s, _, r) = two_party();
        let outsider_pair = KeyPair::generate();
        let outsider_key = outsider_pair.public_key();
        let outsider = KeyringEnclave::new(vec![outsider_pair]);

        let payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();
        assert!(matches!(
            outsider.unencrypt_transaction(&payload, &outsider_key),
            Err(EnclaveError::KeyNotFound)
        ));
    }

    #[test]
    fn test_unowned_provided_key_is_key_not_found() {
        let (sender_node, s, _, r) = two_party();
        let payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();
        assert!(matches!(
            sender_node.unencrypt_transaction(&payload, &r),
            Err(EnclaveError::KeyNotFound)
        ));
    }

    #[test]
    fn test_stopped_enclave_is_unavailable() {
        let (sender_node, s, _, r) = two_party();
        let payload = sender_node.encrypt_payload(b"hello", &s, &[r]).unwrap();

        sender_node.stop();
        assert_eq!(sender_node.status(), EnclaveStatus::Stopped);
        assert!(matches!(
            sender_node.unencrypt_transaction(&payload, &s),
            Err(EnclaveError::Unavailable)
        ));

        sender_node.start();
        assert_eq!(sender_node.status(), EnclaveStatus::Started);
        assert!(sender_node.unencrypt_transaction(&payload, &s).is_ok());
    }

    #[test]
    fn test_public_keys_lists_owned_keys() {
        let (sender_node, s, _, _) = two_party();
        assert_eq!(sender_node.public_keys(), BTreeSet::from([s]));
    }
}
