//! # Payload Codec
//!
//! Converts [`EncodedPayload`] to and from its opaque byte form, and derives
//! the per-recipient views resend publishes.
//!
//! The byte format is owned by the encoder implementation. The bundled
//! [`BincodePayloadEncoder`] uses bincode with its default (fixed-int,
//! little-endian) configuration, so `decode(encode(p)) == p` and encoding is
//! deterministic for a given payload.

use thiserror::Error;

use super::types::EncodedPayload;
use crate::crypto::PublicKey;

/// Errors raised by payload encoding, decoding and view derivation.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("failed to decode payload: {0}")]
    Decode(String),

    #[error("failed to encode payload: {0}")]
    Encode(String),

    #[error("recipient {0} is not a recipient of this payload")]
    RecipientNotFound(PublicKey),
}

/// Encoding and view derivation for payloads.
///
/// `for_recipient` and `with_recipient` have default implementations in
/// terms of the payload fields; encoders only need to supply the byte
/// format.
pub trait PayloadEncoder: Send + Sync {
    fn encode(&self, payload: &EncodedPayload) -> Result<Vec<u8>, PayloadError>;

    fn decode(&self, raw: &[u8]) -> Result<EncodedPayload, PayloadError>;

    /// Narrow a sender-side payload to the view `recipient` is entitled to:
    /// its own key and its own box, nothing else.
    fn for_recipient(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> Result<EncodedPayload, PayloadError> {
        let index = payload
            .recipient_keys
            .iter()
            .position(|k| k == recipient)
            .ok_or(PayloadError::RecipientNotFound(*recipient))?;
        let sealed_box = payload
            .recipient_boxes
            .get(index)
            .cloned()
            .ok_or(PayloadError::RecipientNotFound(*recipient))?;

        Ok(EncodedPayload {
            recipient_keys: vec![*recipient],
            recipient_boxes: vec![sealed_box],
            ..payload.clone()
        })
    }

    /// Make sure `recipient` is listed on the payload. Boxes are untouched;
    /// a recipient-held view has its single box already.
    fn with_recipient(
        &self,
        payload: &EncodedPayload,
        recipient: &PublicKey,
    ) -> EncodedPayload {
        let mut view = payload.clone();
        if !view.recipient_keys.contains(recipient) {
            view.recipient_keys.push(*recipient);
        }
        view
    }
}

/// bincode-backed [`PayloadEncoder`].
#[derive(Debug, Clone, Copy, Default)]
pub struct BincodePayloadEncoder;

impl PayloadEncoder for BincodePayloadEncoder {
    fn encode(&self, payload: &EncodedPayload) -> Result<Vec<u8>, PayloadError> {
        bincode::serialize(payload).map_err(|e| PayloadError::Encode(e.to_string()))
    }

    fn decode(&self, raw: &[u8]) -> Result<EncodedPayload, PayloadError> {
        bincode::deserialize(raw).map_err(|e| PayloadError::Decode(e.to_string()))
    }
}
