use crate::crypto::PublicKey;
use crate::payload::EncodedPayload;

/// Delivers payload views to the peer owning a key.
///
/// Fire-and-forget: delivery failures are the transport's to log or retry.
pub trait PeerPublisher: Send + Sync {
    fn publish_batch(&self, payloads: &[EncodedPayload], recipient: &PublicKey);
}
