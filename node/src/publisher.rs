//! Bridges outbound resend batches onto the node's event channel.
//!
//! Every batch becomes one [`NodeEvent::OutboundBatch`] carrying the
//! hex-encoded payloads, in the same form `/pushBatch` accepts, so a relay
//! subscribed to `/ws` can forward it verbatim to the target peer.

use std::sync::Arc;

use tokio::sync::broadcast;

use ptm_resync::crypto::PublicKey;
use ptm_resync::payload::{EncodedPayload, PayloadEncoder};
use ptm_resync::resend::PeerPublisher;

use crate::api::NodeEvent;
use crate::metrics::SharedMetrics;

/// [`PeerPublisher`] backed by a tokio broadcast channel.
pub struct ChannelPublisher {
    encoder: Arc<dyn PayloadEncoder>,
    event_tx: broadcast::Sender<NodeEvent>,
    metrics: SharedMetrics,
}

impl ChannelPublisher {
    pub fn new(
        encoder: Arc<dyn PayloadEncoder>,
        event_tx: broadcast::Sender<NodeEvent>,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            encoder,
            event_tx,
            metrics,
        }
    }
}

impl PeerPublisher for ChannelPublisher {
    fn publish_batch(&self, payloads: &[EncodedPayload], recipient: &PublicKey) {
        let mut encoded = Vec::with_capacity(payloads.len());
        for payload in payloads {
            match self.encoder.encode(payload) {
                Ok(raw) => encoded.push(hex::encode(raw)),
                Err(e) => {
                    tracing::warn!(hash = %payload.message_hash(), "dropping unencodable payload: {}", e);
                }
            }
        }

        let count = encoded.len();
        let event = NodeEvent::OutboundBatch {
            recipient: recipient.to_base64(),
            encoded_payloads: encoded,
        };
        self.metrics.resend_batches_published_total.inc();

        if self.event_tx.send(event).is_err() {
            tracing::debug!(%recipient, count, "no subscribers for outbound batch");
        } else {
            tracing::debug!(%recipient, count, "outbound batch published");
        }
    }
}
