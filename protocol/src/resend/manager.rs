//! # Batch Resend Orchestrator
//!
//! Two directions of the same repair protocol.
//!
//! **Outbound** (`resend_batch`): walk the primary store page by page and
//! publish, to the peer owning the requested key, every view of every
//! transaction that peer is entitled to. The local node is either the
//! transaction's sender, a recipient relaying it back, or uninvolved.
//!
//! **Inbound** (`store_resend_batch`, `perform_staging`, `perform_sync`,
//! `cleanup_staging_area`): accumulate pushed views in the staging area,
//! order them by dependency depth, and commit them through the bypass
//! commit path so that a resync never triggers another resend.
//!
//! ## Role resolution
//!
//! ```text
//! sender key owned locally ────────────────────────────▶ Sender
//! target is the sender, or a visible recipient ─┬─ owned key opens it ──▶ RecipientRelay
//!                                               └─ no owned key does ───▶ KeyNotFound (abort)
//! otherwise ───────────────────────────────────────────▶ Unrelated (skip)
//! ```
//!
//! A relay row that no owned key can open means the local store holds a
//! payload the node cannot account for. That is a correctness gap, so it
//! aborts the whole run rather than skipping the row.

use std::collections::BTreeSet;
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use tracing::{debug, info, warn};

use super::delegate::{ResendStoreDelegate, StoreError};
use super::error::ResendError;
use super::publisher::PeerPublisher;
use super::types::{
    PushBatchRequest, ResendBatchRequest, ResendBatchResponse, ResyncOutcome, SyncReport,
};
use crate::config::ResyncConfig;
use crate::crypto::PublicKey;
use crate::enclave::{Enclave, EnclaveError, EnclaveStatus};
use crate::payload::{EncodedPayload, PayloadEncoder};
use crate::storage::{
    EncryptedTransactionStore, StagingRecipient, StagingStore, StagingTransactionVersion,
};

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The resend, staging and sync operations of a node.
pub trait BatchResendManager: Send + Sync {
    /// Whether this node takes part in resend at all. Captured at
    /// construction.
    fn is_resend_mode(&self) -> bool;

    /// Wipe the staging area. Returns the number of rows removed.
    fn cleanup_staging_area(&self) -> Result<u64, ResendError>;

    /// Re-publish every transaction `request.public_key` is entitled to.
    fn resend_batch(&self, request: &ResendBatchRequest)
        -> Result<ResendBatchResponse, ResendError>;

    /// Stage every payload of an incoming batch.
    fn store_resend_batch(&self, request: &PushBatchRequest) -> Result<(), ResendError>;

    /// Assign validation stages and report how much of the area is staged.
    fn perform_staging(&self) -> Result<ResyncOutcome, ResendError>;

    /// Commit staged rows, returning the counters behind the outcome.
    fn sync_with_report(&self) -> Result<SyncReport, ResendError>;

    /// Commit staged rows in `(stage, hash)` order.
    fn perform_sync(&self) -> Result<ResyncOutcome, ResendError> {
        self.sync_with_report().map(|report| report.outcome)
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// What the local node is to a payload, relative to the requested target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Sender,
    RecipientRelay { owned_key: PublicKey },
    Unrelated,
}

// ---------------------------------------------------------------------------
// BatchResendManagerImpl
// ---------------------------------------------------------------------------

/// [`BatchResendManager`] composed from its collaborators.
pub struct BatchResendManagerImpl {
    encoder: Arc<dyn PayloadEncoder>,
    enclave: Arc<dyn Enclave>,
    transactions: Arc<dyn EncryptedTransactionStore>,
    staging: Arc<dyn StagingStore>,
    publisher: Arc<dyn PeerPublisher>,
    delegate: Arc<dyn ResendStoreDelegate>,
    config: ResyncConfig,
}

/// Views waiting to be published to one target.
struct Outbox<'a> {
    publisher: &'a dyn PeerPublisher,
    target: PublicKey,
    limit: usize,
    pending: Vec<EncodedPayload>,
    published_batches: u64,
}

impl<'a> Outbox<'a> {
    fn push(&mut self, view: EncodedPayload) {
        self.pending.push(view);
        if self.pending.len() >= self.limit {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        debug!(target_key = %self.target, views = self.pending.len(), "publishing resend batch");
        self.publisher.publish_batch(&self.pending, &self.target);
        self.pending.clear();
        self.published_batches += 1;
    }
}

impl BatchResendManagerImpl {
    pub fn new(
        encoder: Arc<dyn PayloadEncoder>,
        enclave: Arc<dyn Enclave>,
        transactions: Arc<dyn EncryptedTransactionStore>,
        staging: Arc<dyn StagingStore>,
        publisher: Arc<dyn PeerPublisher>,
        delegate: Arc<dyn ResendStoreDelegate>,
        config: ResyncConfig,
    ) -> Self {
        Self {
            encoder,
            enclave,
            transactions,
            staging,
            publisher,
            delegate,
            config,
        }
    }

    fn resolve_role(
        &self,
        payload: &EncodedPayload,
        owned: &BTreeSet<PublicKey>,
        target: &PublicKey,
    ) -> Result<Role, ResendError> {
        if owned.contains(&payload.sender_key) {
            return Ok(Role::Sender);
        }
        if payload.sender_key != *target && !payload.has_recipient(target) {
            return Ok(Role::Unrelated);
        }

        for key in owned {
            match self.enclave.unencrypt_transaction(payload, key) {
                Ok(_) => return Ok(Role::RecipientRelay { owned_key: *key }),
                Err(EnclaveError::Unavailable) => return Err(ResendError::EnclaveUnavailable),
                Err(_) => continue,
            }
        }

        Err(ResendError::KeyNotFound(format!(
            "No key found as recipient of message {}",
            STANDARD.encode(&payload.cipher_text)
        )))
    }

    /// The view of `payload` the target should receive, if any.
    fn view_for_target(
        &self,
        payload: &EncodedPayload,
        role: Role,
        target: &PublicKey,
    ) -> Result<Option<EncodedPayload>, ResendError> {
        let view = match role {
            Role::Sender if !payload.has_recipient(target) => None,
            Role::Sender if payload.privacy_mode.is_standard() => {
                Some(self.encoder.for_recipient(payload, target)?)
            }
            Role::Sender => Some(payload.clone()),
            Role::RecipientRelay { owned_key } => {
                Some(self.encoder.with_recipient(payload, &owned_key))
            }
            Role::Unrelated => None,
        };
        Ok(view)
    }
}

impl BatchResendManager for BatchResendManagerImpl {
    fn is_resend_mode(&self) -> bool {
        self.config.resend_mode
    }

    fn cleanup_staging_area(&self) -> Result<u64, ResendError> {
        Ok(self
            .staging
            .clean_staging_area(self.config.cleanup_batch_size)?)
    }

    fn resend_batch(
        &self,
        request: &ResendBatchRequest,
    ) -> Result<ResendBatchResponse, ResendError> {
        if self.enclave.status() != EnclaveStatus::Started {
            return Err(ResendError::EnclaveUnavailable);
        }
        if request.batch_size == 0 {
            return Err(ResendError::InvalidBatchSize);
        }
        let target = PublicKey::from_base64(&request.public_key)?;
        let page_size = request.batch_size as usize;
        let owned = self.enclave.public_keys();

        let initial_count = self.transactions.transaction_count()?;
        let mut outbox = Outbox {
            publisher: self.publisher.as_ref(),
            target,
            limit: page_size,
            pending: Vec::new(),
            published_batches: 0,
        };

        let mut examined = 0u64;
        let mut offset = 0usize;
        while (offset as u64) < initial_count {
            let remaining = usize::try_from(initial_count - offset as u64).unwrap_or(usize::MAX);
            let page = self
                .transactions
                .retrieve_transactions(offset, page_size.min(remaining))?;
            if page.is_empty() {
                break;
            }
            debug!(offset, rows = page.len(), "resend page");

            for row in &page {
                examined += 1;
                let payload = self.encoder.decode(&row.encoded_payload)?;
                let role = self.resolve_role(&payload, &owned, &target)?;
                if let Some(view) = self.view_for_target(&payload, role, &target)? {
                    outbox.push(view);
                }
            }
            offset += page.len();
        }
        outbox.flush();

        let final_count = self.transactions.transaction_count()?;
        if final_count != initial_count {
            warn!(
                initial_count,
                final_count, "primary store row count changed during resend"
            );
        }

        info!(
            target_key = %target,
            examined,
            batches = outbox.published_batches,
            "resend batch complete"
        );
        Ok(ResendBatchResponse { total: examined })
    }

    fn store_resend_batch(&self, request: &PushBatchRequest) -> Result<(), ResendError> {
        for raw in &request.encoded_payloads {
            let payload = self.encoder.decode(raw)?;
            let hash = payload.message_hash();
            let recipient = StagingRecipient::from_payload(&payload);
            let version = StagingTransactionVersion::new(raw.clone(), &payload);
            self.staging.upsert_version(&hash, recipient, version)?;
        }
        info!(
            payloads = request.encoded_payloads.len(),
            "resend batch staged"
        );
        Ok(())
    }

    fn perform_staging(&self) -> Result<ResyncOutcome, ResendError> {
        self.staging
            .perform_staging(self.config.staging_batch_size)?;
        let total = self.staging.count_all()?;
        let staged = self.staging.count_staged()?;

        let outcome = ResyncOutcome::from_staging(total, staged);
        info!(total, staged, ?outcome, "staging complete");
        Ok(outcome)
    }

    fn sync_with_report(&self) -> Result<SyncReport, ResendError> {
        let initial_count = self.staging.count_all()?;
        let page_size = self.config.sync_page_size.max(1);

        let mut attempted = 0u64;
        let mut violations = 0u64;
        let mut offset = 0usize;
        while (offset as u64) < initial_count {
            let page = self
                .staging
                .retrieve_transaction_batch_order_by_stage_and_hash(offset, page_size)?;
            if page.is_empty() {
                break;
            }

            for row in &page {
                if let Some(issues) = &row.issues {
                    debug!(hash = %row.hash, %issues, "syncing row with recorded issues");
                }
                for version in row.versions.values() {
                    attempted += 1;
                    match self
                        .delegate
                        .store_payload_bypass_resend_mode(&version.payload)
                    {
                        Ok(_) => {}
                        Err(StoreError::PrivacyViolation(reason)) => {
                            violations += 1;
                            warn!(hash = %row.hash, %reason, "staged version rejected");
                        }
                        Err(other) => return Err(other.into()),
                    }
                }
            }
            offset += page.len();
        }

        let final_count = self.staging.count_all()?;
        if final_count != initial_count {
            debug!(initial_count, final_count, "staging row count changed during sync");
        }

        let report = SyncReport::new(attempted, violations);
        info!(attempted, violations, outcome = ?report.outcome, "sync complete");
        Ok(report)
    }
}
