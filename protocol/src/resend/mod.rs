//! # Resend
//!
//! Batch resend, staging and sync: the anti-entropy loop between nodes.
//!
//! ```text
//! peer asks ──▶ resend_batch ──▶ PeerPublisher ──▶ peer
//!
//! peer pushes ──▶ store_resend_batch ──▶ staging area
//!                                           │ perform_staging
//!                                           ▼
//!                 primary store ◀── perform_sync (bypass commit path)
//!                                           │ on success
//!                                           ▼
//!                                  cleanup_staging_area
//! ```

pub mod delegate;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod types;

pub use delegate::{ResendStoreDelegate, StoreError, TransactionCommitter};
pub use error::ResendError;
pub use manager::{BatchResendManager, BatchResendManagerImpl};
pub use publisher::PeerPublisher;
pub use types::{
    PushBatchRequest, ResendBatchRequest, ResendBatchResponse, ResyncOutcome, SyncReport,
};
