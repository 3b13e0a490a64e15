//! # Storage Module
//!
//! Persistence for the resync pipeline.
//!
//! ```text
//! db.rs: sled database handle, tree layout, value codec
//! transactions.rs: primary store of committed encrypted transactions
//! staging.rs: staging area for payload views received from peers
//! ```
//!
//! Both stores are defined as traits so the resend orchestrator can run
//! against any backend; the sled implementations are what the node uses.
//! Values are bincode on disk. JSON is for the node's API only.

pub mod db;
pub mod staging;
pub mod transactions;

pub use db::{DbError, DbResult, ResyncDb};
pub use staging::{
    SledStagingStore, StagingRecipient, StagingStore, StagingTransaction,
    StagingTransactionVersion,
};
pub use transactions::{EncryptedTransaction, EncryptedTransactionStore, SledTransactionStore};
