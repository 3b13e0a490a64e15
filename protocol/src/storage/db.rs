//! # ResyncDb: Persistent Storage Engine
//!
//! One sled database holds both the primary transaction store and the
//! staging area, each in its own tree:
//!
//! | Tree                     | Key                    | Value                           |
//! |--------------------------|------------------------|---------------------------------|
//! | `encrypted_transactions` | message hash (64B)     | `bincode(EncryptedTransaction)` |
//! | `staging_transactions`   | message hash (64B)     | `bincode(StagingTransaction)`   |
//!
//! Keys are raw hash bytes, so sled's lexicographic iteration order is the
//! bytewise hash order. Paging by `(offset, limit)` over a tree is stable
//! across calls as long as no rows are inserted in between; a resend run
//! that races new inserts may see a row twice or miss it, and re-running is
//! safe.

use serde::{de::DeserializeOwned, Serialize};
use sled::{Db, Tree};
use std::path::Path;

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("key not found: {0}")]
    NotFound(String),
}

pub type DbResult<T> = Result<T, DbError>;

pub(crate) const ENCRYPTED_TRANSACTIONS_TREE: &str = "encrypted_transactions";
pub(crate) const STAGING_TRANSACTIONS_TREE: &str = "staging_transactions";

pub(crate) fn encode_value<T: Serialize>(value: &T) -> DbResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| DbError::Serialization(e.to_string()))
}

pub(crate) fn decode_value<T: DeserializeOwned>(bytes: &[u8]) -> DbResult<T> {
    bincode::deserialize(bytes).map_err(|e| DbError::Serialization(e.to_string()))
}

// ---------------------------------------------------------------------------
// ResyncDb
// ---------------------------------------------------------------------------

/// Handle on the node's sled database.
///
/// Cheap to clone; sled trees are internally reference counted and safe to
/// share across threads.
#[derive(Debug, Clone)]
pub struct ResyncDb {
    db: Db,
    encrypted_transactions: Tree,
    staging_transactions: Tree,
}

impl ResyncDb {
    /// Open or create a database at the given filesystem path.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Create a temporary database that is removed when dropped.
    pub fn open_temporary() -> DbResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> DbResult<Self> {
        let encrypted_transactions = db.open_tree(ENCRYPTED_TRANSACTIONS_TREE)?;
        let staging_transactions = db.open_tree(STAGING_TRANSACTIONS_TREE)?;
        Ok(Self {
            db,
            encrypted_transactions,
            staging_transactions,
        })
    }

    pub fn encrypted_transactions(&self) -> Tree {
        self.encrypted_transactions.clone()
    }

    pub fn staging_transactions(&self) -> Tree {
        self.staging_transactions.clone()
    }

    /// Flush all pending writes to disk.
    pub fn flush(&self) -> DbResult<()> {
        self.db.flush()?;
        Ok(())
    }
}
