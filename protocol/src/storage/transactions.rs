//! # Primary Transaction Store
//!
//! Durable home of every private transaction the node knows about, keyed by
//! message hash. Resend only reads it; the commit path in
//! [`crate::resend::delegate`] is the only writer in this crate.

use serde::{Deserialize, Serialize};
use sled::Tree;

use super::db::{decode_value, encode_value, DbResult, ResyncDb};
use crate::crypto::MessageHash;

/// A committed private transaction: its hash and the encoded payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedTransaction {
    pub hash: MessageHash,
    pub encoded_payload: Vec<u8>,
}

impl EncryptedTransaction {
    pub fn new(hash: MessageHash, encoded_payload: Vec<u8>) -> Self {
        Self {
            hash,
            encoded_payload,
        }
    }
}

/// Query and command contract of the primary store.
pub trait EncryptedTransactionStore: Send + Sync {
    /// Up to `max_results` rows starting at `offset`, in a stable order.
    fn retrieve_transactions(
        &self,
        offset: usize,
        max_results: usize,
    ) -> DbResult<Vec<EncryptedTransaction>>;

    fn transaction_count(&self) -> DbResult<u64>;

    /// Insert or replace the row for `transaction.hash`.
    fn save(&self, transaction: &EncryptedTransaction) -> DbResult<()>;

    fn find_by_hash(&self, hash: &MessageHash) -> DbResult<Option<EncryptedTransaction>>;
}

/// [`EncryptedTransactionStore`] over the `encrypted_transactions` tree.
#[derive(Debug, Clone)]
pub struct SledTransactionStore {
    tree: Tree,
}

impl SledTransactionStore {
    pub fn new(db: &ResyncDb) -> Self {
        Self {
            tree: db.encrypted_transactions(),
        }
    }
}

impl EncryptedTransactionStore for SledTransactionStore {
    fn retrieve_transactions(
        &self,
        offset: usize,
        max_results: usize,
    ) -> DbResult<Vec<EncryptedTransaction>> {
        let mut page = Vec::with_capacity(max_results.min(1024));
        for entry in self.tree.iter().skip(offset).take(max_results) {
            let (_key, value) = entry?;
            page.push(decode_value(&value)?);
        }
        Ok(page)
    }

    fn transaction_count(&self) -> DbResult<u64> {
        Ok(self.tree.len() as u64)
    }

    fn save(&self, transaction: &EncryptedTransaction) -> DbResult<()> {
        self.tree
            .insert(transaction.hash.as_bytes(), encode_value(transaction)?)?;
        Ok(())
    }

    fn find_by_hash(&self, hash: &MessageHash) -> DbResult<Option<EncryptedTransaction>> {
        match self.tree.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SledTransactionStore {
        SledTransactionStore::new(&ResyncDb::open_temporary().unwrap())
    }

    fn tx(byte: u8) -> EncryptedTransaction {
        EncryptedTransaction::new(MessageHash::new(vec![byte; 64]), vec![byte, byte])
    }

    #[test]
    fn save_and_find() {
        let store = store();
        store.save(&tx(1)).unwrap();

        assert_eq!(store.find_by_hash(&tx(1).hash).unwrap(), Some(tx(1)));
        assert_eq!(store.find_by_hash(&tx(2).hash).unwrap(), None);
        assert_eq!(store.transaction_count().unwrap(), 1);
    }

    #[test]
    fn save_replaces_existing_row() {
        let store = store();
        store.save(&tx(1)).unwrap();
        let replacement = EncryptedTransaction::new(tx(1).hash, b"merged".to_vec());
        store.save(&replacement).unwrap();

        assert_eq!(store.transaction_count().unwrap(), 1);
        assert_eq!(store.find_by_hash(&tx(1).hash).unwrap(), Some(replacement));
    }

    #[test]
    fn paging_walks_rows_in_hash_order() {
        let store = store();
        for byte in [5u8, 1, 3, 2, 4] {
            store.save(&tx(byte)).unwrap();
        }

        let first = store.retrieve_transactions(0, 2).unwrap();
        let second = store.retrieve_transactions(2, 2).unwrap();
        let third = store.retrieve_transactions(4, 2).unwrap();
        let past_end = store.retrieve_transactions(5, 2).unwrap();

        assert_eq!(first, vec![tx(1), tx(2)]);
        assert_eq!(second, vec![tx(3), tx(4)]);
        assert_eq!(third, vec![tx(5)]);
        assert!(past_end.is_empty());
    }
}
