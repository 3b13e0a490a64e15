//! # Staging Area
//!
//! Scratch storage for payload views received from peers, before they are
//! committed to the primary store.
//!
//! Each row is keyed by message hash and accumulates one version per
//! distinct [`StagingRecipient`]. Pushing the same view twice replaces the
//! version instead of adding one. Rows carry a validation stage once every
//! transaction they depend on is itself staged; sync commits rows in
//! ascending `(stage, hash)` order so dependencies land first.
//!
//! Rows have no meaning outside the resync pipeline. Wiping the area and
//! waiting for peers to push again is always safe.
//!
//! ## Staging pass
//!
//! The pass recomputes every stage from scratch in rounds. Round 1 stages
//! every row without dependencies. Round `n` stages every remaining row
//! whose dependencies were all staged in rounds `1..n`. The pass stops at
//! the first round that stages nothing, so rows with missing or cyclic
//! dependencies stay unstaged. Self references are not dependencies.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use sled::{Batch, IVec, Tree};
use tracing::{debug, info};

use super::db::{decode_value, encode_value, DbResult, ResyncDb};
use crate::crypto::{MessageHash, PublicKey, SecurityHash};
use crate::payload::{EncodedPayload, PrivacyMode};

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Identity of one party's view of a transaction: who sent it and which
/// recipient keys the view carries.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StagingRecipient {
    pub sender: PublicKey,
    pub recipients: BTreeSet<PublicKey>,
}

impl StagingRecipient {
    pub fn from_payload(payload: &EncodedPayload) -> Self {
        Self {
            sender: payload.sender_key,
            recipients: payload.recipient_keys.iter().copied().collect(),
        }
    }
}

/// One received view of a transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingTransactionVersion {
    /// Encoded payload bytes as received.
    pub payload: Vec<u8>,
    pub privacy_mode: PrivacyMode,
    pub affected_contract_transactions: BTreeMap<MessageHash, SecurityHash>,
}

impl StagingTransactionVersion {
    pub fn new(payload: Vec<u8>, decoded: &EncodedPayload) -> Self {
        Self {
            payload,
            privacy_mode: decoded.privacy_mode,
            affected_contract_transactions: decoded.affected_contract_transactions.clone(),
        }
    }
}

/// A staging row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingTransaction {
    pub hash: MessageHash,
    pub versions: BTreeMap<StagingRecipient, StagingTransactionVersion>,
    /// `None` until the staging pass finds every dependency staged.
    pub validation_stage: Option<u64>,
    /// Cross-version inconsistencies found by the staging pass.
    pub issues: Option<String>,
}

impl StagingTransaction {
    pub fn new(hash: MessageHash) -> Self {
        Self {
            hash,
            versions: BTreeMap::new(),
            validation_stage: None,
            issues: None,
        }
    }

    /// Insert or replace the version for `recipient`. The row must be
    /// validated again afterwards.
    pub fn merge_version(
        &mut self,
        recipient: StagingRecipient,
        version: StagingTransactionVersion,
    ) {
        self.versions.insert(recipient, version);
        self.validation_stage = None;
        self.issues = None;
    }

    /// Hashes of every transaction any version depends on.
    pub fn dependencies(&self) -> BTreeSet<&MessageHash> {
        self.versions
            .values()
            .flat_map(|v| v.affected_contract_transactions.keys())
            .filter(|dep| **dep != self.hash)
            .collect()
    }

    /// Describe disagreement between versions, if any.
    pub fn detect_issues(&self) -> Option<String> {
        let mut versions = self.versions.values();
        let first = versions.next()?;

        let mut problems = Vec::new();
        let rest: Vec<_> = versions.collect();
        if rest
            .iter()
            .any(|v| v.affected_contract_transactions != first.affected_contract_transactions)
        {
            problems.push("versions disagree on affected contract transactions");
        }
        if rest.iter().any(|v| v.privacy_mode != first.privacy_mode) {
            problems.push("versions disagree on privacy mode");
        }

        if problems.is_empty() {
            None
        } else {
            Some(problems.join("; "))
        }
    }
}

// ---------------------------------------------------------------------------
// Store Contract
// ---------------------------------------------------------------------------

/// Query and command contract of the staging area.
pub trait StagingStore: Send + Sync {
    /// Atomically create the row for `hash` or merge `version` into it.
    fn upsert_version(
        &self,
        hash: &MessageHash,
        recipient: StagingRecipient,
        version: StagingTransactionVersion,
    ) -> DbResult<StagingTransaction>;

    fn retrieve_by_hash(&self, hash: &MessageHash) -> DbResult<Option<StagingTransaction>>;

    fn count_all(&self) -> DbResult<u64>;

    fn count_staged(&self) -> DbResult<u64>;

    /// Assign validation stages. Writes happen in chunks of `batch_size`.
    fn perform_staging(&self, batch_size: usize) -> DbResult<()>;

    /// Staged rows ordered by `(validation_stage, hash)`; unstaged rows are
    /// never returned.
    fn retrieve_transaction_batch_order_by_stage_and_hash(
        &self,
        offset: usize,
        max_results: usize,
    ) -> DbResult<Vec<StagingTransaction>>;

    /// Delete every row, at most `batch_size` per write. Returns the number
    /// of rows removed.
    fn clean_staging_area(&self, batch_size: usize) -> DbResult<u64>;
}

// ---------------------------------------------------------------------------
// SledStagingStore
// ---------------------------------------------------------------------------

/// [`StagingStore`] over the `staging_transactions` tree.
#[derive(Debug, Clone)]
pub struct SledStagingStore {
    tree: Tree,
}

struct StageUpdate {
    key: IVec,
    read: IVec,
    row: StagingTransaction,
}

impl SledStagingStore {
    pub fn new(db: &ResyncDb) -> Self {
        Self {
            tree: db.staging_transactions(),
        }
    }

    fn load_all(&self) -> DbResult<Vec<(IVec, IVec, StagingTransaction)>> {
        let mut rows = Vec::with_capacity(self.tree.len());
        for entry in self.tree.iter() {
            let (key, value) = entry?;
            let row = decode_value(&value)?;
            rows.push((key, value, row));
        }
        Ok(rows)
    }
}

/// Round-based stage assignment over `rows`.
fn compute_stages(rows: &[StagingTransaction]) -> (BTreeMap<MessageHash, u64>, u64) {
    let mut stages: BTreeMap<MessageHash, u64> = BTreeMap::new();
    let mut round = 1u64;

    loop {
        let ready: Vec<&MessageHash> = rows
            .iter()
            .filter(|row| !stages.contains_key(&row.hash))
            .filter(|row| row.dependencies().iter().all(|dep| stages.contains_key(*dep)))
            .map(|row| &row.hash)
            .collect();
        if ready.is_empty() {
            break;
        }
        for hash in ready {
            stages.insert(hash.clone(), round);
        }
        round += 1;
    }

    (stages, round - 1)
}

impl StagingStore for SledStagingStore {
    fn upsert_version(
        &self,
        hash: &MessageHash,
        recipient: StagingRecipient,
        version: StagingTransactionVersion,
    ) -> DbResult<StagingTransaction> {
        let key = hash.as_bytes();
        loop {
            let current = self.tree.get(key)?;
            let mut row = match &current {
                Some(bytes) => decode_value::<StagingTransaction>(bytes)?,
                None => StagingTransaction::new(hash.clone()),
            };
            row.merge_version(recipient.clone(), version.clone());

            let swapped = self
                .tree
                .compare_and_swap(key, current.as_ref(), Some(encode_value(&row)?))?;
            match swapped {
                Ok(()) => return Ok(row),
                Err(_) => debug!(%hash, "concurrent staging write, retrying upsert"),
            }
        }
    }

    fn retrieve_by_hash(&self, hash: &MessageHash) -> DbResult<Option<StagingTransaction>> {
        match self.tree.get(hash.as_bytes())? {
            Some(bytes) => Ok(Some(decode_value(&bytes)?)),
            None => Ok(None),
        }
    }

    fn count_all(&self) -> DbResult<u64> {
        Ok(self.tree.len() as u64)
    }

    fn count_staged(&self) -> DbResult<u64> {
        let mut staged = 0u64;
        for entry in self.tree.iter() {
            let (_key, value) = entry?;
            let row: StagingTransaction = decode_value(&value)?;
            if row.validation_stage.is_some() {
                staged += 1;
            }
        }
        Ok(staged)
    }

    fn perform_staging(&self, batch_size: usize) -> DbResult<()> {
        let loaded = self.load_all()?;
        let rows: Vec<StagingTransaction> = loaded.iter().map(|(_, _, row)| row.clone()).collect();
        let (stages, rounds) = compute_stages(&rows);

        let updates: Vec<StageUpdate> = loaded
            .into_iter()
            .filter_map(|(key, read, mut row)| {
                let stage = stages.get(&row.hash).copied();
                let issues = row.detect_issues();
                if row.validation_stage == stage && row.issues == issues {
                    return None;
                }
                row.validation_stage = stage;
                row.issues = issues;
                Some(StageUpdate { key, read, row })
            })
            .collect();

        let mut written = 0usize;
        let mut skipped = 0usize;
        for chunk in updates.chunks(batch_size.max(1)) {
            for update in chunk {
                let swapped = self.tree.compare_and_swap(
                    &update.key,
                    Some(&update.read),
                    Some(encode_value(&update.row)?),
                )?;
                match swapped {
                    Ok(()) => written += 1,
                    Err(_) => skipped += 1,
                }
            }
            self.tree.flush()?;
            debug!(chunk = chunk.len(), "staging chunk written");
        }

        info!(
            rows = rows.len(),
            staged = stages.len(),
            rounds,
            written,
            skipped,
            "staging pass complete"
        );
        Ok(())
    }

    fn retrieve_transaction_batch_order_by_stage_and_hash(
        &self,
        offset: usize,
        max_results: usize,
    ) -> DbResult<Vec<StagingTransaction>> {
        let mut staged: Vec<(u64, StagingTransaction)> = Vec::new();
        for entry in self.tree.iter() {
            let (_key, value) = entry?;
            let row: StagingTransaction = decode_value(&value)?;
            if let Some(stage) = row.validation_stage {
                staged.push((stage, row));
            }
        }
        staged.sort_by(|(sa, a), (sb, b)| sa.cmp(sb).then_with(|| a.hash.cmp(&b.hash)));

        Ok(staged
            .into_iter()
            .skip(offset)
            .take(max_results)
            .map(|(_, row)| row)
            .collect())
    }

    fn clean_staging_area(&self, batch_size: usize) -> DbResult<u64> {
        let mut removed = 0u64;
        loop {
            let keys = self
                .tree
                .iter()
                .keys()
                .take(batch_size.max(1))
                .collect::<Result<Vec<_>, _>>()?;
            if keys.is_empty() {
                break;
            }

            removed += keys.len() as u64;
            let mut batch = Batch::default();
            for key in keys {
                batch.remove(key);
            }
            self.tree.apply_batch(batch)?;
        }
        info!(removed, "staging area cleaned");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> SledStagingStore {
        SledStagingStore::new(&ResyncDb::open_temporary().unwrap())
    }

    fn hash(byte: u8) -> MessageHash {
        MessageHash::new(vec![byte; 64])
    }

    fn recipient(sender: u8, to: u8) -> StagingRecipient {
        StagingRecipient {
            sender: PublicKey::from_bytes([sender; 32]),
            recipients: BTreeSet::from([PublicKey::from_bytes([to; 32])]),
        }
    }

    fn version(payload: &[u8], deps: &[u8]) -> StagingTransactionVersion {
        StagingTransactionVersion {
            payload: payload.to_vec(),
            privacy_mode: PrivacyMode::StandardPrivate,
            affected_contract_transactions: deps
                .iter()
                .map(|d| (hash(*d), SecurityHash::new(vec![*d])))
                .collect(),
        }
    }

    fn stage_of(store: &SledStagingStore, byte: u8) -> Option<u64> {
        store
            .retrieve_by_hash(&hash(byte))
            .unwrap()
            .unwrap()
            .validation_stage
    }

    #[test]
    fn upsert_creates_then_merges() {
        let store = store();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[]))
            .unwrap();
        let row = store
            .upsert_version(&hash(1), recipient(9, 3), version(b"b", &[]))
            .unwrap();

        assert_eq!(row.versions.len(), 2);
        assert_eq!(store.count_all().unwrap(), 1);
    }

    #[test]
    fn upsert_is_idempotent_per_recipient() {
        let store = store();
        for _ in 0..3 {
            store
                .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[]))
                .unwrap();
        }
        let row = store.retrieve_by_hash(&hash(1)).unwrap().unwrap();
        assert_eq!(row.versions.len(), 1);
        assert_eq!(row.versions[&recipient(9, 2)].payload, b"a");
    }

    #[test]
    fn upsert_resets_stage() {
        let store = store();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[]))
            .unwrap();
        store.perform_staging(10).unwrap();
        assert_eq!(stage_of(&store, 1), Some(1));

        store
            .upsert_version(&hash(1), recipient(9, 3), version(b"b", &[]))
            .unwrap();
        assert_eq!(stage_of(&store, 1), None);
    }

    #[test]
    fn concurrent_upserts_on_same_hash_all_land() {
        let store = Arc::new(store());
        let handles: Vec<_> = (0..8u8)
            .map(|i| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    store
                        .upsert_version(&hash(1), recipient(9, i), version(&[i], &[]))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let row = store.retrieve_by_hash(&hash(1)).unwrap().unwrap();
        assert_eq!(row.versions.len(), 8);
    }

    #[test]
    fn staging_assigns_stages_by_dependency_depth() {
        let store = store();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"root", &[]))
            .unwrap();
        store
            .upsert_version(&hash(2), recipient(9, 2), version(b"child", &[1]))
            .unwrap();
        store
            .upsert_version(&hash(3), recipient(9, 2), version(b"grandchild", &[1, 2]))
            .unwrap();
        store
            .upsert_version(&hash(4), recipient(9, 2), version(b"orphan", &[7]))
            .unwrap();

        store.perform_staging(2).unwrap();

        assert_eq!(stage_of(&store, 1), Some(1));
        assert_eq!(stage_of(&store, 2), Some(2));
        assert_eq!(stage_of(&store, 3), Some(3));
        assert_eq!(stage_of(&store, 4), None);
        assert_eq!(store.count_staged().unwrap(), 3);
        assert_eq!(store.count_all().unwrap(), 4);
    }

    #[test]
    fn cyclic_dependencies_stay_unstaged() {
        let store = store();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[2]))
            .unwrap();
        store
            .upsert_version(&hash(2), recipient(9, 2), version(b"b", &[1]))
            .unwrap();

        store.perform_staging(10).unwrap();
        assert_eq!(store.count_staged().unwrap(), 0);
    }

    #[test]
    fn self_reference_is_not_a_dependency() {
        let store = store();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[1]))
            .unwrap();
        store.perform_staging(10).unwrap();
        assert_eq!(stage_of(&store, 1), Some(1));
    }

    #[test]
    fn conflicting_versions_get_issues_but_are_staged() {
        let store = store();
        store
            .upsert_version(&hash(5), recipient(9, 2), version(b"dep", &[]))
            .unwrap();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"a", &[]))
            .unwrap();
        store
            .upsert_version(&hash(1), recipient(9, 3), version(b"b", &[5]))
            .unwrap();

        store.perform_staging(10).unwrap();

        let row = store.retrieve_by_hash(&hash(1)).unwrap().unwrap();
        assert_eq!(row.validation_stage, Some(2));
        assert!(row.issues.unwrap().contains("affected contract transactions"));
        let dep = store.retrieve_by_hash(&hash(5)).unwrap().unwrap();
        assert!(dep.issues.is_none());
    }

    #[test]
    fn ordered_retrieval_sorts_by_stage_then_hash() {
        let store = store();
        store
            .upsert_version(&hash(9), recipient(9, 2), version(b"root-9", &[]))
            .unwrap();
        store
            .upsert_version(&hash(1), recipient(9, 2), version(b"child", &[9]))
            .unwrap();
        store
            .upsert_version(&hash(5), recipient(9, 2), version(b"root-5", &[]))
            .unwrap();
        store
            .upsert_version(&hash(3), recipient(9, 2), version(b"unstaged", &[42]))
            .unwrap();
        store.perform_staging(10).unwrap();

        let all = store
            .retrieve_transaction_batch_order_by_stage_and_hash(0, 10)
            .unwrap();
        let order: Vec<_> = all.iter().map(|row| row.hash.clone()).collect();
        assert_eq!(order, vec![hash(5), hash(9), hash(1)]);

        let second_page = store
            .retrieve_transaction_batch_order_by_stage_and_hash(1, 1)
            .unwrap();
        assert_eq!(second_page[0].hash, hash(9));
    }

    #[test]
    fn clean_removes_everything_in_small_chunks() {
        let store = store();
        for byte in 0..7u8 {
            store
                .upsert_version(&hash(byte), recipient(9, 2), version(&[byte], &[]))
                .unwrap();
        }

        assert_eq!(store.clean_staging_area(3).unwrap(), 7);
        assert_eq!(store.count_all().unwrap(), 0);
        assert_eq!(store.clean_staging_area(3).unwrap(), 0);
    }
}
