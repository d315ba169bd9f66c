//! Bucketed result of a full journal scan

use crate::record::JournalRecord;
use dtx_core::{TxStatus, Uid};
use std::collections::{BTreeSet, HashMap};

/// All records of a journal, bucketed by their recovery relevance
///
/// - `dangling`: a `Committing` was logged for the gtrid but no matching
///   `Committed` has been seen (yet); recovery must finish these
/// - `committed`: a `Committed` closed the transaction
/// - `corrupted`: scan indices of records that failed a structural or CRC
///   check (only populated when corrupted-record skipping is enabled)
#[derive(Debug, Default)]
pub struct JournalRecords {
    dangling: HashMap<Uid, JournalRecord>,
    committed: HashMap<Uid, JournalRecord>,
    corrupted: BTreeSet<usize>,
}

impl JournalRecords {
    /// Empty result
    pub fn new() -> JournalRecords {
        JournalRecords::default()
    }

    /// Build from pre-computed maps (multiplexed merge path)
    pub fn from_maps(
        dangling: HashMap<Uid, JournalRecord>,
        committed: HashMap<Uid, JournalRecord>,
    ) -> JournalRecords {
        JournalRecords {
            dangling,
            committed,
            corrupted: BTreeSet::new(),
        }
    }

    /// Fold one scanned record into the buckets
    ///
    /// `Committing` marks the gtrid dangling; `Committed` clears the dangling
    /// entry (if any) and marks it committed, also when no `Committing`
    /// preceded it. Duplicates are idempotent. Other statuses are
    /// informational and not tracked.
    pub fn apply(&mut self, record: JournalRecord) {
        match record.tx_status() {
            Some(TxStatus::Committing) => {
                self.dangling.insert(record.gtrid().clone(), record);
            }
            Some(TxStatus::Committed) => {
                self.dangling.remove(record.gtrid());
                self.committed.insert(record.gtrid().clone(), record);
            }
            _ => {}
        }
    }

    /// Record the scan index of a corrupted record
    pub fn mark_corrupted(&mut self, record_index: usize) {
        self.corrupted.insert(record_index);
    }

    /// Records with an unmatched `Committing`
    pub fn dangling(&self) -> &HashMap<Uid, JournalRecord> {
        &self.dangling
    }

    /// Records closed by a `Committed`
    pub fn committed(&self) -> &HashMap<Uid, JournalRecord> {
        &self.committed
    }

    /// Scan indices of corrupted records
    pub fn corrupted(&self) -> &BTreeSet<usize> {
        &self.corrupted
    }

    /// Consume into the dangling map
    pub fn into_dangling(self) -> HashMap<Uid, JournalRecord> {
        self.dangling
    }

    /// Decompose into the two record maps, dropping corruption info
    pub fn into_maps(self) -> (HashMap<Uid, JournalRecord>, HashMap<Uid, JournalRecord>) {
        (self.dangling, self.committed)
    }
}
