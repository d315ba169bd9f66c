//! Null journal
//!
//! Accepts and discards every log call, collects nothing. Useful when the
//! transaction manager is used purely for local transactions and durability
//! is explicitly not wanted. Recovery over a null journal presumes abort for
//! everything.

use crate::record::JournalRecord;
use crate::records::JournalRecords;
use crate::Journal;
use dtx_core::{Result, TxStatus, Uid};
use std::collections::{BTreeSet, HashMap};

/// Journal that persists nothing
#[derive(Debug, Default)]
pub struct NullJournal;

impl NullJournal {
    /// Create a null journal
    pub fn new() -> NullJournal {
        NullJournal
    }
}

impl Journal for NullJournal {
    fn open(&self) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn log(&self, _status: TxStatus, _gtrid: &Uid, _unique_names: &BTreeSet<String>) -> Result<()> {
        Ok(())
    }

    fn force(&self) -> Result<()> {
        Ok(())
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, JournalRecord>> {
        Ok(HashMap::new())
    }

    fn collect_all_records(&self) -> Result<JournalRecords> {
        Ok(JournalRecords::new())
    }

    fn read_records(
        &self,
        _include_invalid: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<JournalRecord>> + Send + '_>> {
        Ok(Box::new(std::iter::empty()))
    }
}
