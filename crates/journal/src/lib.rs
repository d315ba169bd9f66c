//! Durable transaction status journal
//!
//! This crate implements the append-only, force-flushed, CRC-protected log of
//! transaction status records that backs two-phase-commit recovery:
//! - `record`: binary framing of one record + CRC-32
//! - `header` / `cursor` / `appender`: the fragment file primitives
//! - `disk`: the two-fragment circular `DiskJournal`
//! - `multiplexed`: the high-availability dual-journal variant
//! - `null`: the accept-and-discard journal
//!
//! ## Durability model
//!
//! `log` appends a record and updates the fragment's write cursor in the same
//! critical section; `force` seals both with a single fsync, so a cursor can
//! never be recovered pointing past an unflushed record. A `force()`
//! establishes a happens-before edge between all prior `log` calls and any
//! later observer, including crash recovery in the next process.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod appender;
pub mod config;
pub mod cursor;
pub mod disk;
pub mod header;
pub mod multiplexed;
pub mod null;
pub mod record;
pub mod records;

pub use config::DiskJournalConfig;
pub use disk::DiskJournal;
pub use multiplexed::MultiplexedJournal;
pub use null::NullJournal;
pub use record::JournalRecord;
pub use records::JournalRecords;

use dtx_core::{Result, TxStatus, Uid};
use std::collections::{BTreeSet, HashMap};

/// Transaction journal contract
///
/// All methods take `&self`; implementations synchronize internally so the
/// journal can be shared across application threads behind an `Arc`.
///
/// Lifecycle: `open` → (`log` | `force` | `collect_*` | `read_records`)* →
/// `close` → `shutdown`. Operations on an unopened or closed journal fail
/// fast with `InvalidState`.
pub trait Journal: Send + Sync {
    /// Acquire the on-disk resources and load the write cursor
    fn open(&self) -> Result<()>;

    /// Persist the cursor and release file handles; idempotent
    fn close(&self) -> Result<()>;

    /// Release background resources (worker threads); idempotent
    fn shutdown(&self) -> Result<()>;

    /// Append one status record for the transaction `gtrid`
    ///
    /// `unique_names` are the names of the resources participating in the
    /// transaction; recovery matches in-doubt branches against them.
    fn log(&self, status: TxStatus, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()>;

    /// Durability fence: all previously logged records survive a crash
    fn force(&self) -> Result<()>;

    /// Collect records with a `Committing` not yet matched by a `Committed`
    fn collect_dangling_records(&self) -> Result<HashMap<Uid, JournalRecord>>;

    /// Collect all records, bucketed into dangling / committed / corrupted
    fn collect_all_records(&self) -> Result<JournalRecords>;

    /// Lazily iterate every record in the journal; finite, not restartable
    ///
    /// With `include_invalid`, records whose CRC does not match are still
    /// yielded (structural damage is always reported as an `Err` item).
    fn read_records(
        &self,
        include_invalid: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<JournalRecord>> + Send + '_>>;
}
