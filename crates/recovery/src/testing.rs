//! Mock resources and journals for recovery tests
//!
//! `MockResource` plays the role of a resource manager holding in-doubt
//! branches; tests seed it with Xids, run recovery, and inspect which
//! branches got committed or rolled back. Failure injection and a recovery
//! delay cover the error paths and the reentrancy guard. `MockJournal` is an
//! in-memory journal that remembers every log call, so tests can assert on
//! exactly what the recoverer wrote.

use crate::resource::RecoverableResource;
use dtx_core::uid::now_millis;
use dtx_core::{Error, Result, TxStatus, Uid, Xid};
use dtx_journal::{Journal, JournalRecord, JournalRecords};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;

/// In-memory resource manager for tests
pub struct MockResource {
    unique_name: String,
    in_doubt: Mutex<Vec<Xid>>,
    committed: Mutex<Vec<Xid>>,
    rolled_back: Mutex<Vec<Xid>>,
    recovery_delay: Mutex<Duration>,
    fail_commits: AtomicBool,
    fail_rollbacks: AtomicBool,
}

impl MockResource {
    /// Create a mock resource with the given unique name
    pub fn new(unique_name: impl Into<String>) -> MockResource {
        MockResource {
            unique_name: unique_name.into(),
            in_doubt: Mutex::new(Vec::new()),
            committed: Mutex::new(Vec::new()),
            rolled_back: Mutex::new(Vec::new()),
            recovery_delay: Mutex::new(Duration::ZERO),
            fail_commits: AtomicBool::new(false),
            fail_rollbacks: AtomicBool::new(false),
        }
    }

    /// Seed an in-doubt branch
    pub fn add_in_doubt_xid(&self, xid: Xid) {
        self.in_doubt.lock().push(xid);
    }

    /// Make every recovery scan sleep this long first
    pub fn set_recovery_delay(&self, delay: Duration) {
        *self.recovery_delay.lock() = delay;
    }

    /// Make commits fail until cleared
    pub fn set_fail_commits(&self, fail: bool) {
        self.fail_commits.store(fail, Ordering::Relaxed);
    }

    /// Make rollbacks fail until cleared
    pub fn set_fail_rollbacks(&self, fail: bool) {
        self.fail_rollbacks.store(fail, Ordering::Relaxed);
    }

    /// Branches committed so far
    pub fn committed(&self) -> Vec<Xid> {
        self.committed.lock().clone()
    }

    /// Branches rolled back so far
    pub fn rolled_back(&self) -> Vec<Xid> {
        self.rolled_back.lock().clone()
    }

    fn remove_in_doubt(&self, xid: &Xid) -> Result<()> {
        let mut in_doubt = self.in_doubt.lock();
        match in_doubt.iter().position(|x| x == xid) {
            Some(index) => {
                in_doubt.remove(index);
                Ok(())
            }
            None => Err(Error::invalid_input(format!(
                "xid {} is not in doubt on resource {}",
                xid, self.unique_name
            ))),
        }
    }
}

impl RecoverableResource for MockResource {
    fn unique_name(&self) -> &str {
        &self.unique_name
    }

    fn recover(&self, _flags: u32) -> Result<Vec<Xid>> {
        let delay = *self.recovery_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        Ok(self.in_doubt.lock().clone())
    }

    fn commit(&self, xid: &Xid, _one_phase: bool) -> Result<()> {
        if self.fail_commits.load(Ordering::Relaxed) {
            return Err(Error::io(format!(
                "injected commit failure on {}",
                self.unique_name
            )));
        }
        self.remove_in_doubt(xid)?;
        self.committed.lock().push(xid.clone());
        Ok(())
    }

    fn rollback(&self, xid: &Xid) -> Result<()> {
        if self.fail_rollbacks.load(Ordering::Relaxed) {
            return Err(Error::io(format!(
                "injected rollback failure on {}",
                self.unique_name
            )));
        }
        self.remove_in_doubt(xid)?;
        self.rolled_back.lock().push(xid.clone());
        Ok(())
    }
}

struct MockJournalState {
    dangling: HashMap<Uid, JournalRecord>,
    committed: HashMap<Uid, JournalRecord>,
}

/// In-memory journal for tests
///
/// Buckets `Committing` / `Committed` exactly like the disk journal but
/// keeps everything in memory, and additionally remembers every accepted
/// log call (across reopens) so tests can assert on what recovery wrote.
#[derive(Default)]
pub struct MockJournal {
    state: Mutex<Option<MockJournalState>>,
    logged: Mutex<Vec<JournalRecord>>,
    sequence: AtomicI32,
}

impl MockJournal {
    /// Create a closed mock journal
    pub fn new() -> MockJournal {
        MockJournal::default()
    }

    /// Every record accepted by `log` since construction, in call order
    pub fn logged_records(&self) -> Vec<JournalRecord> {
        self.logged.lock().clone()
    }

    /// Number of logged records carrying the given status
    pub fn logged_count(&self, status: TxStatus) -> usize {
        self.logged
            .lock()
            .iter()
            .filter(|r| r.tx_status() == Some(status))
            .count()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut MockJournalState) -> T) -> Result<T> {
        let mut state = self.state.lock();
        match state.as_mut() {
            Some(state) => Ok(f(state)),
            None => Err(Error::invalid_state("mock journal is not open")),
        }
    }
}

impl Journal for MockJournal {
    fn open(&self) -> Result<()> {
        *self.state.lock() = Some(MockJournalState {
            dangling: HashMap::new(),
            committed: HashMap::new(),
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        *self.state.lock() = None;
        Ok(())
    }

    fn shutdown(&self) -> Result<()> {
        Ok(())
    }

    fn log(&self, status: TxStatus, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()> {
        let record = JournalRecord::new(
            status,
            gtrid.clone(),
            unique_names.clone(),
            now_millis(),
            self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
        )?;
        self.with_state(|state| match status {
            TxStatus::Committing => {
                state.dangling.insert(gtrid.clone(), record.clone());
            }
            TxStatus::Committed => {
                state.dangling.remove(gtrid);
                state.committed.insert(gtrid.clone(), record.clone());
            }
            _ => {}
        })?;
        self.logged.lock().push(record);
        Ok(())
    }

    fn force(&self) -> Result<()> {
        self.with_state(|_| ())
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, JournalRecord>> {
        self.with_state(|state| state.dangling.clone())
    }

    fn collect_all_records(&self) -> Result<JournalRecords> {
        self.with_state(|state| {
            JournalRecords::from_maps(state.dangling.clone(), state.committed.clone())
        })
    }

    fn read_records(
        &self,
        _include_invalid: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<JournalRecord>> + Send + '_>> {
        self.with_state(|_| ())?;
        let records = self.logged.lock().clone();
        Ok(Box::new(records.into_iter().map(Ok)))
    }
}

/// In-flight tracker reporting a fixed timestamp
///
/// Stands in for the transaction manager in tests: set the timestamp of the
/// oldest "live" transaction, clear it when that transaction completes.
#[derive(Default)]
pub struct FixedInFlightTracker {
    oldest: Mutex<Option<i64>>,
}

impl FixedInFlightTracker {
    /// Create an idle tracker
    pub fn new() -> FixedInFlightTracker {
        FixedInFlightTracker::default()
    }

    /// Set the oldest in-flight transaction timestamp
    pub fn set_oldest(&self, timestamp: Option<i64>) {
        *self.oldest.lock() = timestamp;
    }
}

impl crate::recoverer::InFlightTracker for FixedInFlightTracker {
    fn oldest_in_flight_timestamp(&self) -> Option<i64> {
        *self.oldest.lock()
    }
}
