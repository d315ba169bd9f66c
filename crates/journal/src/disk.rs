//! Disk journal: two circular fragment files
//!
//! Writes go to the *active* fragment until its size reaches the rotation
//! threshold; the journal then swaps to the other fragment, but only after
//! every still-dangling transaction of the fragment being vacated has been
//! copied over, so a fragment is never abandoned while it holds unique live
//! state. When the dangling set alone would not fit a fresh fragment the
//! swap is deferred and the active fragment grows past its nominal limit.
//!
//! The active fragment on open is the one with the newer header timestamp
//! (rewinding a fragment during a swap stamps it strictly newer).

use crate::appender::LogAppender;
use crate::config::DiskJournalConfig;
use crate::cursor::LogCursor;
use crate::header::HEADER_LENGTH;
use crate::record::JournalRecord;
use crate::records::JournalRecords;
use crate::Journal;
use dtx_core::uid::now_millis;
use dtx_core::{Error, Result, TxStatus, Uid};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use tracing::{debug, error, info, warn};

struct JournalState {
    appenders: [LogAppender; 2],
    active: usize,
}

/// Transaction status journal persisted in two circular fragment files
pub struct DiskJournal {
    config: DiskJournalConfig,
    state: Mutex<Option<JournalState>>,
    sequence: AtomicI32,
}

impl DiskJournal {
    /// Create a journal over the configured fragment pair
    ///
    /// No file is touched until [`Journal::open`].
    pub fn new(config: DiskJournalConfig) -> Result<DiskJournal> {
        config.validate()?;
        Ok(DiskJournal {
            config,
            state: Mutex::new(None),
            sequence: AtomicI32::new(0),
        })
    }

    /// The configuration this journal was built with
    pub fn config(&self) -> &DiskJournalConfig {
        &self.config
    }

    fn next_sequence(&self) -> i32 {
        self.sequence.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Scan one fragment into `records`, honoring the skip policy
    fn scan_fragment(
        path: &Path,
        skip_corrupted: bool,
        records: &mut JournalRecords,
        index: &mut usize,
    ) -> Result<()> {
        let mut cursor = LogCursor::open(path)?;
        loop {
            match cursor.read_record(false) {
                Ok(Some(record)) => {
                    records.apply(record);
                    *index += 1;
                }
                Ok(None) => return Ok(()),
                Err(e) if e.is_corrupted_record() && skip_corrupted => {
                    warn!(
                        path = %path.display(),
                        index = *index,
                        error = %e,
                        "skipping corrupted record"
                    );
                    records.mark_corrupted(*index);
                    *index += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Fragment scan order: the stale fragment first, then the active one
    fn scan_order(state: &JournalState) -> [usize; 2] {
        [1 - state.active, state.active]
    }

    fn collect_locked(&self, state: &JournalState) -> Result<JournalRecords> {
        let mut records = JournalRecords::new();
        let mut index = 0;
        for i in Self::scan_order(state) {
            Self::scan_fragment(
                state.appenders[i].path(),
                self.config.skip_corrupted_logs,
                &mut records,
                &mut index,
            )?;
        }
        Ok(records)
    }

    /// Swap to the other fragment, carrying the dangling records over
    ///
    /// Returns false when the swap had to be deferred because the dangling
    /// set would not fit a fresh fragment.
    fn swap_fragments(&self, state: &mut JournalState) -> Result<bool> {
        let active = state.active;
        let passive = 1 - active;

        // seal the vacated fragment so the dangling scan sees everything
        state.appenders[active].force(false)?;

        let dangling = {
            let mut records = JournalRecords::new();
            let mut index = 0;
            Self::scan_fragment(
                state.appenders[active].path(),
                self.config.skip_corrupted_logs,
                &mut records,
                &mut index,
            )?;
            records.into_dangling()
        };

        // re-log the survivors in their original order
        let mut originals: Vec<JournalRecord> = dangling.into_values().collect();
        originals.sort_by_key(|r| (r.time(), r.sequence_number()));

        let mut copies = Vec::with_capacity(originals.len());
        let mut needed = HEADER_LENGTH;
        for original in &originals {
            let copy = JournalRecord::new(
                TxStatus::Committing,
                original.gtrid().clone(),
                original.unique_names().clone(),
                now_millis(),
                self.next_sequence(),
            )?;
            needed += copy.encoded_len() as u64;
            copies.push(copy);
        }

        if needed > self.config.max_log_size_bytes {
            warn!(
                dangling = copies.len(),
                needed,
                max = self.config.max_log_size_bytes,
                "deferring fragment swap: dangling records do not fit a fresh fragment"
            );
            return Ok(false);
        }

        let active_timestamp = state.appenders[active].timestamp();
        let target = &mut state.appenders[passive];
        target.rewind(active_timestamp)?;
        for copy in &copies {
            target.write_record(copy)?;
        }
        target.force(false)?;
        state.active = passive;

        info!(
            fragment = %state.appenders[passive].path().display(),
            carried = copies.len(),
            "swapped journal fragments"
        );
        Ok(true)
    }
}

impl Journal for DiskJournal {
    fn open(&self) -> Result<()> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            debug!("journal is already open");
            return Ok(());
        }

        if !self.config.forced_write_enabled {
            warn!("forced writes are disabled, transaction integrity is not guaranteed");
        }

        let part1 = LogAppender::open(
            &self.config.log_part1_filename,
            self.config.forced_write_enabled,
        )?;
        let part2 = LogAppender::open(
            &self.config.log_part2_filename,
            self.config.forced_write_enabled,
        )?;
        // the fragment with the newer header timestamp is the active one; a
        // fragment with no records never wins over one that has some, and a
        // fresh pair starts on part 1
        let part1_has_records = part1.position() > HEADER_LENGTH;
        let part2_has_records = part2.position() > HEADER_LENGTH;
        let active = if part2_has_records
            && (!part1_has_records || part2.timestamp() > part1.timestamp())
        {
            1
        } else {
            0
        };

        debug!(
            part1 = %self.config.log_part1_filename.display(),
            part2 = %self.config.log_part2_filename.display(),
            active,
            "disk journal opened"
        );
        *guard = Some(JournalState {
            appenders: [part1, part2],
            active,
        });
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let Some(mut state) = guard.take() else {
            return Ok(());
        };
        let mut first_error = None;
        for appender in state.appenders.iter_mut() {
            if let Err(e) = appender.close() {
                error!(path = %appender.path().display(), error = %e, "error closing fragment");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn shutdown(&self) -> Result<()> {
        if let Err(e) = self.close() {
            error!(error = %e, "error closing disk journal during shutdown");
        }
        Ok(())
    }

    fn log(&self, status: TxStatus, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()> {
        if self.config.filter_log_status && !status.is_mandatory_journal_status() {
            debug!(%status, %gtrid, "filtered out non-mandatory status");
            return Ok(());
        }

        let record = JournalRecord::new(
            status,
            gtrid.clone(),
            unique_names.clone(),
            now_millis(),
            self.next_sequence(),
        )?;

        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_state("cannot write log, journal is not open"))?;

        let active = &state.appenders[state.active];
        if active.position() + record.encoded_len() as u64 > self.config.max_log_size_bytes {
            self.swap_fragments(state)?;
        }
        state.appenders[state.active].write_record(&record)?;
        Ok(())
    }

    fn force(&self) -> Result<()> {
        let mut guard = self.state.lock();
        let state = guard
            .as_mut()
            .ok_or_else(|| Error::invalid_state("cannot force log, journal is not open"))?;
        let active = state.active;
        state.appenders[active].force(self.config.force_batching_enabled)
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, JournalRecord>> {
        Ok(self.collect_all_records()?.into_dangling())
    }

    fn collect_all_records(&self) -> Result<JournalRecords> {
        let guard = self.state.lock();
        let state = guard
            .as_ref()
            .ok_or_else(|| Error::invalid_state("cannot collect records, journal is not open"))?;
        self.collect_locked(state)
    }

    fn read_records(
        &self,
        include_invalid: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<JournalRecord>> + Send + '_>> {
        let guard = self.state.lock();
        let state = guard
            .as_ref()
            .ok_or_else(|| Error::invalid_state("cannot read records, journal is not open"))?;
        let mut cursors = Vec::with_capacity(2);
        for i in Self::scan_order(state) {
            cursors.push(LogCursor::open(state.appenders[i].path())?);
        }
        Ok(Box::new(RecordIter {
            cursors,
            current: 0,
            include_invalid,
            done: false,
        }))
    }
}

/// Lazy record iterator over the two fragments; finite, not restartable
struct RecordIter {
    cursors: Vec<LogCursor>,
    current: usize,
    include_invalid: bool,
    done: bool,
}

impl Iterator for RecordIter {
    type Item = Result<JournalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        while self.current < self.cursors.len() {
            match self.cursors[self.current].read_record(self.include_invalid) {
                Ok(Some(record)) => return Some(Ok(record)),
                Ok(None) => self.current += 1,
                Err(e) if e.is_corrupted_record() => return Some(Err(e)),
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
        None
    }
}
