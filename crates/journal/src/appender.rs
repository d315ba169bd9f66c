//! Fragment write appender
//!
//! Owns the read-write handle of one fragment file. Record bytes and the
//! header cursor are written back-to-back by the same call, and `force`
//! seals both with a single `sync_data`, so a crash can never leave
//! a durable cursor pointing past a record that was not itself made durable.

use crate::header::{
    LogFileHeader, CLEAN_LOG_STATE, HEADER_LENGTH, UNCLEAN_LOG_STATE,
};
use crate::record::JournalRecord;
use dtx_core::uid::now_millis;
use dtx_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Append handle over one fragment file
pub struct LogAppender {
    file: File,
    path: PathBuf,
    position: u64,
    timestamp: i64,
    forced_write_enabled: bool,
    /// Cursor value at the time of the last force, for force coalescing
    forced_position: u64,
}

impl LogAppender {
    /// Open a fragment for appending, creating and initializing it if absent
    ///
    /// Reopening a fragment whose state byte is still unclean means the
    /// previous process died without closing it; that is logged, not an
    /// error; the header cursor is still trustworthy because it is only
    /// made durable together with the records it covers.
    pub fn open(path: &Path, forced_write_enabled: bool) -> Result<LogAppender> {
        let exists = path.exists();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(path)?;

        let header = if exists && file.metadata()?.len() >= HEADER_LENGTH {
            let header = LogFileHeader::read_from(&mut file)?;
            if header.state == UNCLEAN_LOG_STATE {
                warn!(
                    path = %path.display(),
                    "fragment was not closed cleanly, previous process probably crashed"
                );
            }
            header
        } else {
            let header = LogFileHeader {
                timestamp: now_millis(),
                state: CLEAN_LOG_STATE,
                position: HEADER_LENGTH,
            };
            header.write_to(&mut file)?;
            debug!(path = %path.display(), "created new fragment");
            header
        };

        LogFileHeader::write_state(&mut file, UNCLEAN_LOG_STATE)?;

        Ok(LogAppender {
            file,
            path: path.to_path_buf(),
            position: header.position,
            timestamp: header.timestamp,
            forced_write_enabled,
            forced_position: header.position,
        })
    }

    /// Path of the fragment file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current write cursor (next append offset)
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Header timestamp; the fragment with the newer one is the active one
    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// Append one record and advance the durable cursor
    ///
    /// Returns the cursor after the append.
    pub fn write_record(&mut self, record: &JournalRecord) -> Result<u64> {
        let encoded = record.encode();
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.write_all(&encoded)?;
        self.position += encoded.len() as u64;
        LogFileHeader::write_position(&mut self.file, self.position)?;
        Ok(self.position)
    }

    /// Durability fence
    ///
    /// No-op when forced writes are disabled (unsafe outside tests), or when
    /// `batching` is requested and nothing was written since the last force.
    pub fn force(&mut self, batching: bool) -> Result<()> {
        if !self.forced_write_enabled {
            debug!(path = %self.path.display(), "forced writes disabled, skipping fsync");
            return Ok(());
        }
        if batching && self.position == self.forced_position {
            return Ok(());
        }
        self.file.sync_data().map_err(Error::from)?;
        self.forced_position = self.position;
        Ok(())
    }

    /// Reset the fragment for reuse: fresh header timestamp, cursor rewound
    ///
    /// The new timestamp is strictly greater than `newer_than`, so the
    /// rewound fragment always wins the active-fragment election on the next
    /// open even when the wall clock has not ticked. Existing record bytes
    /// beyond the cursor are left in place; they are outside the logical
    /// content and will be overwritten by new appends.
    pub fn rewind(&mut self, newer_than: i64) -> Result<()> {
        let header = LogFileHeader {
            timestamp: now_millis().max(newer_than + 1),
            state: UNCLEAN_LOG_STATE,
            position: HEADER_LENGTH,
        };
        header.write_to(&mut self.file)?;
        self.position = HEADER_LENGTH;
        self.forced_position = HEADER_LENGTH;
        self.timestamp = header.timestamp;
        Ok(())
    }

    /// Persist the cursor, mark the fragment clean and flush
    pub fn close(&mut self) -> Result<()> {
        LogFileHeader::write_position(&mut self.file, self.position)?;
        LogFileHeader::write_state(&mut self.file, CLEAN_LOG_STATE)?;
        if self.forced_write_enabled {
            self.file.sync_data()?;
        }
        Ok(())
    }
}
