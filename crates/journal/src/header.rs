//! Fragment file header
//!
//! Layout, big-endian:
//!
//! ```text
//! [magic: u32][format version: u32][timestamp: i64][state: u8][position: i64]
//! ```
//!
//! The timestamp identifies which fragment is the newer (active) one after a
//! reopen. The state byte records whether the fragment was closed cleanly.
//! The position field is the write cursor: readers iterate records from
//! `HEADER_LENGTH` up to it.

use dtx_core::{Error, Result};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

/// Fragment file magic number
pub const MAGIC: u32 = 0x6474_786A; // "dtxj"

/// On-disk format version
pub const FORMAT_VERSION: u32 = 1;

/// Offset of the timestamp field
pub const TIMESTAMP_HEADER: u64 = 8;

/// Offset of the state byte
pub const STATE_HEADER: u64 = 16;

/// Offset of the write cursor field
pub const CURRENT_POSITION_HEADER: u64 = 17;

/// Total header length; records start here
pub const HEADER_LENGTH: u64 = 25;

/// State byte of a cleanly closed fragment
pub const CLEAN_LOG_STATE: u8 = 0;

/// State byte of a fragment that is open (or was when the process died)
pub const UNCLEAN_LOG_STATE: u8 = 0xFF;

/// In-memory view of a fragment header
#[derive(Debug, Clone, Copy)]
pub struct LogFileHeader {
    /// Header (re)creation time, ms since the epoch
    pub timestamp: i64,
    /// `CLEAN_LOG_STATE` or `UNCLEAN_LOG_STATE`
    pub state: u8,
    /// Write cursor: next append offset, `>= HEADER_LENGTH`
    pub position: u64,
}

impl LogFileHeader {
    /// Read and validate a header from the start of `file`
    pub fn read_from(file: &mut File) -> Result<LogFileHeader> {
        let mut buf = [0u8; HEADER_LENGTH as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;

        let magic = u32::from_be_bytes(buf[0..4].try_into().expect("slice of 4"));
        if magic != MAGIC {
            return Err(Error::corruption(format!(
                "not a journal fragment (magic {:08X}, expected {:08X})",
                magic, MAGIC
            )));
        }
        let version = u32::from_be_bytes(buf[4..8].try_into().expect("slice of 4"));
        if version != FORMAT_VERSION {
            return Err(Error::corruption(format!(
                "unsupported fragment format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let timestamp = i64::from_be_bytes(buf[8..16].try_into().expect("slice of 8"));
        let state = buf[16];
        let position = i64::from_be_bytes(buf[17..25].try_into().expect("slice of 8"));
        if position < HEADER_LENGTH as i64 {
            return Err(Error::corruption(format!(
                "fragment write cursor {} points into the header",
                position
            )));
        }

        Ok(LogFileHeader {
            timestamp,
            state,
            position: position as u64,
        })
    }

    /// Write a complete header to the start of `file`
    pub fn write_to(&self, file: &mut File) -> Result<()> {
        let mut buf = [0u8; HEADER_LENGTH as usize];
        buf[0..4].copy_from_slice(&MAGIC.to_be_bytes());
        buf[4..8].copy_from_slice(&FORMAT_VERSION.to_be_bytes());
        buf[8..16].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[16] = self.state;
        buf[17..25].copy_from_slice(&(self.position as i64).to_be_bytes());

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    /// Rewrite only the cursor field
    pub fn write_position(file: &mut File, position: u64) -> Result<()> {
        file.seek(SeekFrom::Start(CURRENT_POSITION_HEADER))?;
        file.write_all(&(position as i64).to_be_bytes())?;
        Ok(())
    }

    /// Rewrite only the state byte
    pub fn write_state(file: &mut File, state: u8) -> Result<()> {
        file.seek(SeekFrom::Start(STATE_HEADER))?;
        file.write_all(&[state])?;
        Ok(())
    }
}
