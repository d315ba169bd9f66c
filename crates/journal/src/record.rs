//! Journal record framing
//!
//! One record on disk, big-endian:
//!
//! ```text
//! [status: i32][record_length: i32][header_length: i32][time: i64]
//! [sequence_number: i32][crc32: u32][gtrid_size: i8][gtrid: bytes]
//! [unique_names_count: i32]([name_length: i16][name: US-ASCII bytes])*
//! [end_record: i32]
//! ```
//!
//! - `record_length` counts every byte after itself through the end marker
//!   inclusive; a reader that trusts nothing else can still hop to the next
//!   record boundary with it.
//! - `crc32` covers `header_length`, `time` and `sequence_number`, then
//!   `gtrid_size` through the last name byte. The `status` field is guarded
//!   separately by its sign, `record_length` by bounds checks against the
//!   fragment, the terminator by the end-marker probe.

use crc32fast::Hasher;
use dtx_core::{Error, Result, TxStatus, Uid};
use std::collections::BTreeSet;

/// End-of-record marker value
pub const END_RECORD: i32 = 0x6474_7845; // "dtxE"

/// Size of the fixed record header: status through crc32
pub const RECORD_HEADER_LENGTH: i32 = 28;

/// Longest name length representable by the i16 length prefix
pub const MAX_NAME_LENGTH: usize = i16::MAX as usize;

/// One transaction status record
///
/// Produced either by [`JournalRecord::new`] on the write path (lengths and
/// CRC computed) or by the fragment cursor on the read path (fields as read
/// from disk).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalRecord {
    status: i32,
    record_length: i32,
    header_length: i32,
    time: i64,
    sequence_number: i32,
    crc32: u32,
    gtrid: Uid,
    unique_names: BTreeSet<String>,
}

impl JournalRecord {
    /// Build a record ready to be appended
    ///
    /// # Errors
    ///
    /// `InvalidInput` if a name is empty, not US-ASCII, or longer than the
    /// i16 length prefix allows. The gtrid bounds (1..=64 bytes) are already
    /// guaranteed by the `Uid` type.
    pub fn new(
        status: TxStatus,
        gtrid: Uid,
        unique_names: BTreeSet<String>,
        time: i64,
        sequence_number: i32,
    ) -> Result<JournalRecord> {
        for name in &unique_names {
            if name.is_empty() {
                return Err(Error::invalid_input("resource unique name must not be empty"));
            }
            if !name.is_ascii() {
                return Err(Error::invalid_input(format!(
                    "resource unique name '{}' is not US-ASCII",
                    name
                )));
            }
            if name.len() > MAX_NAME_LENGTH {
                return Err(Error::invalid_input(format!(
                    "resource unique name of {} bytes exceeds the maximum of {}",
                    name.len(),
                    MAX_NAME_LENGTH
                )));
            }
        }

        let mut record = JournalRecord {
            status: status.code(),
            record_length: 0,
            header_length: RECORD_HEADER_LENGTH,
            time,
            sequence_number,
            crc32: 0,
            gtrid,
            unique_names,
        };
        record.record_length = record.calculate_record_length();
        record.crc32 = record.calculate_crc32();
        Ok(record)
    }

    /// Reassemble a record from fields read off disk
    ///
    /// Used by the fragment cursor; no validation beyond what the cursor
    /// already performed.
    pub(crate) fn from_parts(
        status: i32,
        record_length: i32,
        header_length: i32,
        time: i64,
        sequence_number: i32,
        crc32: u32,
        gtrid: Uid,
        unique_names: BTreeSet<String>,
    ) -> JournalRecord {
        JournalRecord {
            status,
            record_length,
            header_length,
            time,
            sequence_number,
            crc32,
            gtrid,
            unique_names,
        }
    }

    /// Raw status code as stored on disk
    pub fn status(&self) -> i32 {
        self.status
    }

    /// Status decoded to the known set, if it is one
    pub fn tx_status(&self) -> Option<TxStatus> {
        TxStatus::from_code(self.status)
    }

    /// Payload length: bytes after the `record_length` field through the end marker
    pub fn record_length(&self) -> i32 {
        self.record_length
    }

    /// Fixed record header length recorded at write time
    pub fn header_length(&self) -> i32 {
        self.header_length
    }

    /// Wall-clock time of the log call, ms since the epoch
    pub fn time(&self) -> i64 {
        self.time
    }

    /// Journal-wide record sequence number
    pub fn sequence_number(&self) -> i32 {
        self.sequence_number
    }

    /// CRC-32 as stored in the record
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    /// Global transaction id this record belongs to
    pub fn gtrid(&self) -> &Uid {
        &self.gtrid
    }

    /// Unique names of the resources named by this record
    pub fn unique_names(&self) -> &BTreeSet<String> {
        &self.unique_names
    }

    /// Total encoded size in bytes, including the two leading length fields
    pub fn encoded_len(&self) -> usize {
        8 + self.calculate_record_length() as usize
    }

    fn calculate_record_length(&self) -> i32 {
        let names: usize = self.unique_names.iter().map(|n| 2 + n.len()).sum();
        // header_length + time + sequence + crc32 + gtrid_size + gtrid
        // + names_count + names + end marker
        (4 + 8 + 4 + 4 + 1 + self.gtrid.len() + 4 + names + 4) as i32
    }

    /// Recompute the CRC-32 from the record's fields
    pub fn calculate_crc32(&self) -> u32 {
        let mut hasher = Hasher::new();
        hasher.update(&self.header_length.to_be_bytes());
        hasher.update(&self.time.to_be_bytes());
        hasher.update(&self.sequence_number.to_be_bytes());
        hasher.update(&[self.gtrid.len() as u8]);
        hasher.update(self.gtrid.as_bytes());
        hasher.update(&(self.unique_names.len() as i32).to_be_bytes());
        for name in &self.unique_names {
            hasher.update(&(name.len() as i16).to_be_bytes());
            hasher.update(name.as_bytes());
        }
        hasher.finalize()
    }

    /// Check the stored CRC against a recomputation
    pub fn is_crc32_correct(&self) -> bool {
        self.calculate_crc32() == self.crc32
    }

    /// Serialize the record into a fresh buffer
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        buf.extend_from_slice(&self.status.to_be_bytes());
        buf.extend_from_slice(&self.record_length.to_be_bytes());
        buf.extend_from_slice(&self.header_length.to_be_bytes());
        buf.extend_from_slice(&self.time.to_be_bytes());
        buf.extend_from_slice(&self.sequence_number.to_be_bytes());
        buf.extend_from_slice(&self.crc32.to_be_bytes());
        buf.push(self.gtrid.len() as u8);
        buf.extend_from_slice(self.gtrid.as_bytes());
        buf.extend_from_slice(&(self.unique_names.len() as i32).to_be_bytes());
        for name in &self.unique_names {
            buf.extend_from_slice(&(name.len() as i16).to_be_bytes());
            buf.extend_from_slice(name.as_bytes());
        }
        buf.extend_from_slice(&END_RECORD.to_be_bytes());
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_core::uid::generate_uid;

    fn names(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn sample_record() -> JournalRecord {
        let gtrid = generate_uid(b"test-node").unwrap();
        JournalRecord::new(TxStatus::Committing, gtrid, names(&["rs0", "rs1"]), 1000, 1).unwrap()
    }

    #[test]
    fn test_encoded_layout() {
        let record = sample_record();
        let buf = record.encode();

        assert_eq!(buf.len(), record.encoded_len());
        assert_eq!(
            i32::from_be_bytes(buf[0..4].try_into().unwrap()),
            TxStatus::Committing.code()
        );
        assert_eq!(
            i32::from_be_bytes(buf[4..8].try_into().unwrap()),
            record.record_length()
        );
        assert_eq!(
            i32::from_be_bytes(buf[8..12].try_into().unwrap()),
            RECORD_HEADER_LENGTH
        );
        assert_eq!(buf[28] as usize, record.gtrid().len());
        // record_length counts from header_length through the end marker
        assert_eq!(buf.len(), 8 + record.record_length() as usize);
        let tail = &buf[buf.len() - 4..];
        assert_eq!(i32::from_be_bytes(tail.try_into().unwrap()), END_RECORD);
    }

    #[test]
    fn test_crc_is_stable_and_detects_change() {
        let record = sample_record();
        assert!(record.is_crc32_correct());

        let gtrid = record.gtrid().clone();
        let tampered = JournalRecord::from_parts(
            record.status(),
            record.record_length(),
            record.header_length(),
            record.time() + 1, // single field change
            record.sequence_number(),
            record.crc32(),
            gtrid,
            record.unique_names().clone(),
        );
        assert!(!tampered.is_crc32_correct());
    }

    #[test]
    fn test_names_are_validated() {
        let gtrid = generate_uid(b"n").unwrap();
        assert!(JournalRecord::new(TxStatus::Committing, gtrid.clone(), names(&[""]), 1, 1).is_err());
        assert!(
            JournalRecord::new(TxStatus::Committing, gtrid.clone(), names(&["résumé"]), 1, 1)
                .is_err()
        );
        assert!(JournalRecord::new(TxStatus::Committing, gtrid, names(&["ok"]), 1, 1).is_ok());
    }

    #[test]
    fn test_empty_name_set_is_legal() {
        let gtrid = generate_uid(b"n").unwrap();
        let record = JournalRecord::new(TxStatus::Committed, gtrid, BTreeSet::new(), 1, 1).unwrap();
        assert_eq!(record.unique_names().len(), 0);
        assert!(record.is_crc32_correct());
    }
}
