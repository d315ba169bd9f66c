//! Error types for the dtx transaction engine
//!
//! This module defines the unified error type used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Error Classification
//!
//! - **I/O failures (`Io`)**: file open/read/write/force errors. Surface to
//!   the caller; the journal marks itself as needing reopen.
//! - **Corrupted records (`CorruptedRecord`)**: structural or CRC violation
//!   in a single journal record. Skippable when the journal is configured to
//!   skip corrupted logs; the multiplexed journal can absorb them when only
//!   one leg is affected.
//! - **Unreadable record length (`UnreadableRecordLength`)**: the one field
//!   the skip machinery itself depends on is damaged. Aborts the scan
//!   regardless of configuration.
//! - **Invalid input / invalid state**: fail fast, the caller holds a bug.
//! - **Corruption (`Corruption`)**: journal-level integrity failure (e.g.
//!   both multiplexed legs agree on the same corrupted record).
//! - **Internal**: unexpected state, e.g. a journal worker thread died.

use std::io;
use thiserror::Error;

/// Result type alias for dtx operations
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for all dtx operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file operations, durability fence, worker join)
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A single journal record failed a structural or CRC check
    ///
    /// Carries the file position of the record so operators can locate the
    /// damage. The read cursor has already been advanced past the record's
    /// claimed length, so the scan can continue when skipping is enabled.
    #[error("corrupted record at position {position}: {message}")]
    CorruptedRecord {
        /// Byte position of the record in the fragment file
        position: u64,
        /// Description of the violated check
        message: String,
    },

    /// The record length field itself is unusable
    ///
    /// Skipping a corrupted record relies on its `record_length` to find the
    /// next record boundary. When that field is negative or points past the
    /// logical end of the fragment there is no boundary to skip to, so the
    /// scan aborts even when corrupted-record skipping is enabled.
    #[error("unreadable record length {length} at position {position}, cannot scan past it")]
    UnreadableRecordLength {
        /// Byte position of the record in the fragment file
        position: u64,
        /// The damaged length value as read
        length: i64,
    },

    /// Input validation failed (out-of-range status, oversize gtrid, ...)
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Operation attempted in the wrong lifecycle state
    ///
    /// E.g. logging to a journal that was never opened, or reconfiguring a
    /// started services instance.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Journal-level integrity failure
    #[error("corruption detected: {0}")]
    Corruption(String),

    /// Unexpected internal error, indicates a bug
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create an `Io` error from a plain message
    pub fn io(message: impl Into<String>) -> Self {
        Error::Io(io::Error::new(io::ErrorKind::Other, message.into()))
    }

    /// Create a `CorruptedRecord` error
    pub fn corrupted_record(position: u64, message: impl Into<String>) -> Self {
        Error::CorruptedRecord {
            position,
            message: message.into(),
        }
    }

    /// Create an `InvalidInput` error
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Error::InvalidInput(message.into())
    }

    /// Create an `InvalidState` error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Error::InvalidState(message.into())
    }

    /// Create a `Corruption` error
    pub fn corruption(message: impl Into<String>) -> Self {
        Error::Corruption(message.into())
    }

    /// Create an `Internal` error
    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Check if this is a skippable single-record corruption
    ///
    /// Returns true only for `CorruptedRecord`; `UnreadableRecordLength` is
    /// deliberately excluded because the scan cannot continue past it.
    pub fn is_corrupted_record(&self) -> bool {
        matches!(self, Error::CorruptedRecord { .. })
    }

    /// Check if this is an I/O failure
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Check if this error indicates a bug rather than an environmental failure
    pub fn is_internal(&self) -> bool {
        matches!(self, Error::Internal(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_io() {
        let err = Error::io("disk gone");
        assert!(err.to_string().contains("i/o error"));
        assert!(err.to_string().contains("disk gone"));
    }

    #[test]
    fn test_display_corrupted_record() {
        let err = Error::corrupted_record(42, "status is negative");
        let msg = err.to_string();
        assert!(msg.contains("position 42"));
        assert!(msg.contains("status is negative"));
    }

    #[test]
    fn test_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(err.is_io());
    }

    #[test]
    fn test_corrupted_record_is_skippable_unreadable_length_is_not() {
        let skippable = Error::corrupted_record(10, "crc mismatch");
        let fatal = Error::UnreadableRecordLength {
            position: 10,
            length: -1,
        };
        assert!(skippable.is_corrupted_record());
        assert!(!fatal.is_corrupted_record());
    }

    #[test]
    fn test_result_alias() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
