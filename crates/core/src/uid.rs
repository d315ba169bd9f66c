//! Global transaction identifiers
//!
//! A `Uid` is an opaque immutable byte sequence of 1 to 64 bytes:
//!
//! ```text
//! [ server id prefix (<= 51 ASCII bytes) | timestamp ms: i64 BE | sequence: i32 BE ]
//! ```
//!
//! The server id prefix makes Uids unique across nodes, the timestamp plus
//! the process-global sequence make them unique within a node. Recovery
//! relies on two properties of this layout:
//! - the embedded timestamp tells how old the transaction is (the in-flight
//!   skip rule reads it)
//! - the server id prefix tells which node created it (current-node-only
//!   recovery filters on it)

use crate::error::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of trailing bytes holding timestamp (8) + sequence (4)
const QUALIFIER_LENGTH: usize = 12;

/// Maximum total Uid length in bytes
pub const MAX_UID_LENGTH: usize = 64;

/// Maximum server id prefix length in bytes
pub const MAX_SERVER_ID_LENGTH: usize = MAX_UID_LENGTH - QUALIFIER_LENGTH - 1;

/// Process-global Uid sequence, monotonic per process
static SEQUENCE: AtomicI32 = AtomicI32::new(0);

/// Current wall-clock time in milliseconds since the Unix epoch
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Global transaction identifier
///
/// Compares, hashes and orders by byte content. For Uids generated by the
/// same node, byte order coincides with (timestamp, sequence) order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Uid {
    array: Vec<u8>,
}

impl Uid {
    /// Wrap raw Uid bytes
    ///
    /// # Errors
    ///
    /// `InvalidInput` if the byte sequence is empty or longer than 64 bytes.
    pub fn new(array: impl Into<Vec<u8>>) -> Result<Uid> {
        let array = array.into();
        if array.is_empty() || array.len() > MAX_UID_LENGTH {
            return Err(Error::invalid_input(format!(
                "uid must be 1..={} bytes, got {}",
                MAX_UID_LENGTH,
                array.len()
            )));
        }
        Ok(Uid { array })
    }

    /// The raw bytes of this Uid
    pub fn as_bytes(&self) -> &[u8] {
        &self.array
    }

    /// Length in bytes
    pub fn len(&self) -> usize {
        self.array.len()
    }

    /// True if the Uid holds no bytes (never true for a constructed Uid)
    pub fn is_empty(&self) -> bool {
        self.array.is_empty()
    }

    /// The creation timestamp embedded in this Uid, in ms since the epoch
    ///
    /// Returns `None` for Uids too short to carry the standard qualifier
    /// (foreign identifiers that merely passed the length check).
    pub fn extract_timestamp(&self) -> Option<i64> {
        let start = self.array.len().checked_sub(QUALIFIER_LENGTH)?;
        let bytes: [u8; 8] = self.array[start..start + 8].try_into().ok()?;
        Some(i64::from_be_bytes(bytes))
    }

    /// The per-process sequence number embedded in this Uid
    pub fn extract_sequence(&self) -> Option<i32> {
        let start = self.array.len().checked_sub(4)?;
        let bytes: [u8; 4] = self.array[start..].try_into().ok()?;
        Some(i32::from_be_bytes(bytes))
    }

    /// The server id prefix of this Uid
    ///
    /// Empty for Uids too short to carry the standard qualifier.
    pub fn extract_server_id(&self) -> &[u8] {
        match self.array.len().checked_sub(QUALIFIER_LENGTH) {
            Some(prefix_len) => &self.array[..prefix_len],
            None => &[],
        }
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.array {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

/// Generate a fresh Uid for this node
///
/// Layout: `server_id ++ now_millis ++ sequence`. The sequence is a
/// process-global atomic, so two Uids generated in the same millisecond still
/// differ.
///
/// # Errors
///
/// `InvalidInput` if `server_id` exceeds 51 bytes; server id sanitization
/// (ASCII check, truncation with warning) happens at the configuration layer,
/// never here.
pub fn generate_uid(server_id: &[u8]) -> Result<Uid> {
    if server_id.len() > MAX_SERVER_ID_LENGTH {
        return Err(Error::invalid_input(format!(
            "server id must not exceed {} bytes, got {}",
            MAX_SERVER_ID_LENGTH,
            server_id.len()
        )));
    }

    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

    let mut array = Vec::with_capacity(server_id.len() + QUALIFIER_LENGTH);
    array.extend_from_slice(server_id);
    array.extend_from_slice(&now_millis().to_be_bytes());
    array.extend_from_slice(&sequence.to_be_bytes());
    Uid::new(array)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_fields() {
        let uid = generate_uid(b"node-a").unwrap();
        assert_eq!(uid.extract_server_id(), b"node-a");
        let ts = uid.extract_timestamp().unwrap();
        assert!(ts > 0);
        assert!((now_millis() - ts).abs() < 10_000);
        assert!(uid.extract_sequence().is_some());
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let a = generate_uid(b"n").unwrap();
        let b = generate_uid(b"n").unwrap();
        assert!(b.extract_sequence().unwrap() > a.extract_sequence().unwrap());
        assert_ne!(a, b);
    }

    #[test]
    fn test_byte_order_matches_generation_order() {
        let a = generate_uid(b"n").unwrap();
        let b = generate_uid(b"n").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_length_bounds() {
        assert!(Uid::new(vec![]).is_err());
        assert!(Uid::new(vec![0u8; 65]).is_err());
        assert!(Uid::new(vec![0u8; 64]).is_ok());
        assert!(Uid::new(vec![0u8; 1]).is_ok());
    }

    #[test]
    fn test_oversize_server_id_rejected() {
        assert!(generate_uid(&[b'x'; 52]).is_err());
        assert!(generate_uid(&[b'x'; 51]).is_ok());
    }

    #[test]
    fn test_short_uid_has_no_qualifier() {
        let uid = Uid::new(vec![1, 2, 3]).unwrap();
        assert!(uid.extract_timestamp().is_none());
        assert_eq!(uid.extract_server_id(), &[] as &[u8]);
    }

    #[test]
    fn test_display_is_hex() {
        let uid = Uid::new(vec![0xDE, 0xAD]).unwrap();
        assert_eq!(uid.to_string(), "DEAD");
    }
}
