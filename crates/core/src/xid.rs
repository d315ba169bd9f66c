//! Branch identifiers (Xids)
//!
//! An `Xid` names one branch of a global transaction as seen by a resource
//! manager: the shared gtrid plus a per-branch qualifier. The format id is a
//! fixed constant so recovery can tell our Xids apart from those of other
//! transaction managers sharing the same resource.

use crate::error::Result;
use crate::uid::{generate_uid, Uid};
use std::fmt;

/// Format id identifying Xids produced by this transaction manager
pub const FORMAT_ID: i32 = 0x64747831; // "dtx1"

/// Branch identifier carried to a resource manager
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Xid {
    format_id: i32,
    gtrid: Uid,
    bqual: Uid,
}

impl Xid {
    /// Build an Xid from its parts
    ///
    /// Foreign format ids are accepted; recovery filters them out later.
    pub fn new(format_id: i32, gtrid: Uid, bqual: Uid) -> Xid {
        Xid {
            format_id,
            gtrid,
            bqual,
        }
    }

    /// The format id of the transaction manager that created this Xid
    pub fn format_id(&self) -> i32 {
        self.format_id
    }

    /// The global transaction id shared by all branches
    pub fn gtrid(&self) -> &Uid {
        &self.gtrid
    }

    /// The branch qualifier unique to this branch
    pub fn bqual(&self) -> &Uid {
        &self.bqual
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:X}:{}:{}", self.format_id, self.gtrid, self.bqual)
    }
}

/// Generate a fresh branch Xid for an existing global transaction
///
/// The branch qualifier is a newly generated Uid carrying the same server id,
/// so two branches enlisted in the same transaction get distinct Xids.
pub fn generate_xid(gtrid: Uid, server_id: &[u8]) -> Result<Xid> {
    let bqual = generate_uid(server_id)?;
    Ok(Xid::new(FORMAT_ID, gtrid, bqual))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_xid_carries_format_id() {
        let gtrid = generate_uid(b"n1").unwrap();
        let xid = generate_xid(gtrid.clone(), b"n1").unwrap();
        assert_eq!(xid.format_id(), FORMAT_ID);
        assert_eq!(xid.gtrid(), &gtrid);
        assert_ne!(xid.bqual(), &gtrid);
    }

    #[test]
    fn test_branches_of_one_transaction_differ() {
        let gtrid = generate_uid(b"n1").unwrap();
        let x0 = generate_xid(gtrid.clone(), b"n1").unwrap();
        let x1 = generate_xid(gtrid, b"n1").unwrap();
        assert_eq!(x0.gtrid(), x1.gtrid());
        assert_ne!(x0, x1);
    }
}
