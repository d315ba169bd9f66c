//! Transaction status codes
//!
//! Statuses travel through the journal as raw `i32` codes, so the codes are
//! frozen: they are the on-disk representation and must never be renumbered.

use std::fmt;

/// Status of a two-phase-commit transaction
///
/// Only a subset of these is ever journaled; `Committing` and `Committed` are
/// the load-bearing transitions that recovery depends on. The rest exist so
/// the transaction manager can journal its full lifecycle when verbose
/// journaling is enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum TxStatus {
    /// Transaction is running
    Active = 0,
    /// Phase 1 voting has started
    Preparing = 1,
    /// All branches voted yes
    Prepared = 2,
    /// Phase 2 commit decision has been taken
    Committing = 3,
    /// All branches committed
    Committed = 4,
    /// Phase 2 rollback in progress
    RollingBack = 5,
    /// All branches rolled back
    RolledBack = 6,
    /// Outcome cannot be determined
    Unknown = 7,
    /// No transaction is associated with the current context
    NoTransaction = 8,
}

impl TxStatus {
    /// The stable on-disk code of this status
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Parse a status from its on-disk code
    pub fn from_code(code: i32) -> Option<TxStatus> {
        match code {
            0 => Some(TxStatus::Active),
            1 => Some(TxStatus::Preparing),
            2 => Some(TxStatus::Prepared),
            3 => Some(TxStatus::Committing),
            4 => Some(TxStatus::Committed),
            5 => Some(TxStatus::RollingBack),
            6 => Some(TxStatus::RolledBack),
            7 => Some(TxStatus::Unknown),
            8 => Some(TxStatus::NoTransaction),
            _ => None,
        }
    }

    /// Check if this status must always be journaled
    ///
    /// When status filtering is enabled the journal suppresses everything
    /// except this conservative set: `Committing` marks the point of no
    /// return and `Committed` closes it, and recovery is driven entirely by
    /// that pair.
    pub fn is_mandatory_journal_status(self) -> bool {
        matches!(self, TxStatus::Committing | TxStatus::Committed)
    }

    /// Human-readable name, as logged
    pub fn as_str(self) -> &'static str {
        match self {
            TxStatus::Active => "ACTIVE",
            TxStatus::Preparing => "PREPARING",
            TxStatus::Prepared => "PREPARED",
            TxStatus::Committing => "COMMITTING",
            TxStatus::Committed => "COMMITTED",
            TxStatus::RollingBack => "ROLLING_BACK",
            TxStatus::RolledBack => "ROLLEDBACK",
            TxStatus::Unknown => "UNKNOWN",
            TxStatus::NoTransaction => "NO_TRANSACTION",
        }
    }
}

impl fmt::Display for TxStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
