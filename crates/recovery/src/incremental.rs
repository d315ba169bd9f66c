//! Incremental recovery for late-joining resources
//!
//! When a resource registers while the transaction manager is already
//! running, only that one resource is recovered: commits and rollbacks apply
//! exactly as in a full pass, restricted to its branches. This is the one
//! recovery path that runs concurrently with live transactions, so the
//! in-flight fence matters here just as much.

use crate::recoverer::{recover_resource, DanglingTransactions, InFlightTracker};
use crate::resource::RecoverableResource;
use dtx_core::Result;
use dtx_journal::Journal;
use std::sync::Arc;
use tracing::info;

/// Counters of one incremental recovery
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct IncrementalOutcome {
    /// Branches committed
    pub committed: u64,
    /// Branches rolled back
    pub rolled_back: u64,
}

/// Recover a single resource against the journal
///
/// # Errors
///
/// Journal failures and the first per-branch failure are both returned as
/// errors: an incremental recovery has a single resource, so there is no
/// "continue with the others" to fall back to.
pub fn recover(
    resource: &Arc<dyn RecoverableResource>,
    journal: &Arc<dyn Journal>,
    tracker: Option<&dyn InFlightTracker>,
) -> Result<IncrementalOutcome> {
    let fence = tracker
        .and_then(|t| t.oldest_in_flight_timestamp())
        .unwrap_or(i64::MAX);

    let mut dangling = DanglingTransactions::new(journal.collect_dangling_records()?);
    let outcome = recover_resource(
        resource.as_ref(),
        journal.as_ref(),
        &mut dangling,
        fence,
        None,
    )?;
    journal.force()?;

    if let Some(failure) = outcome.first_failure {
        return Err(failure);
    }

    info!(
        resource = resource.unique_name(),
        committed = outcome.committed,
        rolled_back = outcome.rolled_back,
        "incremental recovery complete"
    );
    Ok(IncrementalOutcome {
        committed: outcome.committed,
        rolled_back: outcome.rolled_back,
    })
}
