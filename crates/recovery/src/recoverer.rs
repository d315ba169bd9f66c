//! The presumed-abort recoverer
//!
//! A one-shot runnable with a reentrancy guard: any number of concurrent
//! `run()` calls collapse into a single execution, and `executions_count`
//! increments exactly once per run actually performed.
//!
//! ## Partitioning in-doubt branches
//!
//! For every in-doubt Xid a resource reports (after filtering foreign format
//! ids and, optionally, other nodes' gtrids):
//!
//! ```text
//! gtrid younger than the in-flight fence ─▶ skip (transaction still running)
//! gtrid dangling & resource named in it ──▶ commit (journal Committed when
//!                                           the record's name set empties)
//! otherwise ──────────────────────────────▶ rollback (presumed abort)
//! ```
//!
//! The in-flight fence is the creation timestamp of the oldest transaction
//! still running on this node, supplied by the [`InFlightTracker`] hook; with
//! no tracker (or no transaction in flight) the fence is `+inf` and nothing
//! is skipped. Rolling back a branch whose transaction sits between phase 1
//! and phase 2 would break atomicity; skipping it is always safe because the
//! next run picks it up.

use crate::resource::{RecoverableResource, ResourceRegistrar, TMENDRSCAN, TMSTARTRSCAN};
use dtx_core::xid::FORMAT_ID;
use dtx_core::{Error, TxStatus, Uid};
use dtx_journal::{Journal, JournalRecord};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Clock skew guard subtracted from the in-flight fence, in milliseconds
///
/// A branch created this close to the fence is treated as in-flight even if
/// its timestamp is nominally older; skipping is safe, rolling back is not.
pub const RECOVERY_CLOCK_SKEW_MS: i64 = 10;

/// Source of the oldest in-flight transaction timestamp
///
/// Implemented by the transaction manager; also the hook that lets the
/// recoverer run from inside a transaction's status-changed callback without
/// harming that transaction.
pub trait InFlightTracker: Send + Sync {
    /// Creation timestamp (ms) of the oldest transaction still in flight,
    /// or `None` when the node is idle
    fn oldest_in_flight_timestamp(&self) -> Option<i64>;
}

/// Dangling journal state being consumed by a recovery pass
pub(crate) struct DanglingTransactions {
    entries: HashMap<Uid, DanglingEntry>,
}

struct DanglingEntry {
    /// Name set as journaled; logged back with the `Committed` record
    original_names: BTreeSet<String>,
    /// Names whose branch has not been committed yet
    remaining: BTreeSet<String>,
}

impl DanglingTransactions {
    pub(crate) fn new(dangling: HashMap<Uid, JournalRecord>) -> DanglingTransactions {
        let entries = dangling
            .into_iter()
            .map(|(gtrid, record)| {
                let names = record.unique_names().clone();
                (
                    gtrid,
                    DanglingEntry {
                        original_names: names.clone(),
                        remaining: names,
                    },
                )
            })
            .collect();
        DanglingTransactions { entries }
    }

    /// Does the journal order a commit of this resource's branch?
    fn names_resource(&self, gtrid: &Uid, unique_name: &str) -> bool {
        self.entries
            .get(gtrid)
            .map(|e| e.remaining.contains(unique_name))
            .unwrap_or(false)
    }

    /// Mark one branch committed; returns the original name set when the
    /// whole transaction is now complete and should be journaled `Committed`
    fn complete_branch(&mut self, gtrid: &Uid, unique_name: &str) -> Option<BTreeSet<String>> {
        let entry = self.entries.get_mut(gtrid)?;
        entry.remaining.remove(unique_name);
        if entry.remaining.is_empty() {
            let entry = self.entries.remove(gtrid)?;
            Some(entry.original_names)
        } else {
            None
        }
    }

    /// Gtrids still dangling (unknown or failed resources)
    pub(crate) fn remaining(&self) -> usize {
        self.entries.len()
    }
}

/// Outcome of recovering one resource
#[derive(Default)]
pub(crate) struct ResourceRecoveryOutcome {
    pub(crate) committed: u64,
    pub(crate) rolled_back: u64,
    /// First per-branch or scan failure; non-fatal to the run
    pub(crate) first_failure: Option<Error>,
}

/// Recover a single resource against the shared dangling state
///
/// Per-resource and per-branch failures are captured in the outcome; an
/// `Err` is returned only for journal failures, which abort the whole run.
pub(crate) fn recover_resource(
    resource: &dyn RecoverableResource,
    journal: &dyn Journal,
    dangling: &mut DanglingTransactions,
    fence: i64,
    node_filter: Option<&[u8]>,
) -> dtx_core::Result<ResourceRecoveryOutcome> {
    let mut outcome = ResourceRecoveryOutcome::default();
    let unique_name = resource.unique_name();

    let xids = match resource.recover(TMSTARTRSCAN | TMENDRSCAN) {
        Ok(xids) => xids,
        Err(e) => {
            warn!(resource = unique_name, error = %e, "recovery scan failed on resource");
            outcome.first_failure = Some(e);
            return Ok(outcome);
        }
    };
    debug!(resource = unique_name, in_doubt = xids.len(), "recovery scan");

    let threshold = fence.saturating_sub(RECOVERY_CLOCK_SKEW_MS);
    for xid in xids {
        if xid.format_id() != FORMAT_ID {
            debug!(%xid, "skipping foreign xid");
            continue;
        }
        if let Some(server_id) = node_filter {
            if xid.gtrid().extract_server_id() != server_id {
                debug!(%xid, "skipping xid created by another node");
                continue;
            }
        }

        // a branch of a transaction still running on this node is not acted
        // upon at all, not even when its Committing record is already
        // journaled: the live transaction manager is completing it, and a
        // concurrent commit or rollback here would race that completion
        if xid
            .gtrid()
            .extract_timestamp()
            .map_or(false, |ts| ts >= threshold)
        {
            debug!(%xid, "skipping branch of an in-flight transaction");
        } else if dangling.names_resource(xid.gtrid(), unique_name) {
            match resource.commit(&xid, false) {
                Ok(()) => {
                    outcome.committed += 1;
                    debug!(resource = unique_name, %xid, "committed in-doubt branch");
                    if let Some(original_names) = dangling.complete_branch(xid.gtrid(), unique_name)
                    {
                        // every named resource committed: seal the transaction
                        journal.log(TxStatus::Committed, xid.gtrid(), &original_names)?;
                    }
                }
                Err(e) => {
                    warn!(resource = unique_name, %xid, error = %e, "commit of in-doubt branch failed");
                    outcome.first_failure.get_or_insert(e);
                }
            }
        } else {
            match resource.rollback(&xid) {
                Ok(()) => {
                    outcome.rolled_back += 1;
                    debug!(resource = unique_name, %xid, "rolled back in-doubt branch");
                }
                Err(e) => {
                    warn!(resource = unique_name, %xid, error = %e, "rollback of in-doubt branch failed");
                    outcome.first_failure.get_or_insert(e);
                }
            }
        }
    }
    Ok(outcome)
}

/// The full-recovery driver
///
/// Holds the journal and the resource registrar, aggregates counters across
/// a run and stores the last completion failure for introspection.
pub struct Recoverer {
    journal: Arc<dyn Journal>,
    registrar: Arc<ResourceRegistrar>,
    server_id: Vec<u8>,
    current_node_only: bool,
    in_flight_tracker: Mutex<Option<Arc<dyn InFlightTracker>>>,
    running: AtomicBool,
    executions_count: AtomicU64,
    committed_count: AtomicU64,
    rolledback_count: AtomicU64,
    completion_failure: Mutex<Option<Error>>,
}

impl Recoverer {
    /// Build a recoverer
    ///
    /// With `current_node_only`, in-doubt Xids whose gtrid does not carry
    /// `server_id` as its prefix are ignored (another node will recover
    /// them).
    pub fn new(
        journal: Arc<dyn Journal>,
        registrar: Arc<ResourceRegistrar>,
        server_id: Vec<u8>,
        current_node_only: bool,
    ) -> Recoverer {
        Recoverer {
            journal,
            registrar,
            server_id,
            current_node_only,
            in_flight_tracker: Mutex::new(None),
            running: AtomicBool::new(false),
            executions_count: AtomicU64::new(0),
            committed_count: AtomicU64::new(0),
            rolledback_count: AtomicU64::new(0),
            completion_failure: Mutex::new(None),
        }
    }

    /// Install (or clear) the in-flight transaction hook
    pub fn set_in_flight_tracker(&self, tracker: Option<Arc<dyn InFlightTracker>>) {
        *self.in_flight_tracker.lock() = tracker;
    }

    /// Run a recovery pass
    ///
    /// At most one execution per process at a time: calls made while a run
    /// is in progress return immediately without touching any counter.
    /// Failures never panic the caller; they are stored and readable via
    /// [`Recoverer::completion_failure`].
    pub fn run(&self) {
        if self
            .running
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            debug!("recovery already in progress, skipping");
            return;
        }

        self.committed_count.store(0, Ordering::Relaxed);
        self.rolledback_count.store(0, Ordering::Relaxed);
        *self.completion_failure.lock() = None;

        if let Err(e) = self.recover_all_resources() {
            error!(error = %e, "recovery run failed");
            *self.completion_failure.lock() = Some(e);
        }

        self.executions_count.fetch_add(1, Ordering::Relaxed);
        self.running.store(false, Ordering::Release);
    }

    fn recover_all_resources(&self) -> dtx_core::Result<()> {
        let fence = self
            .in_flight_tracker
            .lock()
            .as_ref()
            .and_then(|t| t.oldest_in_flight_timestamp())
            .unwrap_or(i64::MAX);
        let node_filter = self.current_node_only.then_some(self.server_id.as_slice());

        let mut dangling =
            DanglingTransactions::new(self.journal.collect_dangling_records()?);
        let resources = self.registrar.snapshot();

        for resource in &resources {
            let outcome = recover_resource(
                resource.as_ref(),
                self.journal.as_ref(),
                &mut dangling,
                fence,
                node_filter,
            )?;
            self.committed_count
                .fetch_add(outcome.committed, Ordering::Relaxed);
            self.rolledback_count
                .fetch_add(outcome.rolled_back, Ordering::Relaxed);
            if let Some(failure) = outcome.first_failure {
                self.completion_failure.lock().get_or_insert(failure);
            }
        }

        // seal the Committed records logged during the pass
        self.journal.force()?;

        info!(
            resources = resources.len(),
            committed = self.committed_count.load(Ordering::Relaxed),
            rolledback = self.rolledback_count.load(Ordering::Relaxed),
            dangling_left = dangling.remaining(),
            "recovery pass complete"
        );
        Ok(())
    }

    /// Branches committed by the last run
    pub fn committed_count(&self) -> u64 {
        self.committed_count.load(Ordering::Relaxed)
    }

    /// Branches rolled back by the last run
    pub fn rolledback_count(&self) -> u64 {
        self.rolledback_count.load(Ordering::Relaxed)
    }

    /// Number of recovery passes actually performed
    pub fn executions_count(&self) -> u64 {
        self.executions_count.load(Ordering::Relaxed)
    }

    /// Message of the last run's failure, if any
    ///
    /// Covers both fatal journal failures and the first per-resource
    /// failure of an otherwise completed run.
    pub fn completion_failure(&self) -> Option<String> {
        self.completion_failure.lock().as_ref().map(|e| e.to_string())
    }
}
