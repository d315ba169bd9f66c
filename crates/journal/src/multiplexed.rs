//! Multiplexed journal: two journals written in parallel, merged on read
//!
//! Every mutating operation fans out to both underlying journals and is
//! joined before returning: the operation succeeds iff both legs succeed,
//! and callers never observe the concurrency. Reads reconcile the two legs:
//! corruption or loss confined to one leg is healed by the other, and a
//! dangling record is only dropped when the *other* journal positively
//! witnesses its completion for the same resource names.
//!
//! Each leg gets one dedicated worker thread (a fan-out of two needs no more)
//! so a slow or blocked leg cannot reorder the other leg's operations.

use crate::record::JournalRecord;
use crate::records::JournalRecords;
use crate::Journal;
use dtx_core::{Error, Result, TxStatus, Uid};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Bounded wait for the worker threads to drain at shutdown
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(20);

type Task = Box<dyn FnOnce(&dyn Journal) + Send>;

struct Worker {
    sender: Sender<Task>,
    handle: JoinHandle<()>,
}

/// High-availability journal writing through two independent legs
pub struct MultiplexedJournal {
    primary: Arc<dyn Journal>,
    secondary: Arc<dyn Journal>,
    fail_on_record_corruption: bool,
    workers: Mutex<Option<[Worker; 2]>>,
}

impl MultiplexedJournal {
    /// Build a multiplexed journal over two legs
    ///
    /// `fail_on_record_corruption` controls the read-side intersection rule:
    /// when both legs report the same corrupted record index, the merged read
    /// fails instead of silently proceeding.
    pub fn new(
        primary: Arc<dyn Journal>,
        secondary: Arc<dyn Journal>,
        fail_on_record_corruption: bool,
    ) -> MultiplexedJournal {
        MultiplexedJournal {
            primary,
            secondary,
            fail_on_record_corruption,
            workers: Mutex::new(None),
        }
    }

    fn spawn_worker(journal: Arc<dyn Journal>, name: &str) -> Result<Worker> {
        let (sender, receiver) = mpsc::channel::<Task>();
        let handle = std::thread::Builder::new()
            .name(format!("dtx-journal-{}", name))
            .spawn(move || {
                for task in receiver.iter() {
                    task(journal.as_ref());
                }
            })
            .map_err(Error::from)?;
        Ok(Worker { sender, handle })
    }

    fn senders(&self) -> Result<[Sender<Task>; 2]> {
        let guard = self.workers.lock();
        let workers = guard
            .as_ref()
            .ok_or_else(|| Error::invalid_state("multiplexed journal is not open"))?;
        Ok([workers[0].sender.clone(), workers[1].sender.clone()])
    }

    /// Run `op` on both legs concurrently and capture each leg's outcome
    ///
    /// A leg whose worker died (the task or a predecessor panicked) reports
    /// an `Internal` error; callers propagate those immediately instead of
    /// folding them into the leg-failure handling.
    fn execute_both<T: Send + 'static>(
        &self,
        op: Arc<dyn Fn(&dyn Journal) -> Result<T> + Send + Sync>,
    ) -> Result<(Result<T>, Result<T>)> {
        let [primary_sender, secondary_sender] = self.senders()?;
        let primary_rx = Self::submit(&primary_sender, op.clone());
        let secondary_rx = Self::submit(&secondary_sender, op);
        Ok((Self::await_leg(primary_rx), Self::await_leg(secondary_rx)))
    }

    fn submit<T: Send + 'static>(
        sender: &Sender<Task>,
        op: Arc<dyn Fn(&dyn Journal) -> Result<T> + Send + Sync>,
    ) -> Option<mpsc::Receiver<Result<T>>> {
        let (result_tx, result_rx) = mpsc::channel::<Result<T>>();
        let task: Task = Box::new(move |journal| {
            let _ = result_tx.send(op(journal));
        });
        sender.send(task).ok()?;
        Some(result_rx)
    }

    fn await_leg<T>(receiver: Option<mpsc::Receiver<Result<T>>>) -> Result<T> {
        match receiver {
            None => Err(Error::internal("journal worker is gone")),
            Some(rx) => rx
                .recv()
                .unwrap_or_else(|_| Err(Error::internal("journal worker terminated unexpectedly"))),
        }
    }

    /// Join a fan-out whose success requires both legs to succeed
    fn join_both(&self, outcome: (Result<()>, Result<()>)) -> Result<()> {
        match outcome {
            (Ok(()), Ok(())) => Ok(()),
            (Err(p), Err(s)) => {
                if p.is_internal() {
                    return Err(p);
                }
                if s.is_internal() {
                    return Err(s);
                }
                Err(Error::io(format!(
                    "parallel journal operation failed on both journals\nprimary: {}\nsecondary: {}",
                    p, s
                )))
            }
            (Err(p), Ok(())) => Err(p),
            (Ok(()), Err(s)) => Err(s),
        }
    }

    /// Merge the two legs' records
    ///
    /// Committed records are the union by gtrid. A dangling record survives
    /// only with the resource names the other leg has not seen committed;
    /// an emptied name set drops the gtrid entirely. The merge is
    /// commutative: it depends only on set membership per gtrid.
    fn merge(primary: JournalRecords, secondary: JournalRecords) -> Result<JournalRecords> {
        let (primary_dangling, primary_committed) = primary.into_maps();
        let (secondary_dangling, secondary_committed) = secondary.into_maps();

        let mut dangling = Self::remove_committed(primary_dangling, &secondary_committed)?;
        dangling.extend(Self::remove_committed(
            secondary_dangling,
            &primary_committed,
        )?);

        let mut committed = primary_committed;
        committed.extend(secondary_committed);

        Ok(JournalRecords::from_maps(dangling, committed))
    }

    /// Subtract the other journal's committed name sets from a dangling map
    fn remove_committed(
        mut dangling: HashMap<Uid, JournalRecord>,
        other_committed: &HashMap<Uid, JournalRecord>,
    ) -> Result<HashMap<Uid, JournalRecord>> {
        let gtrids: Vec<Uid> = dangling.keys().cloned().collect();
        for gtrid in gtrids {
            let Some(committed) = other_committed.get(&gtrid) else {
                continue;
            };
            let record = &dangling[&gtrid];
            let remaining: BTreeSet<String> = record
                .unique_names()
                .difference(committed.unique_names())
                .cloned()
                .collect();
            if remaining.is_empty() {
                dangling.remove(&gtrid);
            } else {
                let reduced = JournalRecord::new(
                    TxStatus::Committing,
                    gtrid.clone(),
                    remaining,
                    record.time(),
                    record.sequence_number(),
                )?;
                dangling.insert(gtrid, reduced);
            }
        }
        Ok(dangling)
    }
}

impl Journal for MultiplexedJournal {
    fn open(&self) -> Result<()> {
        {
            let mut guard = self.workers.lock();
            if guard.is_none() {
                let primary = Self::spawn_worker(self.primary.clone(), "primary")?;
                let secondary = Self::spawn_worker(self.secondary.clone(), "secondary")?;
                *guard = Some([primary, secondary]);
            }
        }
        let outcome = self.execute_both(Arc::new(|journal: &dyn Journal| journal.open()))?;
        self.join_both(outcome)
    }

    fn close(&self) -> Result<()> {
        if self.workers.lock().is_none() {
            return Ok(());
        }
        let outcome = self.execute_both(Arc::new(|journal: &dyn Journal| journal.close()))?;
        self.join_both(outcome)
    }

    fn shutdown(&self) -> Result<()> {
        let Some(workers) = self.workers.lock().take() else {
            return Ok(());
        };

        // shut the legs down through their own workers first
        for worker in &workers {
            let task: Task = Box::new(|journal| {
                if let Err(e) = journal.shutdown() {
                    error!(error = %e, "error shutting down journal leg, log integrity could be compromised");
                }
            });
            let _ = worker.sender.send(task);
        }

        // bounded drain, then let the workers exit by closing their channels
        let mut drained = true;
        for worker in &workers {
            let (ack_tx, ack_rx) = mpsc::channel::<()>();
            let task: Task = Box::new(move |_| {
                let _ = ack_tx.send(());
            });
            if worker.sender.send(task).is_err() || ack_rx.recv_timeout(SHUTDOWN_TIMEOUT).is_err() {
                drained = false;
            }
        }

        for worker in workers {
            let Worker { sender, handle } = worker;
            drop(sender);
            if drained {
                if handle.join().is_err() {
                    error!("journal worker panicked during shutdown");
                }
            }
        }

        if !drained {
            return Err(Error::io(
                "timed out waiting for journal workers to terminate",
            ));
        }
        debug!("multiplexed journal shut down");
        Ok(())
    }

    fn log(&self, status: TxStatus, gtrid: &Uid, unique_names: &BTreeSet<String>) -> Result<()> {
        let gtrid = gtrid.clone();
        let unique_names = unique_names.clone();
        let outcome = self.execute_both(Arc::new(move |journal: &dyn Journal| {
            journal.log(status, &gtrid, &unique_names)
        }))?;
        self.join_both(outcome)
    }

    fn force(&self) -> Result<()> {
        let outcome = self.execute_both(Arc::new(|journal: &dyn Journal| journal.force()))?;
        self.join_both(outcome)
    }

    fn collect_dangling_records(&self) -> Result<HashMap<Uid, JournalRecord>> {
        Ok(self.collect_all_records()?.into_dangling())
    }

    fn collect_all_records(&self) -> Result<JournalRecords> {
        let (primary, secondary) =
            self.execute_both(Arc::new(|journal: &dyn Journal| journal.collect_all_records()))?;

        // a dead worker is a bug in this process, not a damaged leg
        if let Err(e) = &primary {
            if e.is_internal() {
                return primary;
            }
        }
        if let Err(e) = &secondary {
            if e.is_internal() {
                return secondary;
            }
        }

        match (primary, secondary) {
            (Err(p), Err(s)) => Err(Error::io(format!(
                "failed to collect records because both journals failed\nprimary: {}\nsecondary: {}",
                p, s
            ))),
            (Ok(p), Err(s)) => {
                warn!(error = %s, "failed to collect records from secondary journal, using primary only");
                Ok(p)
            }
            (Err(p), Ok(s)) => {
                warn!(error = %p, "failed to collect records from primary journal, using secondary only");
                Ok(s)
            }
            (Ok(p), Ok(s)) => {
                let shared: Vec<usize> = p.corrupted().intersection(s.corrupted()).copied().collect();
                if !shared.is_empty() && self.fail_on_record_corruption {
                    return Err(Error::io(format!(
                        "Both journals have same corrupted records. Record indices: {:?}. \
                         Set fail_on_record_corruption=false to tolerate corrupted records.",
                        shared
                    )));
                }
                Self::merge(p, s)
            }
        }
    }

    fn read_records(
        &self,
        include_invalid: bool,
    ) -> Result<Box<dyn Iterator<Item = Result<JournalRecord>> + Send + '_>> {
        // raw records from both legs back-to-back; gtrids logged while both
        // legs were healthy appear twice
        let primary = self.primary.read_records(include_invalid)?;
        let secondary = self.secondary.read_records(include_invalid)?;
        Ok(Box::new(primary.chain(secondary)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dtx_core::uid::generate_uid;

    fn record(status: TxStatus, gtrid: &Uid, names: &[&str]) -> JournalRecord {
        let names: BTreeSet<String> = names.iter().map(|s| s.to_string()).collect();
        JournalRecord::new(status, gtrid.clone(), names, 100, 1).unwrap()
    }

    fn records_with(
        dangling: Vec<JournalRecord>,
        committed: Vec<JournalRecord>,
    ) -> JournalRecords {
        let dangling = dangling
            .into_iter()
            .map(|r| (r.gtrid().clone(), r))
            .collect();
        let committed = committed
            .into_iter()
            .map(|r| (r.gtrid().clone(), r))
            .collect();
        JournalRecords::from_maps(dangling, committed)
    }

    #[test]
    fn test_merge_drops_dangling_committed_on_other_side() {
        let gtrid = generate_uid(b"n").unwrap();
        let primary = records_with(
            vec![record(TxStatus::Committing, &gtrid, &["rs0"])],
            vec![],
        );
        let secondary = records_with(vec![], vec![record(TxStatus::Committed, &gtrid, &["rs0"])]);

        let merged = MultiplexedJournal::merge(primary, secondary).unwrap();
        assert!(merged.dangling().is_empty());
        assert!(merged.committed().contains_key(&gtrid));
    }

    #[test]
    fn test_merge_reduces_name_set() {
        let gtrid = generate_uid(b"n").unwrap();
        let primary = records_with(
            vec![record(TxStatus::Committing, &gtrid, &["rs0", "rs1"])],
            vec![],
        );
        let secondary = records_with(vec![], vec![record(TxStatus::Committed, &gtrid, &["rs0"])]);

        let merged = MultiplexedJournal::merge(primary, secondary).unwrap();
        let residual = merged.dangling().get(&gtrid).unwrap();
        assert_eq!(
            residual.unique_names().iter().collect::<Vec<_>>(),
            vec!["rs1"]
        );
    }

    #[test]
    fn test_merge_is_commutative() {
        let g0 = generate_uid(b"n").unwrap();
        let g1 = generate_uid(b"n").unwrap();
        let a = records_with(
            vec![record(TxStatus::Committing, &g0, &["rs0", "rs1"])],
            vec![record(TxStatus::Committed, &g1, &["rs0"])],
        );
        let b = records_with(
            vec![record(TxStatus::Committing, &g1, &["rs0"])],
            vec![record(TxStatus::Committed, &g0, &["rs0"])],
        );
        let a2 = records_with(
            vec![record(TxStatus::Committing, &g0, &["rs0", "rs1"])],
            vec![record(TxStatus::Committed, &g1, &["rs0"])],
        );
        let b2 = records_with(
            vec![record(TxStatus::Committing, &g1, &["rs0"])],
            vec![record(TxStatus::Committed, &g0, &["rs0"])],
        );

        let ab = MultiplexedJournal::merge(a, b).unwrap();
        let ba = MultiplexedJournal::merge(b2, a2).unwrap();

        assert_eq!(
            ab.dangling().keys().collect::<std::collections::BTreeSet<_>>(),
            ba.dangling().keys().collect::<std::collections::BTreeSet<_>>()
        );
        assert_eq!(
            ab.committed().keys().collect::<std::collections::BTreeSet<_>>(),
            ba.committed().keys().collect::<std::collections::BTreeSet<_>>()
        );
        for (gtrid, record) in ab.dangling() {
            assert_eq!(record.unique_names(), ba.dangling()[gtrid].unique_names());
        }
    }

    #[test]
    fn test_merge_keeps_dangling_unknown_to_other_side() {
        let gtrid = generate_uid(b"n").unwrap();
        let primary = records_with(
            vec![record(TxStatus::Committing, &gtrid, &["rs0"])],
            vec![],
        );
        let secondary = records_with(vec![], vec![]);

        let merged = MultiplexedJournal::merge(primary, secondary).unwrap();
        assert!(merged.dangling().contains_key(&gtrid));
    }
}
