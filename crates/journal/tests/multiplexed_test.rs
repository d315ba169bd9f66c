//! Multiplexed journal tests
//!
//! Dual-leg behavior at the journal level: loss or corruption confined to
//! one leg is healed by the other; identical corruption on both legs is
//! fatal when `fail_on_record_corruption` is set.

use dtx_core::uid::generate_uid;
use dtx_core::{TxStatus, Uid};
use dtx_journal::header::HEADER_LENGTH;
use dtx_journal::{DiskJournal, DiskJournalConfig, Journal, MultiplexedJournal};
use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn leg_config(dir: &Path, part1: &str, part2: &str) -> DiskJournalConfig {
    DiskJournalConfig::for_testing(dir)
        .with_log_files(dir.join(part1), dir.join(part2))
        .with_skip_corrupted_logs(true)
}

fn build_multiplexed(dir: &Path, fail_on_record_corruption: bool) -> MultiplexedJournal {
    let primary = Arc::new(DiskJournal::new(leg_config(dir, "part1.tlog", "part2.tlog")).unwrap());
    let secondary =
        Arc::new(DiskJournal::new(leg_config(dir, "part3.tlog", "part4.tlog")).unwrap());
    MultiplexedJournal::new(primary, secondary, fail_on_record_corruption)
}

fn log_completed_transaction(journal: &MultiplexedJournal) -> Uid {
    let gtrid = generate_uid(b"test-node").unwrap();
    journal
        .log(TxStatus::Committing, &gtrid, &names(&["rs"]))
        .unwrap();
    journal
        .log(TxStatus::Committed, &gtrid, &names(&["rs"]))
        .unwrap();
    journal.force().unwrap();
    gtrid
}

fn corrupt_byte(path: &Path, offset: u64) {
    let mut file = OpenOptions::new().write(true).open(path).unwrap();
    file.seek(SeekFrom::Start(offset)).unwrap();
    file.write_all(&[0xFF]).unwrap();
    file.sync_all().unwrap();
}

#[test]
fn test_both_legs_agree_when_healthy() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    let gtrid = log_completed_transaction(&journal);

    let all = journal.collect_all_records().unwrap();
    assert!(all.dangling().is_empty());
    assert!(all.committed().contains_key(&gtrid));

    journal.close().unwrap();
    journal.shutdown().unwrap();
}

#[test]
fn test_deleted_leg_is_healed_by_the_other() {
    for delete_primary in [true, false] {
        let dir = TempDir::new().unwrap();
        let journal = build_multiplexed(dir.path(), true);
        journal.open().unwrap();
        let gtrid = log_completed_transaction(&journal);
        journal.close().unwrap();
        journal.shutdown().unwrap();

        let (a, b) = if delete_primary {
            ("part1.tlog", "part2.tlog")
        } else {
            ("part3.tlog", "part4.tlog")
        };
        std::fs::remove_file(dir.path().join(a)).unwrap();
        std::fs::remove_file(dir.path().join(b)).unwrap();

        let journal = build_multiplexed(dir.path(), true);
        journal.open().unwrap();
        let all = journal.collect_all_records().unwrap();
        assert!(
            all.committed().contains_key(&gtrid),
            "surviving leg should supply the committed record"
        );
        assert!(all.dangling().is_empty());
        journal.close().unwrap();
        journal.shutdown().unwrap();
    }
}

#[test]
fn test_committed_rewritten_as_committing_on_one_leg_is_healed() {
    for corrupt_primary in [true, false] {
        let dir = TempDir::new().unwrap();
        let journal = build_multiplexed(dir.path(), true);
        journal.open().unwrap();
        let gtrid = log_completed_transaction(&journal);
        journal.close().unwrap();
        journal.shutdown().unwrap();

        // rewrite one leg so the transaction looks like it never finished:
        // replay its committed records as Committing into a fresh leg
        let (part1, part2) = if corrupt_primary {
            ("part1.tlog", "part2.tlog")
        } else {
            ("part3.tlog", "part4.tlog")
        };
        let leg = DiskJournal::new(leg_config(dir.path(), part1, part2)).unwrap();
        leg.open().unwrap();
        let committed = leg.collect_all_records().unwrap();
        leg.close().unwrap();
        std::fs::remove_file(dir.path().join(part1)).unwrap();
        std::fs::remove_file(dir.path().join(part2)).unwrap();

        let leg = DiskJournal::new(leg_config(dir.path(), part1, part2)).unwrap();
        leg.open().unwrap();
        for record in committed.committed().values() {
            leg.log(TxStatus::Committing, record.gtrid(), record.unique_names())
                .unwrap();
        }
        leg.force().unwrap();
        leg.close().unwrap();

        // the other leg still has the Committed record: merged view is clean
        let journal = build_multiplexed(dir.path(), true);
        journal.open().unwrap();
        let all = journal.collect_all_records().unwrap();
        assert!(all.dangling().is_empty(), "other leg should heal the rewound record");
        assert!(all.committed().contains_key(&gtrid));
        journal.close().unwrap();
        journal.shutdown().unwrap();
    }
}

#[test]
fn test_same_record_corrupted_on_both_legs_is_fatal() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    log_completed_transaction(&journal);
    journal.close().unwrap();
    journal.shutdown().unwrap();

    // identical damage to record 0 of both legs (header length field)
    corrupt_byte(&dir.path().join("part1.tlog"), HEADER_LENGTH + 8);
    corrupt_byte(&dir.path().join("part3.tlog"), HEADER_LENGTH + 8);

    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    let err = journal.collect_all_records().unwrap_err();
    assert!(
        err.to_string().contains("Both journals have same corrupted records."),
        "unexpected error: {}",
        err
    );
    journal.close().unwrap();
    journal.shutdown().unwrap();
}

#[test]
fn test_same_record_corruption_tolerated_when_configured() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    let g0 = log_completed_transaction(&journal);
    let g1 = log_completed_transaction(&journal);
    journal.close().unwrap();
    journal.shutdown().unwrap();

    corrupt_byte(&dir.path().join("part1.tlog"), HEADER_LENGTH + 8);
    corrupt_byte(&dir.path().join("part3.tlog"), HEADER_LENGTH + 8);

    let journal = build_multiplexed(dir.path(), false);
    journal.open().unwrap();
    let all = journal.collect_all_records().unwrap();
    // g0's Committing is gone on both legs, but its Committed survives
    assert!(all.committed().contains_key(&g0));
    assert!(all.committed().contains_key(&g1));
    assert!(all.dangling().is_empty());
    journal.close().unwrap();
    journal.shutdown().unwrap();
}

#[test]
fn test_operations_require_open() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    let gtrid = generate_uid(b"test-node").unwrap();
    assert!(journal.log(TxStatus::Committing, &gtrid, &names(&["rs"])).is_err());
    assert!(journal.collect_all_records().is_err());
    // close before open is a no-op
    journal.close().unwrap();
    journal.shutdown().unwrap();
}

#[test]
fn test_reopen_after_shutdown() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    let g0 = log_completed_transaction(&journal);
    journal.close().unwrap();
    journal.shutdown().unwrap();

    journal.open().unwrap();
    let g1 = log_completed_transaction(&journal);
    let all = journal.collect_all_records().unwrap();
    assert!(all.committed().contains_key(&g0));
    assert!(all.committed().contains_key(&g1));
    journal.close().unwrap();
    journal.shutdown().unwrap();
}

#[test]
fn test_read_records_chains_both_legs() {
    let dir = TempDir::new().unwrap();
    let journal = build_multiplexed(dir.path(), true);
    journal.open().unwrap();
    log_completed_transaction(&journal);

    let count = journal
        .read_records(false)
        .unwrap()
        .filter(|r| r.is_ok())
        .count();
    // two records per leg
    assert_eq!(count, 4);
    journal.close().unwrap();
    journal.shutdown().unwrap();
}
