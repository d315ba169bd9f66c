//! Disk journal round-trip tests
//!
//! These tests verify the basic journal contract:
//! - records written via `log` come back under the correct bucket after
//!   `force` + reopen (dangling vs committed)
//! - duplicate status logs are idempotent on recovery
//! - lifecycle misuse fails fast

use dtx_core::uid::generate_uid;
use dtx_core::TxStatus;
use dtx_journal::{DiskJournal, DiskJournalConfig, Journal};
use std::collections::BTreeSet;
use tempfile::TempDir;

fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn open_journal(dir: &TempDir) -> DiskJournal {
    let journal = DiskJournal::new(DiskJournalConfig::for_testing(dir.path())).unwrap();
    journal.open().unwrap();
    journal
}

#[test]
fn test_committing_is_dangling_after_reopen() {
    let dir = TempDir::new().unwrap();
    let gtrid = generate_uid(b"test-node").unwrap();

    {
        let journal = open_journal(&dir);
        journal
            .log(TxStatus::Committing, &gtrid, &names(&["rs0", "rs1"]))
            .unwrap();
        journal.force().unwrap();
        journal.close().unwrap();
    }

    let journal = open_journal(&dir);
    let all = journal.collect_all_records().unwrap();
    assert_eq!(all.dangling().len(), 1);
    assert_eq!(all.committed().len(), 0);
    let record = all.dangling().get(&gtrid).unwrap();
    assert_eq!(record.unique_names(), &names(&["rs0", "rs1"]));
    journal.close().unwrap();
}

#[test]
fn test_committed_clears_dangling_after_reopen() {
    let dir = TempDir::new().unwrap();
    let gtrid = generate_uid(b"test-node").unwrap();

    {
        let journal = open_journal(&dir);
        journal
            .log(TxStatus::Committing, &gtrid, &names(&["rs"]))
            .unwrap();
        journal
            .log(TxStatus::Committed, &gtrid, &names(&["rs"]))
            .unwrap();
        journal.force().unwrap();
        journal.close().unwrap();
    }

    let journal = open_journal(&dir);
    let all = journal.collect_all_records().unwrap();
    assert!(all.dangling().is_empty());
    assert_eq!(all.committed().len(), 1);
    assert!(all.committed().contains_key(&gtrid));
    journal.close().unwrap();
}

#[test]
fn test_committed_without_committing_is_recorded() {
    let dir = TempDir::new().unwrap();
    let gtrid = generate_uid(b"test-node").unwrap();

    let journal = open_journal(&dir);
    journal
        .log(TxStatus::Committed, &gtrid, &names(&["rs"]))
        .unwrap();
    let all = journal.collect_all_records().unwrap();
    assert!(all.dangling().is_empty());
    assert!(all.committed().contains_key(&gtrid));
    journal.close().unwrap();
}

#[test]
fn test_duplicate_logs_are_idempotent() {
    let dir = TempDir::new().unwrap();
    let gtrid = generate_uid(b"test-node").unwrap();

    let journal = open_journal(&dir);
    for _ in 0..3 {
        journal
            .log(TxStatus::Committing, &gtrid, &names(&["rs"]))
            .unwrap();
    }
    for _ in 0..3 {
        journal
            .log(TxStatus::Committed, &gtrid, &names(&["rs"]))
            .unwrap();
    }
    let all = journal.collect_all_records().unwrap();
    assert_eq!(all.dangling().len(), 0);
    assert_eq!(all.committed().len(), 1);
    journal.close().unwrap();
}

#[test]
fn test_log_on_unopened_journal_fails_fast() {
    let dir = TempDir::new().unwrap();
    let journal = DiskJournal::new(DiskJournalConfig::for_testing(dir.path())).unwrap();
    let gtrid = generate_uid(b"test-node").unwrap();

    let err = journal
        .log(TxStatus::Committing, &gtrid, &names(&["rs"]))
        .unwrap_err();
    assert!(matches!(err, dtx_core::Error::InvalidState(_)));
    assert!(journal.force().is_err());
    assert!(journal.collect_all_records().is_err());
}

#[test]
fn test_close_is_idempotent_and_logging_after_close_fails() {
    let dir = TempDir::new().unwrap();
    let journal = open_journal(&dir);
    journal.close().unwrap();
    journal.close().unwrap();
    journal.shutdown().unwrap();

    let gtrid = generate_uid(b"test-node").unwrap();
    assert!(journal.log(TxStatus::Committing, &gtrid, &names(&["rs"])).is_err());
}

#[test]
fn test_filter_log_status_suppresses_non_mandatory() {
    let dir = TempDir::new().unwrap();
    let config = DiskJournalConfig::for_testing(dir.path()).with_filter_log_status(true);
    let journal = DiskJournal::new(config).unwrap();
    journal.open().unwrap();

    let gtrid = generate_uid(b"test-node").unwrap();
    journal.log(TxStatus::Active, &gtrid, &names(&["rs"])).unwrap();
    journal
        .log(TxStatus::RolledBack, &gtrid, &names(&["rs"]))
        .unwrap();
    journal
        .log(TxStatus::Committing, &gtrid, &names(&["rs"]))
        .unwrap();

    let count = journal.read_records(false).unwrap().count();
    assert_eq!(count, 1, "only the mandatory status should have been written");
    journal.close().unwrap();
}

#[test]
fn test_read_records_yields_everything_in_order() {
    let dir = TempDir::new().unwrap();
    let journal = open_journal(&dir);

    let g0 = generate_uid(b"test-node").unwrap();
    let g1 = generate_uid(b"test-node").unwrap();
    journal.log(TxStatus::Committing, &g0, &names(&["rs"])).unwrap();
    journal.log(TxStatus::Committed, &g0, &names(&["rs"])).unwrap();
    journal.log(TxStatus::Committing, &g1, &names(&["rs"])).unwrap();

    let records: Vec<_> = journal
        .read_records(false)
        .unwrap()
        .collect::<Result<Vec<_>, _>>()
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].gtrid(), &g0);
    assert_eq!(records[0].tx_status(), Some(TxStatus::Committing));
    assert_eq!(records[1].tx_status(), Some(TxStatus::Committed));
    assert_eq!(records[2].gtrid(), &g1);

    // sequence numbers are strictly increasing within the journal
    assert!(records[0].sequence_number() < records[1].sequence_number());
    assert!(records[1].sequence_number() < records[2].sequence_number());
    journal.close().unwrap();
}

#[test]
fn test_collect_dangling_records_matches_all_records_bucket() {
    let dir = TempDir::new().unwrap();
    let journal = open_journal(&dir);

    let g0 = generate_uid(b"test-node").unwrap();
    let g1 = generate_uid(b"test-node").unwrap();
    journal.log(TxStatus::Committing, &g0, &names(&["rs"])).unwrap();
    journal.log(TxStatus::Committing, &g1, &names(&["rs"])).unwrap();
    journal.log(TxStatus::Committed, &g1, &names(&["rs"])).unwrap();

    let dangling = journal.collect_dangling_records().unwrap();
    assert_eq!(dangling.len(), 1);
    assert!(dangling.contains_key(&g0));
    journal.close().unwrap();
}
