//! Concurrent writer tests
//!
//! Every appender opens its own handle, the same way separate processes
//! would, so these exercise the advisory lock and `O_APPEND` path.

use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use ct_core::{JobId, RunId};
use ct_ledger::{Ledger, LedgerEntry};

const WRITERS: usize = 8;
const ROWS_PER_WRITER: usize = 50;

#[test]
fn test_concurrent_appends_never_interleave() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("ledger.jsonl");

    let handles: Vec<_> = (0..WRITERS)
        .map(|w| {
            let ledger = Ledger::new(path.clone());
            thread::spawn(move || {
                for i in 0..ROWS_PER_WRITER {
                    let job = JobId::new(format!("{}-{}", w, i));
                    // Long run ids make torn writes easy to spot
                    let run = RunId::new("r".repeat(512));
                    ledger.record(job, run, format!("project-{}", w)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), WRITERS * ROWS_PER_WRITER);
    for line in text.lines() {
        let row: LedgerEntry = serde_json::from_str(line).expect("every row is intact");
        assert_eq!(row.run_id.as_str().len(), 512);
    }

    let ledger = Ledger::new(path);
    for w in 0..WRITERS {
        let rows: Vec<_> = ledger
            .all_for_project(&format!("project-{}", w))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(rows.len(), ROWS_PER_WRITER);
    }
}

#[test]
fn test_reader_during_appends_sees_whole_rows() {
    let dir = TempDir::new().unwrap();
    let ledger = Arc::new(Ledger::new(dir.path().join("ledger.jsonl")));

    let writer = {
        let ledger = Arc::clone(&ledger);
        thread::spawn(move || {
            for i in 0..200 {
                ledger
                    .record(JobId::new(i.to_string()), RunId::none(), "p")
                    .unwrap();
            }
        })
    };

    let mut last_seen = 0;
    while !writer.is_finished() {
        let seen = ledger.all_for_project("p").collect::<Result<Vec<_>, _>>().unwrap().len();
        assert!(seen >= last_seen);
        last_seen = seen;
    }
    writer.join().unwrap();

    assert_eq!(ledger.entries().count(), 200);
}

#[test]
fn test_placeholder_then_run_row() {
    let dir = TempDir::new().unwrap();
    let ledger = Ledger::new(dir.path().join(".chtc/ledger.jsonl"));
    let job = JobId::new("4410123");

    ledger
        .append(&LedgerEntry::new(job.clone(), RunId::none(), "mnist").with_remote_dir("chtc-jobs/mnist"))
        .unwrap();
    assert!(!ledger.latest(&job).unwrap().unwrap().has_run());

    ledger
        .append(&LedgerEntry::new(job.clone(), RunId::new("3kd9x2"), "mnist").with_remote_dir("chtc-jobs/mnist"))
        .unwrap();
    let latest = ledger.latest(&job).unwrap().unwrap();
    assert_eq!(latest.run_id, RunId::new("3kd9x2"));
    assert_eq!(latest.remote_dir.as_deref(), Some("chtc-jobs/mnist"));
}
