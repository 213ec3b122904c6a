//! Integration tests for the ingestion driver against an in-memory mailbox.

mod common;

use std::cell::RefCell;

use assert_fs::prelude::*;
use predicates::prelude::*;

use common::{fixture_bytes, MemorySession};
use mailgrab::credentials::MailboxCredentials;
use mailgrab::ingest::{Ingestor, RunStatus};
use mailgrab::model::email::{Uid, NO_SUBJECT};
use mailgrab::store::EmailStore;

const GARBAGE: &[u8] = b"this payload has no header block at all";

fn mailbox() -> MemorySession {
    MemorySession::new(vec![
        ("101", fixture_bytes("plain.eml")),
        ("102", fixture_bytes("alternative.eml")),
        ("103", fixture_bytes("html_gbk.eml")),
        ("104", fixture_bytes("no_subject.eml")),
    ])
}

#[test]
fn test_first_run_ingests_everything() {
    let store = EmailStore::open_in_memory().unwrap();
    let session = mailbox();
    let closes = session.closes.clone();
    let report = Ingestor::new(&store).run_with_session(session);

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.attempted, 4);
    assert_eq!(report.ingested, 4);
    assert_eq!(report.skipped, 0);
    assert_eq!(report.failed, 0);
    assert_eq!(store.count().unwrap(), 4);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_second_run_skips_everything() {
    let store = EmailStore::open_in_memory().unwrap();
    Ingestor::new(&store).run_with_session(mailbox());

    let report = Ingestor::new(&store).run_with_session(mailbox());
    assert_eq!(report.attempted, 4);
    assert_eq!(report.ingested, 0);
    assert_eq!(report.skipped, 4);
    assert_eq!(store.count().unwrap(), 4);
}

#[test]
fn test_stored_bodies_use_lf_line_endings() {
    let store = EmailStore::open_in_memory().unwrap();
    Ingestor::new(&store).run_with_session(mailbox());

    for (_, body) in store.bodies().unwrap() {
        assert!(!body.contains('\r'), "CR left in stored body: {body:?}");
    }
}

#[test]
fn test_malformed_date_still_stored() {
    let store = EmailStore::open_in_memory().unwrap();
    Ingestor::new(&store).run_with_session(mailbox());

    let row = store.get(&Uid::new("104")).unwrap().unwrap();
    assert_eq!(row.content.sent_at, None);
    assert_eq!(row.content.subject, NO_SUBJECT);
    assert_eq!(row.content.sender, "noreply@example.com");
}

#[test]
fn test_unparseable_message_counted_and_quarantined() {
    let quarantine = assert_fs::TempDir::new().unwrap();
    let store = EmailStore::open_in_memory().unwrap();
    let session = MemorySession::new(vec![
        ("1", fixture_bytes("plain.eml")),
        ("2", GARBAGE.to_vec()),
        ("3", fixture_bytes("alternative.eml")),
    ]);

    let report = Ingestor::new(&store)
        .with_quarantine_dir(quarantine.path())
        .run_with_session(session);

    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.failed, 1);
    assert!(!store.exists(&Uid::new("2")).unwrap());

    quarantine
        .child("2.eml")
        .assert(predicate::path::is_file())
        .assert(predicate::str::contains("no header block"));
    quarantine.child("1.eml").assert(predicate::path::missing());
}

#[test]
fn test_fetch_error_does_not_stop_batch() {
    let store = EmailStore::open_in_memory().unwrap();
    let mut session = mailbox();
    session.broken_fetches.insert(2);

    let report = Ingestor::new(&store).run_with_session(session);
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.ingested, 3);
    assert_eq!(report.failed, 1);

    // The failed message is picked up on the next run.
    let report = Ingestor::new(&store).run_with_session(mailbox());
    assert_eq!(report.ingested, 1);
    assert_eq!(report.skipped, 3);
}

#[test]
fn test_select_failure_aborts_and_closes() {
    let store = EmailStore::open_in_memory().unwrap();
    let mut session = mailbox();
    session.fail_select = true;
    let closes = session.closes.clone();

    let report = Ingestor::new(&store)
        .with_mailbox("Archive")
        .run_with_session(session);

    match &report.status {
        RunStatus::Aborted { reason } => assert!(reason.contains("Archive")),
        other => panic!("expected abort, got {other:?}"),
    }
    assert_eq!(report.attempted, 0);
    assert_eq!(closes.get(), 1);
}

#[test]
fn test_connection_loss_aborts_and_resume_skips_done() {
    let store = EmailStore::open_in_memory().unwrap();
    let mut session = mailbox();
    session.drop_at = Some(3);
    let closes = session.closes.clone();

    let report = Ingestor::new(&store).run_with_session(session);
    assert!(matches!(report.status, RunStatus::Aborted { .. }));
    assert_eq!(report.attempted, 3);
    assert_eq!(report.ingested, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(closes.get(), 1);

    let report = Ingestor::new(&store).run_with_session(mailbox());
    assert_eq!(report.status, RunStatus::Completed);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.ingested, 2);
}

#[test]
fn test_duplicate_uid_in_listing_stored_once() {
    let store = EmailStore::open_in_memory().unwrap();
    let session = MemorySession::new(vec![
        ("7", fixture_bytes("plain.eml")),
        ("7", fixture_bytes("plain.eml")),
    ]);

    let report = Ingestor::new(&store).run_with_session(session);
    assert_eq!(report.ingested, 1);
    assert_eq!(report.skipped, 1);
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn test_progress_reports_each_message() {
    let store = EmailStore::open_in_memory().unwrap();
    let seen = RefCell::new(Vec::new());

    Ingestor::new(&store)
        .on_progress(|done, total| seen.borrow_mut().push((done, total)))
        .run_with_session(mailbox());

    assert_eq!(seen.into_inner(), vec![(1, 4), (2, 4), (3, 4), (4, 4)]);
}

#[test]
fn test_unreachable_server_aborts() {
    let store = EmailStore::open_in_memory().unwrap();
    let creds = MailboxCredentials::new("127.0.0.1", 1, "user@example.com", "secret");

    let report = Ingestor::new(&store).run(&creds);
    assert!(matches!(report.status, RunStatus::Aborted { .. }));
    assert_eq!(report.attempted, 0);
}

#[test]
fn test_report_json_shape() {
    let store = EmailStore::open_in_memory().unwrap();
    let report = Ingestor::new(&store).run_with_session(mailbox());
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["status"], "completed");
    assert_eq!(json["ingested"], 4);
}
