//! Integration tests: retry classification of application inserts.

mod common;

use common::request;
use loan_desk_core::{
    application::ApplicationRecord,
    clock::SystemClock,
    error::{StoreError, StoreResult},
    grading::{Decision, RiskGrade},
    persistence::{ApplicationWriter, InsertReply, PersistenceCoordinator, RetryPolicy},
    store::LoanStore,
    types::{Scope, TenantId},
};
use serde_json::json;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

/// Writer that replays a script of replies, then echoes the row back.
struct ScriptedWriter {
    script: RefCell<VecDeque<StoreResult<InsertReply>>>,
    seen_ids: RefCell<Vec<String>>,
}

impl ScriptedWriter {
    fn new(script: Vec<StoreResult<InsertReply>>) -> Self {
        Self { script: RefCell::new(script.into()), seen_ids: RefCell::new(Vec::new()) }
    }

    fn calls(&self) -> usize {
        self.seen_ids.borrow().len()
    }
}

impl ApplicationWriter for ScriptedWriter {
    fn insert_application(
        &self,
        _scope: Scope<'_>,
        record: &ApplicationRecord,
    ) -> StoreResult<InsertReply> {
        self.seen_ids.borrow_mut().push(record.id.clone());
        self.script
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(InsertReply::rows(vec![json!({ "id": record.id })])))
    }
}

fn policy() -> RetryPolicy {
    RetryPolicy { max_retries: 2, backoff: Duration::ZERO, deadline: None }
}

fn record(tenant: Option<&TenantId>) -> ApplicationRecord {
    ApplicationRecord::new(
        tenant.cloned(),
        request(18_000),
        0.18,
        RiskGrade::C,
        Decision::Approve,
        &SystemClock,
    )
}

fn timeout() -> StoreResult<InsertReply> {
    Err(StoreError::Timeout(Duration::from_secs(5)))
}

/// A first-try success takes exactly one attempt.
#[test]
fn first_attempt_success() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![]);
    let rec = record(None);
    let receipt = PersistenceCoordinator::new(&writer, policy()).persist(None, &rec).unwrap();
    assert_eq!(receipt.attempts, 1);
    assert_eq!(receipt.application_id, rec.id);
}

/// Two transient failures then success: three attempts, one success.
#[test]
fn transient_failures_are_retried() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![
        timeout(),
        Err(StoreError::Status { status: 503, message: "Service Unavailable".into() }),
    ]);
    let rec = record(None);
    let receipt = PersistenceCoordinator::new(&writer, policy()).persist(None, &rec).unwrap();
    assert_eq!(receipt.attempts, 3);
    assert_eq!(writer.calls(), 3);
}

/// Every attempt carries the same application id.
#[test]
fn retries_reuse_the_application_id() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![timeout(), timeout()]);
    let rec = record(None);
    PersistenceCoordinator::new(&writer, policy()).persist(None, &rec).unwrap();
    assert!(writer.seen_ids.borrow().iter().all(|id| *id == rec.id));
}

/// A permanent error stops after one attempt.
#[test]
fn permanent_error_is_not_retried() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![Err(StoreError::Status {
        status: 400,
        message: "invalid input syntax".into(),
    })]);
    let failure =
        PersistenceCoordinator::new(&writer, policy()).persist(None, &record(None)).unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert!(failure.permanent);
    assert_eq!(writer.calls(), 1);
}

/// An empty row list and a reply without rows both count as retryable.
#[test]
fn empty_and_malformed_replies_are_retried() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![
        Ok(InsertReply::rows(vec![])),
        Ok(InsertReply::missing()),
    ]);
    let receipt =
        PersistenceCoordinator::new(&writer, policy()).persist(None, &record(None)).unwrap();
    assert_eq!(receipt.attempts, 3);
}

/// The budget is max_retries + 1 attempts, never more.
#[test]
fn exhausted_budget_reports_the_last_reason() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![
        timeout(),
        timeout(),
        Err(StoreError::Connection("connection reset by peer".into())),
        Ok(InsertReply::rows(vec![json!({ "id": "too-late" })])),
    ]);
    let failure =
        PersistenceCoordinator::new(&writer, policy()).persist(None, &record(None)).unwrap_err();
    assert_eq!(failure.attempts, 3);
    assert!(!failure.permanent);
    assert!(failure.reason.contains("connection reset"), "{}", failure.reason);
    assert_eq!(writer.calls(), 3);
}

/// Zero retries means a single attempt.
#[test]
fn zero_retries_means_one_attempt() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![timeout()]);
    let policy = RetryPolicy { max_retries: 0, ..policy() };
    let failure =
        PersistenceCoordinator::new(&writer, policy).persist(None, &record(None)).unwrap_err();
    assert_eq!(failure.attempts, 1);
}

/// A passed deadline ends retrying even with budget left.
#[test]
fn deadline_stops_retrying() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![timeout(), timeout()]);
    let policy = RetryPolicy { deadline: Some(Duration::ZERO), ..policy() };
    let failure =
        PersistenceCoordinator::new(&writer, policy).persist(None, &record(None)).unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert!(!failure.permanent);
}

/// A deadline that runs out during the backoff sleep stops the next attempt.
#[test]
fn deadline_is_rechecked_after_backoff() {
    common::init_logging();
    let writer = ScriptedWriter::new(vec![timeout(), timeout()]);
    let policy = RetryPolicy {
        backoff: Duration::from_millis(30),
        deadline: Some(Duration::from_millis(20)),
        ..policy()
    };
    let failure =
        PersistenceCoordinator::new(&writer, policy).persist(None, &record(None)).unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert_eq!(writer.calls(), 1);
    assert!(!failure.permanent);
}

/// The SQLite store echoes the inserted row with its id.
#[test]
fn store_insert_echoes_the_row() {
    common::init_logging();
    let store = LoanStore::in_memory().unwrap();
    store.migrate().unwrap();
    let tenant = TenantId::new("tenant-a");
    let rec = record(Some(&tenant));

    let receipt =
        PersistenceCoordinator::new(&store, policy()).persist(Some(&tenant), &rec).unwrap();
    assert_eq!(receipt.attempts, 1);
    assert_eq!(store.application_by_id(&tenant, &rec.id).unwrap(), Some(rec));
}

/// A row for another tenant is refused by the store's row policy, once.
#[test]
fn store_refuses_rows_outside_the_scope() {
    common::init_logging();
    let store = LoanStore::in_memory().unwrap();
    store.migrate().unwrap();
    let a = TenantId::new("tenant-a");
    let b = TenantId::new("tenant-b");

    let failure =
        PersistenceCoordinator::new(&store, policy()).persist(Some(&b), &record(Some(&a))).unwrap_err();
    assert_eq!(failure.attempts, 1);
    assert!(failure.permanent);
    assert_eq!(store.total_application_count().unwrap(), 0);
}

/// Re-inserting an id that already exists is permanent and leaves one row.
#[test]
fn duplicate_id_is_a_permanent_error() {
    common::init_logging();
    let store = LoanStore::in_memory().unwrap();
    store.migrate().unwrap();
    let rec = record(None);
    let coordinator = PersistenceCoordinator::new(&store, policy());

    coordinator.persist(None, &rec).unwrap();
    let failure = coordinator.persist(None, &rec).unwrap_err();
    assert!(failure.permanent);
    assert_eq!(failure.attempts, 1);
    assert_eq!(store.total_application_count().unwrap(), 1);
}

/// A reopened shared-memory store sees the same rows; a private in-memory
/// store reopens empty.
#[test]
fn reopen_follows_the_database_kind() {
    common::init_logging();
    let tenant = TenantId::new("tenant-a");
    let uri = format!("file:reopen_{}?mode=memory&cache=shared", uuid::Uuid::new_v4().simple());
    let shared = LoanStore::open(&uri).unwrap();
    shared.migrate().unwrap();
    let rec = record(Some(&tenant));
    PersistenceCoordinator::new(&shared, policy()).persist(Some(&tenant), &rec).unwrap();

    let second = shared.reopen().unwrap();
    assert_eq!(second.application_by_id(&tenant, &rec.id).unwrap(), Some(rec));

    let private = LoanStore::in_memory().unwrap();
    private.migrate().unwrap();
    PersistenceCoordinator::new(&private, policy())
        .persist(Some(&tenant), &record(Some(&tenant)))
        .unwrap();
    let isolated = private.reopen().unwrap();
    assert!(isolated.migrate().is_ok());
    assert_eq!(isolated.total_application_count().unwrap(), 0);
}
