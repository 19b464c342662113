//! Integration tests: scoring flow, grading, persistence side effects, health.

mod common;

use common::{desk, request, TENANT_A};
use loan_desk_core::{
    clock::SystemClock,
    config::ServiceConfig,
    grading::{Decision, RiskGrade},
    service::LoanDesk,
    store::LoanStore,
    types::TenantId,
};
use std::sync::Arc;

/// A PD of 0.18 is grade C and approved, and the row is stored for the tenant.
#[test]
fn score_grades_decides_and_persists() {
    let desk = desk();
    let response = desk.score(&request(18_000), Some(TENANT_A)).unwrap();

    assert_eq!(response.pd, 0.18);
    assert_eq!(response.risk_grade, RiskGrade::C);
    assert_eq!(response.decision, Decision::Approve);
    assert!(response.top_features.is_none());

    let tenant = TenantId::new("tenant-a");
    let rows = desk.store().applications_in_scope(Some(&tenant)).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].pd, 0.18);
    assert_eq!(rows[0].risk_grade, RiskGrade::C);
    assert_eq!(rows[0].decision, Decision::Approve);
    assert_eq!(rows[0].features, request(18_000));
    assert_eq!(rows[0].created_at, "2026-01-01T00:00:00.000Z");
}

/// The decision threshold is exclusive: a PD of exactly 0.25 goes to review.
#[test]
fn threshold_pd_goes_to_review() {
    let desk = desk();
    let response = desk.score(&request(25_000), Some(TENANT_A)).unwrap();
    assert_eq!(response.decision, Decision::Review);
    assert_eq!(response.risk_grade, RiskGrade::D);

    let response = desk.score(&request(24_999), Some(TENANT_A)).unwrap();
    assert_eq!(response.decision, Decision::Approve);
}

/// Without a loaded model scoring fails fast with 503 and writes nothing.
#[test]
fn no_model_means_service_unavailable() {
    common::init_logging();
    let desk = LoanDesk::build_test(None).unwrap();
    let err = desk.score(&request(18_000), Some(TENANT_A)).unwrap_err();
    assert_eq!(err.status_code(), 503);
    assert_eq!(desk.store().total_application_count().unwrap(), 0);
    assert!(!desk.health().model_loaded);
}

/// Out-of-range fields are a 400 and nothing is stored.
#[test]
fn invalid_request_is_rejected_before_inference() {
    let desk = desk();
    let mut req = request(18_000);
    req.loan_amnt = 0;
    req.state = "California".into();

    let err = desk.score(&req, Some(TENANT_A)).unwrap_err();
    assert_eq!(err.status_code(), 400);
    assert!(err.public_message().contains("loan_amnt"));
    assert_eq!(desk.store().total_application_count().unwrap(), 0);
}

/// Anonymous scoring stores an unscoped row and never creates a cache row.
#[test]
fn anonymous_score_is_stored_unscoped() {
    let desk = desk();
    desk.score(&request(12_000), None).unwrap();

    assert_eq!(desk.store().application_count(None).unwrap(), 1);
    assert_eq!(desk.store().portfolio_stats_row_count().unwrap(), 0);
}

/// A credential that does not verify degrades to the anonymous scope.
#[test]
fn unverifiable_credential_scores_anonymously() {
    let desk = desk();
    let response = desk.score(&request(12_000), Some("Bearer forged-token")).unwrap();
    assert_eq!(response.risk_grade, RiskGrade::C);

    assert_eq!(desk.store().application_count(None).unwrap(), 1);
    let tenant = TenantId::new("tenant-a");
    assert_eq!(desk.store().application_count(Some(&tenant)).unwrap(), 0);
}

/// A store that cannot take the write does not change the scoring response.
#[test]
fn persistence_failure_does_not_fail_scoring() {
    common::init_logging();
    // No migrations: every insert fails.
    let store = LoanStore::in_memory().unwrap();
    let desk = LoanDesk::build_with(
        ServiceConfig::default_test(),
        store,
        common::artifacts(),
        None,
        Arc::new(SystemClock),
    );

    let response = desk.score(&request(40_000), None).unwrap();
    assert_eq!(response.pd, 0.4);
    assert_eq!(response.risk_grade, RiskGrade::F);
    assert_eq!(response.decision, Decision::Review);
}

/// Each scoring call writes its own row.
#[test]
fn every_score_is_a_new_row() {
    let desk = desk();
    for _ in 0..3 {
        desk.score(&request(18_000), Some(TENANT_A)).unwrap();
    }
    let tenant = TenantId::new("tenant-a");
    let rows = desk.store().applications_in_scope(Some(&tenant)).unwrap();
    assert_eq!(rows.len(), 3);
    assert_ne!(rows[0].id, rows[1].id);
    assert_ne!(rows[1].id, rows[2].id);
}

/// The shipped data directory starts a fully working desk.
#[test]
fn shipped_artifacts_load_and_score() {
    common::init_logging();
    let config = ServiceConfig::load(&common::data_dir()).unwrap();
    let store = LoanStore::in_memory().unwrap();
    store.migrate().unwrap();
    let desk = LoanDesk::build(config, store);

    let health = desk.health();
    assert!(health.model_loaded);
    assert!(health.verifier_configured);
    assert!(health.store_connected);
    assert_eq!(health.model_version.as_deref(), Some("logit-2026.03"));

    let response = desk.score(&request(18_000), Some("Bearer dev-officer-token")).unwrap();
    assert!((0.0..=1.0).contains(&response.pd));
    assert_eq!(response.risk_grade, RiskGrade::for_pd(response.pd));
    assert_eq!(response.decision, Decision::for_pd(response.pd));
}

/// Better credit profiles score lower under the shipped model.
#[test]
fn shipped_model_rewards_better_profiles() {
    common::init_logging();
    let config = ServiceConfig::load(&common::data_dir()).unwrap();
    let store = LoanStore::in_memory().unwrap();
    store.migrate().unwrap();
    let desk = LoanDesk::build(config, store);

    let mut strong = request(10_000);
    strong.fico = 800;
    strong.grade = "A".into();
    strong.dti = 5.0;
    let mut weak = request(10_000);
    weak.fico = 640;
    weak.grade = "F".into();
    weak.dti = 35.0;

    let strong_pd = desk.score(&strong, None).unwrap().pd;
    let weak_pd = desk.score(&weak, None).unwrap().pd;
    assert!(strong_pd < weak_pd, "strong {strong_pd} should be below weak {weak_pd}");
}
