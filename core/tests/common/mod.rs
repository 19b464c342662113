//! Shared fixtures for the integration tests.
#![allow(dead_code)]

use loan_desk_core::{
    features::{FeatureSchema, FeatureValue, FeatureVector, ScoreRequest},
    model::{ModelArtifacts, ModelError, PdModel},
    service::LoanDesk,
};
use std::sync::Arc;

pub const TENANT_A: &str = "Bearer tenant-a-token";
pub const TENANT_B: &str = "Bearer tenant-b-token";

/// PD = loan_amnt / 100_000, so a test picks its PD through the loan amount.
pub struct LoanAmountModel;

impl PdModel for LoanAmountModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        match features.get("loan_amnt") {
            Some(FeatureValue::Number(amount)) => Ok(amount / 100_000.0),
            Some(_) => Err(ModelError::WrongKind { name: "loan_amnt".into(), expected: "number" }),
            None => Err(ModelError::MissingFeature("loan_amnt".into())),
        }
    }

    fn version(&self) -> &str {
        "loan-amount-test"
    }
}

pub fn schema() -> FeatureSchema {
    FeatureSchema {
        feature_order: [
            "loan_amnt",
            "annual_inc",
            "dti",
            "emp_length",
            "grade",
            "term",
            "purpose",
            "home_ownership",
            "state",
            "revol_util",
            "fico",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect(),
    }
}

pub fn artifacts() -> Option<Arc<ModelArtifacts>> {
    Some(Arc::new(ModelArtifacts::new(schema(), Box::new(LoanAmountModel))))
}

pub fn desk() -> LoanDesk {
    init_logging();
    LoanDesk::build_test(artifacts()).unwrap()
}

pub fn request(loan_amnt: i64) -> ScoreRequest {
    ScoreRequest {
        loan_amnt,
        annual_inc: 85_000.0,
        dti: 14.2,
        emp_length: 6,
        grade: "B".into(),
        term: "36 months".into(),
        purpose: "debt_consolidation".into(),
        home_ownership: "MORTGAGE".into(),
        state: "CA".into(),
        revol_util: 41.5,
        fico: 712,
    }
}

/// Loan amount that yields `pd` under `LoanAmountModel`.
pub fn amount_for(pd: f64) -> i64 {
    (pd * 100_000.0).round() as i64
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn data_dir() -> String {
    format!("{}/../data", env!("CARGO_MANIFEST_DIR"))
}
