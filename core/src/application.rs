//! Scored application records, as stored and as listed.

use crate::{
    clock::Clock,
    features::ScoreRequest,
    grading::{Decision, RiskGrade},
    types::{ApplicationId, TenantId},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One stored application. Append-only: built once, inserted once, never changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: ApplicationId,
    pub tenant_id: Option<TenantId>,
    #[serde(flatten)]
    pub features: ScoreRequest,
    pub pd: f64,
    pub risk_grade: RiskGrade,
    pub decision: Decision,
    pub created_at: String,
}

impl ApplicationRecord {
    /// Stamp a new record with a fresh id and the clock's current time.
    /// The id is fixed for the record's life, so retried inserts reuse it.
    pub fn new(
        tenant_id: Option<TenantId>,
        features: ScoreRequest,
        pd: f64,
        risk_grade: RiskGrade,
        decision: Decision,
        clock: &dyn Clock,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id,
            features,
            pd,
            risk_grade,
            decision,
            created_at: clock.timestamp(),
        }
    }
}

/// The columns aggregation reads.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoredRow {
    pub pd: f64,
    pub risk_grade: RiskGrade,
    pub decision: Decision,
}

/// An entry of the recent-applications listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecentApplication {
    pub id: ApplicationId,
    pub created_at: String,
    pub loan_amnt: i64,
    pub annual_inc: f64,
    pub pd: f64,
    pub risk_grade: RiskGrade,
    pub decision: Decision,
}
