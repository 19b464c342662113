//! Store methods for scored applications.

use super::LoanStore;
use crate::{
    application::{ApplicationRecord, RecentApplication, ScoredRow},
    error::{StoreError, StoreResult},
    features::ScoreRequest,
    persistence::{ApplicationWriter, InsertReply},
    types::{Scope, TenantId},
};
use rusqlite::{params, OptionalExtension, Row};

const RECORD_COLUMNS: &str = "id, tenant_id, loan_amnt, annual_inc, dti, emp_length, grade, term,
     purpose, home_ownership, state, revol_util, fico, pd, risk_grade, decision, created_at";

fn scope_param(scope: Scope<'_>) -> Option<&str> {
    scope.map(TenantId::as_str)
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<ApplicationRecord> {
    Ok(ApplicationRecord {
        id: row.get(0)?,
        tenant_id: row.get::<_, Option<String>>(1)?.map(TenantId::new),
        features: ScoreRequest {
            loan_amnt: row.get(2)?,
            annual_inc: row.get(3)?,
            dti: row.get(4)?,
            emp_length: row.get(5)?,
            grade: row.get(6)?,
            term: row.get(7)?,
            purpose: row.get(8)?,
            home_ownership: row.get(9)?,
            state: row.get(10)?,
            revol_util: row.get(11)?,
            fico: row.get(12)?,
        },
        pd: row.get(13)?,
        risk_grade: row.get(14)?,
        decision: row.get(15)?,
        created_at: row.get(16)?,
    })
}

impl ApplicationWriter for LoanStore {
    /// Single-row insert. The row must belong to the writing scope, the way a
    /// row-level security policy would demand; otherwise nothing is written.
    fn insert_application(
        &self,
        scope: Scope<'_>,
        record: &ApplicationRecord,
    ) -> StoreResult<InsertReply> {
        if record.tenant_id.as_ref() != scope {
            return Err(StoreError::PolicyViolation(
                "new row violates row-level policy for this scope".into(),
            ));
        }

        let f = &record.features;
        let mut stmt = self.conn.prepare_cached(
            "INSERT INTO applications (
                id, tenant_id, loan_amnt, annual_inc, dti, emp_length, grade, term,
                purpose, home_ownership, state, revol_util, fico, pd, risk_grade,
                decision, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            RETURNING id, tenant_id, created_at",
        )?;
        let rows = stmt
            .query_map(
                params![
                    &record.id,
                    scope_param(record.tenant_id.as_ref()),
                    f.loan_amnt,
                    f.annual_inc,
                    f.dti,
                    f.emp_length,
                    &f.grade,
                    &f.term,
                    &f.purpose,
                    &f.home_ownership,
                    &f.state,
                    f.revol_util,
                    f.fico,
                    record.pd,
                    record.risk_grade,
                    record.decision,
                    &record.created_at,
                ],
                |row| {
                    Ok(serde_json::json!({
                        "id": row.get::<_, String>(0)?,
                        "tenant_id": row.get::<_, Option<String>>(1)?,
                        "created_at": row.get::<_, String>(2)?,
                    }))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(InsertReply::rows(rows))
    }
}

impl LoanStore {
    pub fn application_count(&self, scope: Scope<'_>) -> StoreResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM applications WHERE tenant_id IS ?1",
            params![scope_param(scope)],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    /// Every row regardless of tenant (for tests and tooling).
    pub fn total_application_count(&self) -> StoreResult<u64> {
        let count: i64 =
            self.conn.query_row("SELECT COUNT(*) FROM applications", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// The application `id` if it belongs to `tenant`.
    pub fn application_by_id(
        &self,
        tenant: &TenantId,
        id: &str,
    ) -> StoreResult<Option<ApplicationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM applications WHERE id = ?1 AND tenant_id = ?2"
        );
        let record = self
            .conn
            .query_row(&sql, params![id, tenant.as_str()], record_from_row)
            .optional()?;
        Ok(record)
    }

    pub fn applications_in_scope(&self, scope: Scope<'_>) -> StoreResult<Vec<ApplicationRecord>> {
        let sql = format!(
            "SELECT {RECORD_COLUMNS} FROM applications WHERE tenant_id IS ?1 ORDER BY seq ASC"
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![scope_param(scope)], record_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub(super) fn select_scored_rows(&self, scope: Scope<'_>) -> StoreResult<Vec<ScoredRow>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT pd, risk_grade, decision FROM applications WHERE tenant_id IS ?1",
        )?;
        let rows = stmt.query_map(params![scope_param(scope)], |row| {
            Ok(ScoredRow {
                pd: row.get(0)?,
                risk_grade: row.get(1)?,
                decision: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }

    pub(super) fn select_recent_applications(
        &self,
        scope: Scope<'_>,
        limit: u32,
    ) -> StoreResult<Vec<RecentApplication>> {
        let mut stmt = self.conn.prepare_cached(
            "SELECT id, created_at, loan_amnt, annual_inc, pd, risk_grade, decision
             FROM applications WHERE tenant_id IS ?1
             ORDER BY created_at DESC, seq DESC
             LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![scope_param(scope), limit as i64], |row| {
            Ok(RecentApplication {
                id: row.get(0)?,
                created_at: row.get(1)?,
                loan_amnt: row.get(2)?,
                annual_inc: row.get(3)?,
                pd: row.get(4)?,
                risk_grade: row.get(5)?,
                decision: row.get(6)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}
