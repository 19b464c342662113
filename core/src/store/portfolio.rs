//! Store methods for the portfolio aggregate cache.
//!
//! `compute_portfolio_stats` and `upsert_portfolio_stats` are the store-side
//! aggregate RPCs. The insert trigger in 002_portfolio_stats.sql runs the
//! same aggregate after every scoped insert.

use super::LoanStore;
use crate::{
    application::{RecentApplication, ScoredRow},
    error::StoreResult,
    grading::DECISION_THRESHOLD,
    portfolio::{CachedPortfolioStats, GradeDistribution, PortfolioSource, PortfolioStats},
    types::{Scope, TenantId},
};
use rusqlite::{params, OptionalExtension, Row};

const AGGREGATE_SELECT: &str = "SELECT
        COUNT(*),
        COALESCE(AVG(pd), 0.0),
        COALESCE(AVG(CASE WHEN decision = 'approve' THEN 1.0 ELSE 0.0 END), 0.0),
        COALESCE(AVG(pd), 0.0),
        COALESCE(SUM(risk_grade = 'A'), 0),
        COALESCE(SUM(risk_grade = 'B'), 0),
        COALESCE(SUM(risk_grade = 'C'), 0),
        COALESCE(SUM(risk_grade = 'D'), 0),
        COALESCE(SUM(risk_grade = 'E'), 0),
        COALESCE(SUM(risk_grade = 'F'), 0),
        COALESCE(SUM(risk_grade = 'G'), 0)";

/// Read the 11 aggregate columns starting at `offset`.
fn stats_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<PortfolioStats> {
    let mut counts = [0u64; 7];
    for (i, slot) in counts.iter_mut().enumerate() {
        *slot = row.get::<_, i64>(offset + 4 + i)? as u64;
    }
    Ok(PortfolioStats {
        total_applications: row.get::<_, i64>(offset)? as u64,
        avg_pd: row.get(offset + 1)?,
        approval_rate: row.get(offset + 2)?,
        default_rate: row.get(offset + 3)?,
        grade_distribution: GradeDistribution::from_counts(counts),
    })
}

impl LoanStore {
    /// Store-side aggregate for a tenant. Read-only.
    pub fn compute_portfolio_stats(&self, tenant: &TenantId) -> StoreResult<PortfolioStats> {
        let sql = format!("{AGGREGATE_SELECT} FROM applications WHERE tenant_id = ?1");
        let stats = self
            .conn
            .query_row(&sql, params![tenant.as_str()], |row| stats_from_row(row, 0))?;
        Ok(stats)
    }

    /// Recompute the tenant's aggregate and replace its cache row, in one statement.
    pub fn refresh_portfolio_stats(&self, tenant: &TenantId) -> StoreResult<()> {
        let sql = format!(
            "INSERT OR REPLACE INTO portfolio_stats (
                total_applications, avg_pd, approval_rate, default_rate,
                grade_a, grade_b, grade_c, grade_d, grade_e, grade_f, grade_g,
                tenant_id, threshold, computed_at
            )
            {AGGREGATE_SELECT}, ?1, ?2, strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
            FROM applications WHERE tenant_id = ?1"
        );
        self.conn
            .execute(&sql, params![tenant.as_str(), DECISION_THRESHOLD])?;
        Ok(())
    }

    pub fn latest_portfolio_stats(
        &self,
        tenant: &TenantId,
    ) -> StoreResult<Option<CachedPortfolioStats>> {
        let cached = self
            .conn
            .query_row(
                "SELECT total_applications, avg_pd, approval_rate, default_rate,
                        grade_a, grade_b, grade_c, grade_d, grade_e, grade_f, grade_g,
                        tenant_id, threshold, computed_at
                 FROM portfolio_stats WHERE tenant_id = ?1",
                params![tenant.as_str()],
                |row| {
                    Ok(CachedPortfolioStats {
                        stats: stats_from_row(row, 0)?,
                        tenant_id: TenantId::new(row.get::<_, String>(11)?),
                        threshold: row.get(12)?,
                        computed_at: row.get(13)?,
                    })
                },
            )
            .optional()?;
        Ok(cached)
    }

    /// Number of cache rows (for tests).
    pub fn portfolio_stats_row_count(&self) -> StoreResult<u64> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM portfolio_stats", [], |row| row.get(0))?;
        Ok(count as u64)
    }
}

impl PortfolioSource for LoanStore {
    fn scored_rows(&self, scope: Scope<'_>) -> StoreResult<Vec<ScoredRow>> {
        self.select_scored_rows(scope)
    }

    fn cached_portfolio_stats(
        &self,
        tenant: &TenantId,
    ) -> StoreResult<Option<CachedPortfolioStats>> {
        self.latest_portfolio_stats(tenant)
    }

    fn upsert_portfolio_stats(&self, tenant: &TenantId) -> StoreResult<()> {
        self.refresh_portfolio_stats(tenant)
    }

    fn recent_applications(
        &self,
        scope: Scope<'_>,
        limit: u32,
    ) -> StoreResult<Vec<RecentApplication>> {
        self.select_recent_applications(scope, limit)
    }
}
