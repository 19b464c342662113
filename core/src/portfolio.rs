//! Portfolio aggregator: per-tenant statistics, exact or cached.
//!
//! Two interchangeable strategies produce the same figures for the same rows:
//!
//!   direct  scan every row in scope and aggregate in process
//!   cached  read the tenant's cache row; on a miss aggregate directly and
//!           ask the store to refresh the cache (best effort)
//!
//! The cached strategy needs a tenant key. Anonymous scopes always aggregate
//! directly, so no cache row is ever shared across tenants or keyed by nothing.
//! Rates are rounded to four places only when a report is built.

use crate::{
    application::{RecentApplication, ScoredRow},
    error::{ServiceResult, StoreResult},
    grading::{Decision, RiskGrade},
    tenant::ResolvedIdentity,
    types::{Scope, TenantId},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Round a rate for a response.
pub fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

/// Count per risk grade, always covering A through G.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "BTreeMap<String, u64>", try_from = "BTreeMap<String, u64>")]
pub struct GradeDistribution {
    counts: [u64; 7],
}

impl GradeDistribution {
    pub fn from_counts(counts: [u64; 7]) -> Self {
        Self { counts }
    }

    pub fn record(&mut self, grade: RiskGrade) {
        self.counts[grade.index()] += 1;
    }

    pub fn get(&self, grade: RiskGrade) -> u64 {
        self.counts[grade.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskGrade, u64)> + '_ {
        RiskGrade::ALL.iter().map(move |g| (*g, self.get(*g)))
    }
}

impl From<GradeDistribution> for BTreeMap<String, u64> {
    fn from(dist: GradeDistribution) -> Self {
        dist.iter().map(|(g, n)| (g.as_str().to_string(), n)).collect()
    }
}

impl TryFrom<BTreeMap<String, u64>> for GradeDistribution {
    type Error = String;

    fn try_from(map: BTreeMap<String, u64>) -> Result<Self, Self::Error> {
        let mut dist = GradeDistribution::default();
        for (key, count) in map {
            let grade: RiskGrade = key.parse()?;
            dist.counts[grade.index()] = count;
        }
        Ok(dist)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioStats {
    pub total_applications: u64,
    pub avg_pd: f64,
    pub approval_rate: f64,
    /// Expected default rate. Equal to `avg_pd` by policy; no realised
    /// default outcomes are tracked.
    pub default_rate: f64,
    pub grade_distribution: GradeDistribution,
}

impl PortfolioStats {
    pub fn empty() -> Self {
        Self {
            total_applications: 0,
            avg_pd: 0.0,
            approval_rate: 0.0,
            default_rate: 0.0,
            grade_distribution: GradeDistribution::default(),
        }
    }

    /// Aggregate a row set. PDs are summed in ascending order, so the result
    /// is identical for any ordering of the same rows.
    pub fn from_rows(rows: &[ScoredRow]) -> Self {
        if rows.is_empty() {
            return Self::empty();
        }

        let mut pds: Vec<f64> = rows.iter().map(|r| r.pd).collect();
        pds.sort_by(f64::total_cmp);
        let total = rows.len() as f64;
        let avg_pd = pds.iter().sum::<f64>() / total;

        let approved = rows.iter().filter(|r| r.decision == Decision::Approve).count();
        let mut grade_distribution = GradeDistribution::default();
        for row in rows {
            grade_distribution.record(row.risk_grade);
        }

        Self {
            total_applications: rows.len() as u64,
            avg_pd,
            approval_rate: approved as f64 / total,
            default_rate: avg_pd,
            grade_distribution,
        }
    }

    /// Copy with every rate rounded to four places.
    pub fn rounded(&self) -> Self {
        Self {
            total_applications: self.total_applications,
            avg_pd: round4(self.avg_pd),
            approval_rate: round4(self.approval_rate),
            default_rate: round4(self.default_rate),
            grade_distribution: self.grade_distribution,
        }
    }
}

/// A tenant's cache row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedPortfolioStats {
    pub tenant_id: TenantId,
    #[serde(flatten)]
    pub stats: PortfolioStats,
    /// Decision threshold in force when the row was computed.
    pub threshold: f64,
    pub computed_at: String,
}

/// The reads the aggregator and simulator need from the Data Store.
pub trait PortfolioSource {
    /// (pd, grade, decision) of every row visible in `scope`.
    fn scored_rows(&self, scope: Scope<'_>) -> StoreResult<Vec<ScoredRow>>;

    fn cached_portfolio_stats(&self, tenant: &TenantId)
        -> StoreResult<Option<CachedPortfolioStats>>;

    /// Recompute the tenant's aggregate in the store and write its cache row.
    fn upsert_portfolio_stats(&self, tenant: &TenantId) -> StoreResult<()>;

    /// Newest first, at most `limit` rows.
    fn recent_applications(&self, scope: Scope<'_>, limit: u32)
        -> StoreResult<Vec<RecentApplication>>;
}

pub trait AggregationStrategy {
    fn name(&self) -> &'static str;

    fn aggregate(&self, scope: Scope<'_>) -> StoreResult<PortfolioStats>;
}

pub struct DirectAggregation<'a, S: PortfolioSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PortfolioSource + ?Sized> DirectAggregation<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }
}

impl<S: PortfolioSource + ?Sized> AggregationStrategy for DirectAggregation<'_, S> {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn aggregate(&self, scope: Scope<'_>) -> StoreResult<PortfolioStats> {
        let rows = self.source.scored_rows(scope)?;
        Ok(PortfolioStats::from_rows(&rows))
    }
}

pub struct CachedAggregation<'a, S: PortfolioSource + ?Sized> {
    source: &'a S,
    direct: DirectAggregation<'a, S>,
}

impl<'a, S: PortfolioSource + ?Sized> CachedAggregation<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source, direct: DirectAggregation::new(source) }
    }
}

impl<S: PortfolioSource + ?Sized> AggregationStrategy for CachedAggregation<'_, S> {
    fn name(&self) -> &'static str {
        "cached"
    }

    fn aggregate(&self, scope: Scope<'_>) -> StoreResult<PortfolioStats> {
        let Some(tenant) = scope else {
            return self.direct.aggregate(None);
        };

        match self.source.cached_portfolio_stats(tenant) {
            Ok(Some(cached)) => return Ok(cached.stats),
            Ok(None) => log::debug!("No cached portfolio stats for {tenant}, computing directly"),
            Err(e) => log::warn!("Portfolio cache read failed for {tenant}, computing directly: {e}"),
        }

        let stats = self.direct.aggregate(scope)?;
        if let Err(e) = self.source.upsert_portfolio_stats(tenant) {
            log::warn!("Portfolio cache refresh failed for {tenant}: {e}");
        }
        Ok(stats)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioReport {
    #[serde(flatten)]
    pub stats: PortfolioStats,
    pub recent_applications: Vec<RecentApplication>,
}

pub struct PortfolioAggregator<'a, S: PortfolioSource + ?Sized> {
    source: &'a S,
    recent_limit: u32,
}

impl<'a, S: PortfolioSource + ?Sized> PortfolioAggregator<'a, S> {
    pub fn new(source: &'a S, recent_limit: u32) -> Self {
        Self { source, recent_limit }
    }

    /// Statistics plus the recent listing for the identity's scope.
    pub fn report(&self, identity: &ResolvedIdentity) -> ServiceResult<PortfolioReport> {
        let scope = identity.scope();
        let stats = if identity.is_valid() {
            self.aggregate_with(&CachedAggregation::new(self.source), scope)?
        } else {
            self.aggregate_with(&DirectAggregation::new(self.source), scope)?
        };

        // The listing never comes from the cache.
        let recent_applications = self.source.recent_applications(scope, self.recent_limit)?;

        Ok(PortfolioReport { stats: stats.rounded(), recent_applications })
    }

    fn aggregate_with(
        &self,
        strategy: &dyn AggregationStrategy,
        scope: Scope<'_>,
    ) -> StoreResult<PortfolioStats> {
        let stats = strategy.aggregate(scope)?;
        log::debug!(
            "Portfolio aggregated via {} strategy: {} applications",
            strategy.name(),
            stats.total_applications
        );
        Ok(stats)
    }
}
