//! Simulation engine: what-if threshold sweep over stored PDs.
//!
//! Always a direct scan: an arbitrary threshold cannot be precomputed, so
//! the cache is never consulted. Simulated thresholds never touch the
//! persisted decisions.

use crate::{
    error::{ServiceError, ServiceResult},
    portfolio::{round4, PortfolioSource},
    types::Scope,
};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

pub const SIMULATION_THRESHOLD_RANGE: RangeInclusive<f64> = 0.05..=0.50;
pub const DEFAULT_SIMULATION_THRESHOLD: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub threshold: f64,
    pub approval_rate: f64,
    pub expected_default_rate: f64,
    pub applications_approved: u64,
    pub applications_rejected: u64,
}

impl SimulationReport {
    fn empty(threshold: f64) -> Self {
        Self {
            threshold,
            approval_rate: 0.0,
            expected_default_rate: 0.0,
            applications_approved: 0,
            applications_rejected: 0,
        }
    }
}

/// Reject thresholds outside [0.05, 0.50], NaN included.
pub fn validate_threshold(threshold: f64) -> ServiceResult<f64> {
    if SIMULATION_THRESHOLD_RANGE.contains(&threshold) {
        Ok(threshold)
    } else {
        Err(ServiceError::Validation(format!(
            "threshold must be between {} and {}",
            SIMULATION_THRESHOLD_RANGE.start(),
            SIMULATION_THRESHOLD_RANGE.end()
        )))
    }
}

/// Partition PDs at `threshold` and summarise. Approved means pd < threshold.
pub fn simulate_pds(pds: &[f64], threshold: f64) -> SimulationReport {
    if pds.is_empty() {
        return SimulationReport::empty(threshold);
    }

    let mut approved: Vec<f64> = pds.iter().copied().filter(|pd| *pd < threshold).collect();
    approved.sort_by(f64::total_cmp);
    let rejected = pds.len() - approved.len();

    let expected_default_rate = if approved.is_empty() {
        0.0
    } else {
        approved.iter().sum::<f64>() / approved.len() as f64
    };

    SimulationReport {
        threshold,
        approval_rate: round4(approved.len() as f64 / pds.len() as f64),
        expected_default_rate: round4(expected_default_rate),
        applications_approved: approved.len() as u64,
        applications_rejected: rejected as u64,
    }
}

pub struct SimulationEngine<'a, S: PortfolioSource + ?Sized> {
    source: &'a S,
}

impl<'a, S: PortfolioSource + ?Sized> SimulationEngine<'a, S> {
    pub fn new(source: &'a S) -> Self {
        Self { source }
    }

    pub fn simulate(&self, scope: Scope<'_>, threshold: f64) -> ServiceResult<SimulationReport> {
        let threshold = validate_threshold(threshold)?;
        let pds: Vec<f64> = self.source.scored_rows(scope)?.iter().map(|r| r.pd).collect();
        log::debug!("Simulating threshold {threshold} over {} applications", pds.len());
        Ok(simulate_pds(&pds, threshold))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partitions_at_threshold() {
        let report = simulate_pds(&[0.1, 0.2, 0.35], 0.30);
        assert_eq!(report.approval_rate, 0.6667);
        assert_eq!(report.expected_default_rate, 0.15);
        assert_eq!(report.applications_approved, 2);
        assert_eq!(report.applications_rejected, 1);
    }

    #[test]
    fn pd_equal_to_threshold_is_rejected() {
        let report = simulate_pds(&[0.3, 0.3], 0.30);
        assert_eq!(report.applications_approved, 0);
        assert_eq!(report.applications_rejected, 2);
        assert_eq!(report.expected_default_rate, 0.0);
        assert_eq!(report.approval_rate, 0.0);
    }

    #[test]
    fn empty_scope_is_all_zero() {
        assert_eq!(simulate_pds(&[], 0.2), SimulationReport::empty(0.2));
    }

    #[test]
    fn threshold_bounds_are_inclusive() {
        assert!(validate_threshold(0.05).is_ok());
        assert!(validate_threshold(0.50).is_ok());
        assert!(validate_threshold(0.0499).is_err());
        assert!(validate_threshold(0.51).is_err());
        assert!(validate_threshold(f64::NAN).is_err());
    }
}
