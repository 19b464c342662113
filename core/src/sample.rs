//! Synthetic loan applications with LendingClub-like marginals.
//!
//! Used to seed a local store and to drive tests over realistic volumes.
//! Every draw comes from a seeded `SampleRng`, so a seed names a stream.

use crate::{features::ScoreRequest, rng::SampleRng};

const GRADES: &[(&str, f64)] = &[
    ("A", 0.17),
    ("B", 0.29),
    ("C", 0.28),
    ("D", 0.15),
    ("E", 0.07),
    ("F", 0.03),
    ("G", 0.01),
];

const TERMS: &[(&str, f64)] = &[("36 months", 0.72), ("60 months", 0.28)];

const PURPOSES: &[(&str, f64)] = &[
    ("debt_consolidation", 0.57),
    ("credit_card", 0.22),
    ("home_improvement", 0.07),
    ("other", 0.06),
    ("major_purchase", 0.03),
    ("small_business", 0.02),
    ("car", 0.02),
    ("medical", 0.01),
];

const HOME_OWNERSHIP: &[(&str, f64)] = &[("MORTGAGE", 0.49), ("RENT", 0.40), ("OWN", 0.11)];

const STATES: &[&str] = &[
    "CA", "NY", "TX", "FL", "IL", "NJ", "PA", "OH", "GA", "VA", "NC", "MI", "MA", "MD", "AZ",
    "WA", "CO", "MN", "MO", "CT",
];

pub struct SampleGenerator {
    rng: SampleRng,
}

impl SampleGenerator {
    pub fn new(seed: u64) -> Self {
        Self { rng: SampleRng::new(seed, 0) }
    }

    pub fn next_request(&mut self) -> ScoreRequest {
        let rng = &mut self.rng;

        let grade = *rng.weighted(GRADES);
        // Worse grades skew towards lower FICO.
        let grade_rank = GRADES.iter().position(|(g, _)| *g == grade).unwrap_or(0) as f64;
        let fico = rng.normal(735.0 - 18.0 * grade_rank, 25.0).clamp(620.0, 850.0).round() as i64;

        let annual_inc = rng.normal(11.0, 0.55).exp().clamp(12_000.0, 500_000.0).round();
        let loan_amnt = (rng.uniform(1_000.0, 40_000.0) / 25.0).round() as i64 * 25;
        let dti = (rng.normal(18.0, 8.0).clamp(0.0, 45.0) * 100.0).round() / 100.0;
        let revol_util = (rng.normal(50.0, 24.0).clamp(0.0, 130.0) * 10.0).round() / 10.0;
        let emp_length = rng.below(11) as i64;

        ScoreRequest {
            loan_amnt: loan_amnt.max(1_000),
            annual_inc,
            dti,
            emp_length,
            grade: grade.to_string(),
            term: rng.weighted(TERMS).to_string(),
            purpose: rng.weighted(PURPOSES).to_string(),
            home_ownership: rng.weighted(HOME_OWNERSHIP).to_string(),
            state: rng.pick(STATES).to_string(),
            revol_util,
            fico,
        }
    }

    pub fn take(&mut self, n: usize) -> Vec<ScoreRequest> {
        (0..n).map(|_| self.next_request()).collect()
    }
}
