//! Risk grading and the persisted decision policy.
//!
//! Both are pure functions of PD. The decision threshold here is the one
//! written to every stored row; simulated thresholds never reach it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Persisted-decision cutoff: approve iff PD is strictly below it.
pub const DECISION_THRESHOLD: f64 = 0.25;

/// Upper bounds (exclusive) of grades A through F. Everything else is G.
const GRADE_BOUNDS: [(f64, RiskGrade); 6] = [
    (0.05, RiskGrade::A),
    (0.10, RiskGrade::B),
    (0.20, RiskGrade::C),
    (0.30, RiskGrade::D),
    (0.40, RiskGrade::E),
    (0.60, RiskGrade::F),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RiskGrade {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl RiskGrade {
    pub const ALL: [RiskGrade; 7] = [
        RiskGrade::A,
        RiskGrade::B,
        RiskGrade::C,
        RiskGrade::D,
        RiskGrade::E,
        RiskGrade::F,
        RiskGrade::G,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RiskGrade::A => "A",
            RiskGrade::B => "B",
            RiskGrade::C => "C",
            RiskGrade::D => "D",
            RiskGrade::E => "E",
            RiskGrade::F => "F",
            RiskGrade::G => "G",
        }
    }

    /// Position in `ALL`.
    pub fn index(self) -> usize {
        self as usize
    }

    /// Grade for a probability of default. Lower bounds are inclusive,
    /// so exactly 0.05 is a B. NaN falls through to G.
    pub fn for_pd(pd: f64) -> Self {
        GRADE_BOUNDS
            .iter()
            .find(|(upper, _)| pd < *upper)
            .map(|(_, grade)| *grade)
            .unwrap_or(RiskGrade::G)
    }
}

impl fmt::Display for RiskGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskGrade {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RiskGrade::ALL
            .iter()
            .copied()
            .find(|g| g.as_str() == s)
            .ok_or_else(|| format!("unknown risk grade '{s}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Review,
}

impl Decision {
    pub fn for_pd(pd: f64) -> Self {
        if pd < DECISION_THRESHOLD {
            Decision::Approve
        } else {
            Decision::Review
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Review => "review",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Decision::Approve),
            "review" => Ok(Decision::Review),
            other => Err(format!("unknown decision '{other}'")),
        }
    }
}
