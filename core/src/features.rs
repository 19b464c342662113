//! Raw application input, its validation, and the canonical feature vector.
//!
//! The feature order is declared by the model's metadata document and loaded
//! once at startup. The normalizer never reorders or invents features: every
//! declared name must be one of the fields an application carries.

use crate::error::{ServiceError, ServiceResult};
use serde::{Deserialize, Serialize};

/// The loan application fields a caller submits for scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub loan_amnt: i64,
    pub annual_inc: f64,
    pub dti: f64,
    pub emp_length: i64,
    pub grade: String,
    pub term: String,
    pub purpose: String,
    pub home_ownership: String,
    pub state: String,
    pub revol_util: f64,
    pub fico: i64,
}

impl ScoreRequest {
    /// Field-level range checks. Runs before normalization.
    pub fn validate(&self) -> ServiceResult<()> {
        let mut problems = Vec::new();

        if self.loan_amnt <= 0 {
            problems.push("loan_amnt must be greater than 0".to_string());
        }
        if !(self.annual_inc.is_finite() && self.annual_inc > 0.0) {
            problems.push("annual_inc must be greater than 0".to_string());
        }
        if !(self.dti.is_finite() && self.dti >= 0.0) {
            problems.push("dti must be at least 0".to_string());
        }
        if !(0..=40).contains(&self.emp_length) {
            problems.push("emp_length must be between 0 and 40".to_string());
        }
        if !matches!(self.grade.as_str(), "A" | "B" | "C" | "D" | "E" | "F" | "G") {
            problems.push("grade must be one of A-G".to_string());
        }
        for (name, value) in [
            ("term", &self.term),
            ("purpose", &self.purpose),
            ("home_ownership", &self.home_ownership),
        ] {
            if value.trim().is_empty() {
                problems.push(format!("{name} must not be empty"));
            }
        }
        if !(self.state.len() == 2 && self.state.chars().all(|c| c.is_ascii_alphabetic())) {
            problems.push("state must be a two-letter code".to_string());
        }
        if !(self.revol_util.is_finite() && (0.0..=150.0).contains(&self.revol_util)) {
            problems.push("revol_util must be between 0 and 150".to_string());
        }
        if !(300..=900).contains(&self.fico) {
            problems.push("fico must be between 300 and 900".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Validation(problems.join("; ")))
        }
    }

    /// Every field as a named feature, in declaration order.
    fn available_features(&self) -> Vec<(&'static str, FeatureValue)> {
        vec![
            ("loan_amnt", FeatureValue::Number(self.loan_amnt as f64)),
            ("annual_inc", FeatureValue::Number(self.annual_inc)),
            ("dti", FeatureValue::Number(self.dti)),
            ("emp_length", FeatureValue::Number(self.emp_length as f64)),
            ("grade", FeatureValue::Category(self.grade.clone())),
            ("term", FeatureValue::Category(self.term.clone())),
            ("purpose", FeatureValue::Category(self.purpose.clone())),
            ("home_ownership", FeatureValue::Category(self.home_ownership.clone())),
            ("state", FeatureValue::Category(self.state.clone())),
            ("revol_util", FeatureValue::Number(self.revol_util)),
            ("fico", FeatureValue::Number(self.fico as f64)),
        ]
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeatureValue {
    Number(f64),
    Category(String),
}

/// Ordered (name, value) pairs matching the model's declared schema.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector {
    entries: Vec<(String, FeatureValue)>,
}

impl FeatureVector {
    pub fn new(entries: Vec<(String, FeatureValue)>) -> Self {
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&FeatureValue> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

/// The model metadata document: `{"feature_order": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub feature_order: Vec<String>,
}

impl FeatureSchema {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let schema: FeatureSchema = serde_json::from_str(&content)?;
        if schema.feature_order.is_empty() {
            anyhow::bail!("{path} declares no features");
        }
        Ok(schema)
    }

    /// Build the vector the model expects from a validated request.
    ///
    /// Fails with a validation error if the schema names a feature the
    /// request does not carry. The missing names go to the log only.
    pub fn normalize(&self, req: &ScoreRequest) -> ServiceResult<FeatureVector> {
        let available = req.available_features();

        let mut entries = Vec::with_capacity(self.feature_order.len());
        let mut missing = Vec::new();
        for name in &self.feature_order {
            match available.iter().find(|(n, _)| n == name) {
                Some((_, value)) => entries.push((name.clone(), value.clone())),
                None => missing.push(name.as_str()),
            }
        }

        if !missing.is_empty() {
            log::error!("Model schema declares features the request lacks: {missing:?}");
            return Err(ServiceError::Validation(
                "missing required fields. Please check your input and try again".into(),
            ));
        }
        Ok(FeatureVector::new(entries))
    }
}
