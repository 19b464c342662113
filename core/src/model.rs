//! Inference engine: adapter over an opaque probability-of-default model.
//!
//! Artifacts are loaded once during startup into an immutable `ModelArtifacts`
//! value shared behind an `Arc`. A failed load leaves the engine without a
//! model: the process still starts, but every scoring call fails fast with
//! `ServiceUnavailable`.

use crate::{
    error::{ServiceError, ServiceResult},
    features::{FeatureSchema, FeatureValue, FeatureVector},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("feature '{0}' missing from vector")]
    MissingFeature(String),

    #[error("feature '{name}' has the wrong kind (expected {expected})")]
    WrongKind { name: String, expected: &'static str },

    #[error("model produced a non-probability output: {0}")]
    InvalidOutput(f64),

    #[error("{0}")]
    Failed(String),
}

/// `predict(feature_vector) -> probability`. Shared read-only across requests.
pub trait PdModel: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError>;

    fn version(&self) -> &str {
        "unversioned"
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericTerm {
    pub weight: f64,
    #[serde(default)]
    pub mean: f64,
    #[serde(default = "unit_scale")]
    pub scale: f64,
}

fn unit_scale() -> f64 {
    1.0
}

/// Logistic scoring model serialized as JSON.
///
/// Numeric features are standardized with the stored mean and scale before
/// weighting. Categorical features contribute the weight of their level;
/// unseen levels contribute nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticModel {
    pub model_version: String,
    pub intercept: f64,
    #[serde(default)]
    pub numeric: BTreeMap<String, NumericTerm>,
    #[serde(default)]
    pub categorical: BTreeMap<String, BTreeMap<String, f64>>,
}

impl LogisticModel {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let model: LogisticModel = serde_json::from_str(&content)?;
        if let Some((name, _)) = model.numeric.iter().find(|(_, t)| t.scale == 0.0) {
            anyhow::bail!("{path}: numeric feature '{name}' has zero scale");
        }
        Ok(model)
    }

    fn logit(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let mut z = self.intercept;

        for (name, term) in &self.numeric {
            match features.get(name) {
                Some(FeatureValue::Number(x)) => z += term.weight * (x - term.mean) / term.scale,
                Some(FeatureValue::Category(_)) => {
                    return Err(ModelError::WrongKind { name: name.clone(), expected: "number" })
                }
                None => return Err(ModelError::MissingFeature(name.clone())),
            }
        }

        for (name, levels) in &self.categorical {
            match features.get(name) {
                Some(FeatureValue::Category(level)) => {
                    z += levels.get(level).copied().unwrap_or(0.0);
                }
                Some(FeatureValue::Number(_)) => {
                    return Err(ModelError::WrongKind { name: name.clone(), expected: "category" })
                }
                None => return Err(ModelError::MissingFeature(name.clone())),
            }
        }

        Ok(z)
    }
}

impl PdModel for LogisticModel {
    fn predict(&self, features: &FeatureVector) -> Result<f64, ModelError> {
        let z = self.logit(features)?;
        let p = 1.0 / (1.0 + (-z).exp());
        if !p.is_finite() {
            return Err(ModelError::InvalidOutput(p));
        }
        Ok(p)
    }

    fn version(&self) -> &str {
        &self.model_version
    }
}

/// The once-loaded model plus the feature schema it was trained on.
pub struct ModelArtifacts {
    pub schema: FeatureSchema,
    pub model: Box<dyn PdModel>,
}

impl ModelArtifacts {
    pub fn new(schema: FeatureSchema, model: Box<dyn PdModel>) -> Self {
        Self { schema, model }
    }

    pub fn load(model_path: &str, meta_path: &str) -> anyhow::Result<Self> {
        let model = LogisticModel::load(model_path)?;
        let schema = FeatureSchema::load(meta_path)?;
        Ok(Self::new(schema, Box::new(model)))
    }
}

pub struct InferenceEngine {
    artifacts: Option<Arc<ModelArtifacts>>,
}

impl InferenceEngine {
    pub fn new(artifacts: Arc<ModelArtifacts>) -> Self {
        Self { artifacts: Some(artifacts) }
    }

    /// An engine with no model. Scoring is disabled.
    pub fn unavailable() -> Self {
        Self { artifacts: None }
    }

    /// Try to load artifacts. A failure is logged and yields a disabled engine.
    pub fn startup(model_path: &str, meta_path: &str) -> Self {
        match ModelArtifacts::load(model_path, meta_path) {
            Ok(artifacts) => {
                log::info!(
                    "Model {} loaded with {} features",
                    artifacts.model.version(),
                    artifacts.schema.feature_order.len()
                );
                Self::new(Arc::new(artifacts))
            }
            Err(e) => {
                log::error!("Model artifacts failed to load, scoring disabled: {e:#}");
                Self::unavailable()
            }
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.artifacts.is_some()
    }

    pub fn model_version(&self) -> Option<&str> {
        self.artifacts.as_deref().map(|a| a.model.version())
    }

    /// The loaded artifacts, or `ServiceUnavailable`.
    pub fn artifacts(&self) -> ServiceResult<&ModelArtifacts> {
        self.artifacts.as_deref().ok_or_else(|| {
            log::error!("Scoring requested but no model is loaded");
            ServiceError::ServiceUnavailable("model not loaded".into())
        })
    }

    /// Run the model. Any model failure becomes `Inference` with the cause logged.
    pub fn predict(&self, features: &FeatureVector) -> ServiceResult<f64> {
        let artifacts = self.artifacts()?;
        let pd = artifacts.model.predict(features).map_err(|e| {
            log::error!("Model inference failed: {e}");
            ServiceError::Inference(e.to_string())
        })?;
        if !(0.0..=1.0).contains(&pd) {
            log::error!("Model returned out-of-range PD {pd}");
            return Err(ServiceError::Inference(ModelError::InvalidOutput(pd).to_string()));
        }
        Ok(pd)
    }
}
