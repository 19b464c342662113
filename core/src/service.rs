//! The loan desk: caller-facing operations wired over every component.
//!
//! Built once at startup. Model artifacts and the token verifier are loaded
//! here and handed to components by construction; nothing is global.
//!
//! FLOWS:
//!   score      resolve -> validate -> normalize -> infer -> grade -> decide
//!              -> persist (best effort, never changes the response)
//!   save       resolve (required) -> persist (required, failure surfaces)
//!   portfolio  resolve -> aggregate (cached iff identified) + recent listing
//!   simulate   resolve -> direct scan at a what-if threshold
//!
//! Each operation takes the raw `Authorization` header value, if any.

use crate::{
    application::ApplicationRecord,
    clock::{Clock, FixedClock, SystemClock},
    config::ServiceConfig,
    error::{ServiceError, ServiceResult},
    features::ScoreRequest,
    grading::{Decision, RiskGrade},
    model::{InferenceEngine, ModelArtifacts},
    persistence::{PersistFailure, PersistReceipt, PersistenceCoordinator, RetryPolicy},
    portfolio::{PortfolioAggregator, PortfolioReport},
    simulation::{SimulationEngine, SimulationReport, DEFAULT_SIMULATION_THRESHOLD},
    store::LoanStore,
    tenant::{
        JwtVerifier, KeyringEntry, KeyringVerifier, ResolvedIdentity, TenantResolver,
        TokenVerifier,
    },
    types::ApplicationId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResponse {
    pub pd: f64,
    pub risk_grade: RiskGrade,
    pub decision: Decision,
    /// Reserved for feature attributions. Always null for now.
    pub top_features: Option<Vec<String>>,
}

/// A previously scored application, submitted for explicit saving.
/// The result triple is taken as given; it is not re-derived from `pd`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveApplicationRequest {
    #[serde(flatten)]
    pub features: ScoreRequest,
    pub pd: f64,
    pub risk_grade: RiskGrade,
    pub decision: Decision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveReceipt {
    pub success: bool,
    pub application_id: ApplicationId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    pub model_version: Option<String>,
    pub verifier_configured: bool,
    pub store_connected: bool,
}

pub struct LoanDesk {
    config: ServiceConfig,
    store: LoanStore,
    inference: InferenceEngine,
    resolver: TenantResolver,
    clock: Arc<dyn Clock>,
}

impl LoanDesk {
    pub fn new(
        config: ServiceConfig,
        store: LoanStore,
        inference: InferenceEngine,
        resolver: TenantResolver,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { config, store, inference, resolver, clock }
    }

    /// Startup phase: load model artifacts and the token verifier named by
    /// `config`. Missing artifacts disable scoring; a missing verifier
    /// disables authentication. Neither stops the service from starting.
    pub fn build(config: ServiceConfig, store: LoanStore) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let inference = InferenceEngine::startup(&config.model_path, &config.feature_meta_path);
        let verifier = load_verifier(&config, clock.clone());
        let resolver = TenantResolver::new(verifier, config.token_audience.clone(), clock.clone());
        Self::new(config, store, inference, resolver, clock)
    }

    /// Wire explicitly supplied artifacts, verifier and clock.
    pub fn build_with(
        config: ServiceConfig,
        store: LoanStore,
        artifacts: Option<Arc<ModelArtifacts>>,
        verifier: Option<Arc<dyn TokenVerifier>>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let inference = match artifacts {
            Some(a) => InferenceEngine::new(a),
            None => InferenceEngine::unavailable(),
        };
        let resolver = TenantResolver::new(verifier, config.token_audience.clone(), clock.clone());
        Self::new(config, store, inference, resolver, clock)
    }

    /// In-memory desk for tests: migrated store, the given model, a keyring
    /// of two tenants (`Bearer tenant-a-token`, `Bearer tenant-b-token`) and
    /// a clock fixed at 2026-01-01T00:00:00Z.
    pub fn build_test(artifacts: Option<Arc<ModelArtifacts>>) -> ServiceResult<Self> {
        let store = LoanStore::in_memory()?;
        store.migrate()?;
        let start = chrono::DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .map_err(|e| ServiceError::Other(e.into()))?
            .with_timezone(&chrono::Utc);
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(start));
        let verifier = KeyringVerifier::new(
            ["tenant-a", "tenant-b"]
                .into_iter()
                .map(|sub| KeyringEntry {
                    token: format!("{sub}-token"),
                    sub: sub.to_string(),
                    aud: Some("authenticated".into()),
                    exp: None,
                })
                .collect(),
            clock.clone(),
        );
        Ok(Self::build_with(
            ServiceConfig::default_test(),
            store,
            artifacts,
            Some(Arc::new(verifier)),
            clock,
        ))
    }

    pub fn store(&self) -> &LoanStore {
        &self.store
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.config.persistence)
    }

    /// Score an application and record the result.
    ///
    /// The response depends only on the model. Persistence runs afterwards
    /// and any failure there is logged, never returned.
    pub fn score(
        &self,
        req: &ScoreRequest,
        authorization: Option<&str>,
    ) -> ServiceResult<ScoreResponse> {
        let artifacts = self.inference.artifacts()?;
        req.validate()?;
        let features = artifacts.schema.normalize(req)?;
        let pd = self.inference.predict(&features)?;
        let risk_grade = RiskGrade::for_pd(pd);
        let decision = Decision::for_pd(pd);

        let identity = self.resolver.resolve(authorization);
        if authorization.is_some() && !identity.is_valid() {
            log::warn!("Invalid or unverifiable credential on scoring; saving unscoped");
        }

        let record = ApplicationRecord::new(
            identity.tenant_id().cloned(),
            req.clone(),
            pd,
            risk_grade,
            decision,
            self.clock.as_ref(),
        );
        if let Err(failure) = self.persist(&identity, &record) {
            log::error!(
                "Application scored but not persisted after {} attempt(s): {}",
                failure.attempts,
                failure.reason
            );
        }

        Ok(ScoreResponse { pd, risk_grade, decision, top_features: None })
    }

    /// Save a client-scored application. Requires a valid identity, and a
    /// failed write is the caller's failure.
    pub fn save_application(
        &self,
        req: &SaveApplicationRequest,
        authorization: Option<&str>,
    ) -> ServiceResult<SaveReceipt> {
        let identity = self.require_identity(authorization)?;
        req.features.validate()?;
        if !(0.0..=1.0).contains(&req.pd) {
            return Err(ServiceError::Validation("pd must be between 0 and 1".into()));
        }

        let record = ApplicationRecord::new(
            identity.tenant_id().cloned(),
            req.features.clone(),
            req.pd,
            req.risk_grade,
            req.decision,
            self.clock.as_ref(),
        );
        let receipt = self.persist(&identity, &record)?;
        Ok(SaveReceipt { success: true, application_id: receipt.application_id })
    }

    pub fn portfolio(&self, authorization: Option<&str>) -> ServiceResult<PortfolioReport> {
        let identity = self.resolver.resolve(authorization);
        if authorization.is_some() && !identity.is_valid() {
            log::warn!("Invalid or unverifiable credential on portfolio query; using anonymous scope");
        }
        PortfolioAggregator::new(&self.store, self.config.portfolio.recent_limit)
            .report(&identity)
            .inspect_err(|e| log::error!("Portfolio query failed ({}): {e}", e.class()))
    }

    /// Threshold what-if. `None` uses the default threshold.
    pub fn simulate(
        &self,
        threshold: Option<f64>,
        authorization: Option<&str>,
    ) -> ServiceResult<SimulationReport> {
        let identity = self.resolver.resolve(authorization);
        if authorization.is_some() && !identity.is_valid() {
            log::warn!("Invalid or unverifiable credential on simulation; using anonymous scope");
        }
        SimulationEngine::new(&self.store)
            .simulate(identity.scope(), threshold.unwrap_or(DEFAULT_SIMULATION_THRESHOLD))
            .inspect_err(|e| log::error!("Portfolio simulation failed ({}): {e}", e.class()))
    }

    /// One of the caller's own applications.
    pub fn application(
        &self,
        id: &str,
        authorization: Option<&str>,
    ) -> ServiceResult<ApplicationRecord> {
        let identity = self.require_identity(authorization)?;
        let Some(tenant) = identity.tenant_id() else {
            return Err(ServiceError::Unauthorized("no tenant".into()));
        };
        self.store
            .application_by_id(tenant, id)?
            .ok_or_else(|| ServiceError::NotFound { id: id.to_string() })
    }

    pub fn health(&self) -> HealthReport {
        HealthReport {
            status: "ok".into(),
            model_loaded: self.inference.is_loaded(),
            model_version: self.inference.model_version().map(str::to_string),
            verifier_configured: self.resolver.has_verifier(),
            store_connected: self.store.is_connected(),
        }
    }

    fn require_identity(&self, authorization: Option<&str>) -> ServiceResult<ResolvedIdentity> {
        let identity = self.resolver.resolve(authorization);
        if identity.is_valid() {
            Ok(identity)
        } else {
            log::warn!("Rejected unauthenticated call to an authenticated operation");
            Err(ServiceError::Unauthorized("valid bearer credential required".into()))
        }
    }

    fn persist(
        &self,
        identity: &ResolvedIdentity,
        record: &ApplicationRecord,
    ) -> Result<PersistReceipt, PersistFailure> {
        PersistenceCoordinator::new(&self.store, self.retry_policy())
            .persist(identity.scope(), record)
    }
}

/// A signing secret wins over a keyring. A verifier that fails to load is
/// logged and left out.
fn load_verifier(config: &ServiceConfig, clock: Arc<dyn Clock>) -> Option<Arc<dyn TokenVerifier>> {
    if let Some(path) = config.jwt_secret_path.as_deref() {
        return match JwtVerifier::load(path, clock) {
            Ok(v) => {
                log::info!("HS256 token verifier loaded from {path}");
                Some(Arc::new(v))
            }
            Err(e) => {
                log::error!("Token signing secret failed to load: {e:#}");
                None
            }
        };
    }
    let path = config.keyring_path.as_deref()?;
    match KeyringVerifier::load(path, clock) {
        Ok(v) => {
            log::info!("Token keyring loaded with {} entries", v.len());
            Some(Arc::new(v))
        }
        Err(e) => {
            log::error!("Token keyring failed to load: {e:#}");
            None
        }
    }
}
