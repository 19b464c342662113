use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Additional attempts after the first insert.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Pause between attempts.
    #[serde(default)]
    pub retry_backoff_ms: u64,
    /// Stop retrying once this much time has passed since the first attempt.
    #[serde(default)]
    pub attempt_deadline_ms: Option<u64>,
}

impl PersistenceConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.attempt_deadline_ms.map(Duration::from_millis)
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: 0,
            attempt_deadline_ms: None,
        }
    }
}

fn default_max_retries() -> u32 {
    2
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioConfig {
    #[serde(default = "default_recent_limit")]
    pub recent_limit: u32,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self { recent_limit: default_recent_limit() }
    }
}

fn default_recent_limit() -> u32 {
    20
}

fn default_audience() -> String {
    "authenticated".into()
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceConfigFile {
    model_path: String,
    feature_meta_path: String,
    #[serde(default)]
    keyring_path: Option<String>,
    #[serde(default)]
    jwt_secret_path: Option<String>,
    #[serde(default = "default_audience")]
    token_audience: String,
    #[serde(default)]
    persistence: PersistenceConfig,
    #[serde(default)]
    portfolio: PortfolioConfig,
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub model_path: String,
    pub feature_meta_path: String,
    /// Provisioned opaque tokens, for offline and development use.
    pub keyring_path: Option<String>,
    /// File holding the HS256 signing secret. Takes precedence over the
    /// keyring. With neither set the service has no token verifier.
    pub jwt_secret_path: Option<String>,
    pub token_audience: String,
    pub persistence: PersistenceConfig,
    pub portfolio: PortfolioConfig,
}

impl ServiceConfig {
    /// Load from `<data_dir>/config/service.json`.
    /// Artifact paths in the file are relative to the data directory.
    /// In tests, use ServiceConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/config/service.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: ServiceConfigFile = serde_json::from_str(&content)?;

        if file.persistence.max_retries > 10 {
            anyhow::bail!(
                "{path}: persistence.max_retries = {} is above the limit of 10",
                file.persistence.max_retries
            );
        }
        if file.portfolio.recent_limit == 0 {
            anyhow::bail!("{path}: portfolio.recent_limit must be positive");
        }

        Ok(Self {
            model_path: resolve(data_dir, &file.model_path),
            feature_meta_path: resolve(data_dir, &file.feature_meta_path),
            keyring_path: file.keyring_path.map(|p| resolve(data_dir, &p)),
            jwt_secret_path: file.jwt_secret_path.map(|p| resolve(data_dir, &p)),
            token_audience: file.token_audience,
            persistence: file.persistence,
            portfolio: file.portfolio,
        })
    }

    /// Config with hardcoded defaults for use in tests. No artifacts on disk.
    pub fn default_test() -> Self {
        Self {
            model_path: "models/model.json".into(),
            feature_meta_path: "models/feature_meta.json".into(),
            keyring_path: None,
            jwt_secret_path: None,
            token_audience: default_audience(),
            persistence: PersistenceConfig::default(),
            portfolio: PortfolioConfig::default(),
        }
    }
}

fn resolve(data_dir: &str, path: &str) -> String {
    if Path::new(path).is_absolute() {
        path.to_string()
    } else {
        Path::new(data_dir).join(path).to_string_lossy().into_owned()
    }
}
