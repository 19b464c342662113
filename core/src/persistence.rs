//! Persistence coordinator: retry-classified durable write of a scored row.
//!
//! Each attempt is one atomic single-row insert. An attempt ends in exactly
//! one of four outcomes:
//!
//!   stored     the store echoed the row back             -> done
//!   empty      the store accepted but returned no rows   -> retry
//!   malformed  the reply was not a row list with an id   -> retry
//!   failed     the store raised an error                 -> retry iff transient
//!
//! A permanent error or an exhausted budget stops immediately. Nothing is
//! compensated or rolled back: a failed attempt wrote nothing.

use crate::{
    application::ApplicationRecord,
    config::PersistenceConfig,
    error::{ServiceError, StoreError, StoreResult},
    types::{ApplicationId, Scope},
};
use std::time::{Duration, Instant};

/// What the store sent back for an insert. `data` is `None` when the reply
/// carried no row list at all.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct InsertReply {
    pub data: Option<Vec<serde_json::Value>>,
}

impl InsertReply {
    pub fn rows(rows: Vec<serde_json::Value>) -> Self {
        Self { data: Some(rows) }
    }

    pub fn missing() -> Self {
        Self { data: None }
    }
}

/// The insert seam of the Data Store, scoped to the caller's identity.
pub trait ApplicationWriter {
    fn insert_application(&self, scope: Scope<'_>, record: &ApplicationRecord)
        -> StoreResult<InsertReply>;
}

#[derive(Debug)]
pub enum AttemptOutcome {
    Stored(ApplicationId),
    Empty,
    Malformed(String),
    Failed(StoreError),
}

impl AttemptOutcome {
    pub fn classify(result: StoreResult<InsertReply>) -> Self {
        let reply = match result {
            Ok(reply) => reply,
            Err(e) => return AttemptOutcome::Failed(e),
        };
        let Some(rows) = reply.data else {
            return AttemptOutcome::Malformed("reply carried no data".into());
        };
        let Some(first) = rows.first() else {
            return AttemptOutcome::Empty;
        };
        match first.get("id").and_then(|v| v.as_str()) {
            Some(id) if !id.is_empty() => AttemptOutcome::Stored(id.to_string()),
            _ => AttemptOutcome::Malformed(format!("row without id: {first}")),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            AttemptOutcome::Stored(_) => false,
            AttemptOutcome::Empty | AttemptOutcome::Malformed(_) => true,
            AttemptOutcome::Failed(e) => e.is_transient(),
        }
    }

    fn describe(&self) -> String {
        match self {
            AttemptOutcome::Stored(id) => format!("stored as {id}"),
            AttemptOutcome::Empty => {
                "insert returned no rows (ambiguous or rejected by row policy)".into()
            }
            AttemptOutcome::Malformed(detail) => format!("unexpected reply shape: {detail}"),
            AttemptOutcome::Failed(e) => {
                let class = if e.is_transient() { "transient" } else { "permanent" };
                format!("{class} store error: {e}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistReceipt {
    pub application_id: ApplicationId,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PersistFailure {
    pub attempts: u32,
    pub reason: String,
    /// True when the last attempt was a permanent error.
    pub permanent: bool,
}

impl From<PersistFailure> for ServiceError {
    fn from(f: PersistFailure) -> Self {
        ServiceError::Persistence { attempts: f.attempts, reason: f.reason }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff: Duration,
    pub deadline: Option<Duration>,
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&PersistenceConfig::default())
    }
}

impl From<&PersistenceConfig> for RetryPolicy {
    fn from(cfg: &PersistenceConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            backoff: cfg.backoff(),
            deadline: cfg.deadline(),
        }
    }
}

pub struct PersistenceCoordinator<'a, W: ApplicationWriter + ?Sized> {
    writer: &'a W,
    policy: RetryPolicy,
}

impl<'a, W: ApplicationWriter + ?Sized> PersistenceCoordinator<'a, W> {
    pub fn new(writer: &'a W, policy: RetryPolicy) -> Self {
        Self { writer, policy }
    }

    /// Insert `record` under `scope`, retrying per the policy.
    pub fn persist(
        &self,
        scope: Scope<'_>,
        record: &ApplicationRecord,
    ) -> Result<PersistReceipt, PersistFailure> {
        let max_attempts = self.policy.max_attempts();
        let started = Instant::now();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let outcome =
                AttemptOutcome::classify(self.writer.insert_application(scope, record));

            if let AttemptOutcome::Stored(application_id) = outcome {
                if attempt > 1 {
                    log::info!("Saved application {application_id} after {} retries", attempt - 1);
                } else {
                    log::debug!("Saved application {application_id}");
                }
                return Ok(PersistReceipt { application_id, attempts: attempt });
            }

            let reason = outcome.describe();
            if !outcome.is_retryable() {
                log::error!(
                    "Insert of application {} failed permanently on attempt {attempt}/{max_attempts}: {reason}",
                    record.id
                );
                return Err(PersistFailure { attempts: attempt, reason, permanent: true });
            }
            if attempt >= max_attempts {
                log::error!(
                    "Insert of application {} failed after {attempt} attempts: {reason}",
                    record.id
                );
                return Err(PersistFailure { attempts: attempt, reason, permanent: false });
            }
            if self.deadline_passed(started) {
                log::error!(
                    "Insert of application {} abandoned after {attempt} attempts: deadline passed ({reason})",
                    record.id
                );
                return Err(PersistFailure { attempts: attempt, reason, permanent: false });
            }

            log::warn!("Insert attempt {attempt}/{max_attempts} did not persist: {reason}. Retrying");
            if !self.policy.backoff.is_zero() {
                std::thread::sleep(self.policy.backoff);
                // The backoff itself may have used up the budget.
                if self.deadline_passed(started) {
                    log::error!(
                        "Insert of application {} abandoned after {attempt} attempts: deadline passed during backoff ({reason})",
                        record.id
                    );
                    return Err(PersistFailure { attempts: attempt, reason, permanent: false });
                }
            }
        }
    }

    fn deadline_passed(&self, started: Instant) -> bool {
        self.policy.deadline.is_some_and(|deadline| started.elapsed() >= deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reply_shapes_classify() {
        assert!(matches!(
            AttemptOutcome::classify(Ok(InsertReply::rows(vec![json!({"id": "a1"})]))),
            AttemptOutcome::Stored(id) if id == "a1"
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(InsertReply::rows(vec![]))),
            AttemptOutcome::Empty
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(InsertReply::missing())),
            AttemptOutcome::Malformed(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Ok(InsertReply::rows(vec![json!({"pd": 0.1})]))),
            AttemptOutcome::Malformed(_)
        ));
        assert!(matches!(
            AttemptOutcome::classify(Err(StoreError::Timeout(Duration::from_secs(1)))),
            AttemptOutcome::Failed(_)
        ));
    }

    #[test]
    fn retryability_follows_the_policy_table() {
        assert!(!AttemptOutcome::Stored("x".into()).is_retryable());
        assert!(AttemptOutcome::Empty.is_retryable());
        assert!(AttemptOutcome::Malformed("x".into()).is_retryable());
        assert!(AttemptOutcome::Failed(StoreError::Connection("refused".into())).is_retryable());
        assert!(!AttemptOutcome::Failed(StoreError::PolicyViolation("rls".into())).is_retryable());
    }

    #[test]
    fn default_policy_allows_three_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 3);
    }
}
