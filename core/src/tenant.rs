//! Tenant resolver: turns an optional bearer credential into an identity.
//!
//! RULE: resolution never fails. Every problem with a credential yields the
//! anonymous identity, and callers decide whether anonymity is acceptable.
//! Without a provisioned verifier every credential resolves anonymous.

use crate::{
    clock::Clock,
    types::{Scope, TenantId},
};
use jsonwebtoken::{errors::ErrorKind as JwtErrorKind, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Claims carried by a verified token. `sub` is the tenant identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub aud: Option<String>,
    /// Expiry as Unix seconds.
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenRejection {
    #[error("token is malformed")]
    Malformed,

    #[error("token signature not recognised")]
    UnknownToken,

    #[error("token has expired")]
    Expired,

    #[error("token audience does not match '{expected}'")]
    AudienceMismatch { expected: String },
}

/// `decode(token, audience) -> claims | rejected`. Enforces signature and expiry.
pub trait TokenVerifier: Send + Sync {
    fn decode(&self, token: &str, audience: &str) -> Result<Claims, TokenRejection>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyringEntry {
    pub token: String,
    pub sub: String,
    #[serde(default)]
    pub aud: Option<String>,
    #[serde(default)]
    pub exp: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct KeyringFile {
    tokens: Vec<KeyringEntry>,
}

/// Verifier over a provisioned set of opaque bearer tokens.
///
/// Stands in for a signing key in offline and development deployments:
/// a token verifies iff it was provisioned, and its claims are the
/// provisioned ones.
pub struct KeyringVerifier {
    entries: HashMap<String, KeyringEntry>,
    clock: Arc<dyn Clock>,
}

impl KeyringVerifier {
    pub fn new(entries: Vec<KeyringEntry>, clock: Arc<dyn Clock>) -> Self {
        let entries = entries.into_iter().map(|e| (e.token.clone(), e)).collect();
        Self { entries, clock }
    }

    pub fn load(path: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let file: KeyringFile = serde_json::from_str(&content)?;
        Ok(Self::new(file.tokens, clock))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl TokenVerifier for KeyringVerifier {
    fn decode(&self, token: &str, audience: &str) -> Result<Claims, TokenRejection> {
        let entry = self.entries.get(token).ok_or(TokenRejection::UnknownToken)?;
        if entry.aud.as_deref() != Some(audience) {
            return Err(TokenRejection::AudienceMismatch { expected: audience.to_string() });
        }
        if let Some(exp) = entry.exp {
            if exp <= self.clock.now().timestamp() {
                return Err(TokenRejection::Expired);
            }
        }
        Ok(Claims {
            sub: Some(entry.sub.clone()),
            aud: entry.aud.clone(),
            exp: entry.exp,
        })
    }
}

/// Verifier for HS256-signed JWTs sharing a secret with the issuer.
///
/// Signature, algorithm, audience and the presence of `sub`, `aud` and `exp`
/// are checked by `jsonwebtoken`. Expiry is checked against the service
/// clock with no leeway.
pub struct JwtVerifier {
    key: DecodingKey,
    clock: Arc<dyn Clock>,
}

impl JwtVerifier {
    pub fn from_secret(secret: &[u8], clock: Arc<dyn Clock>) -> Self {
        Self { key: DecodingKey::from_secret(secret), clock }
    }

    /// Read the secret from a file. Surrounding whitespace is ignored.
    pub fn load(path: &str, clock: Arc<dyn Clock>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let secret = content.trim();
        if secret.is_empty() {
            anyhow::bail!("{path} holds an empty signing secret");
        }
        Ok(Self::from_secret(secret.as_bytes(), clock))
    }
}

impl TokenVerifier for JwtVerifier {
    fn decode(&self, token: &str, audience: &str) -> Result<Claims, TokenRejection> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[audience]);
        validation.set_required_spec_claims(&["exp", "aud", "sub"]);
        validation.validate_exp = false;

        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &validation).map_err(|e| {
            match e.kind() {
                JwtErrorKind::InvalidSignature => TokenRejection::UnknownToken,
                JwtErrorKind::ExpiredSignature => TokenRejection::Expired,
                JwtErrorKind::InvalidAudience => {
                    TokenRejection::AudienceMismatch { expected: audience.to_string() }
                }
                JwtErrorKind::MissingRequiredClaim(claim) if claim == "aud" => {
                    TokenRejection::AudienceMismatch { expected: audience.to_string() }
                }
                _ => TokenRejection::Malformed,
            }
        })?;

        match data.claims.exp {
            Some(exp) if exp > self.clock.now().timestamp() => Ok(data.claims),
            Some(_) => Err(TokenRejection::Expired),
            None => Err(TokenRejection::Malformed),
        }
    }
}

/// Outcome of resolution. Valid iff a tenant id is present.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedIdentity {
    tenant_id: Option<TenantId>,
}

impl ResolvedIdentity {
    pub fn anonymous() -> Self {
        Self { tenant_id: None }
    }

    pub fn tenant(id: TenantId) -> Self {
        Self { tenant_id: Some(id) }
    }

    pub fn is_valid(&self) -> bool {
        self.tenant_id.is_some()
    }

    pub fn tenant_id(&self) -> Option<&TenantId> {
        self.tenant_id.as_ref()
    }

    /// Row scope for reads and writes made on behalf of this identity.
    pub fn scope(&self) -> Scope<'_> {
        self.tenant_id.as_ref()
    }
}

pub struct TenantResolver {
    verifier: Option<Arc<dyn TokenVerifier>>,
    audience: String,
    clock: Arc<dyn Clock>,
}

impl TenantResolver {
    pub fn new(
        verifier: Option<Arc<dyn TokenVerifier>>,
        audience: impl Into<String>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        if verifier.is_none() {
            log::warn!(
                "No token verifier is provisioned. Every credential resolves anonymous \
                 and authenticated operations are unavailable."
            );
        }
        Self { verifier, audience: audience.into(), clock }
    }

    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }

    /// Resolve an `Authorization` header value.
    pub fn resolve(&self, authorization: Option<&str>) -> ResolvedIdentity {
        let Some(header) = authorization else {
            return ResolvedIdentity::anonymous();
        };
        let Some(token) = bearer_token(header) else {
            log::debug!("Authorization header is not a well-formed bearer credential");
            return ResolvedIdentity::anonymous();
        };
        let Some(verifier) = &self.verifier else {
            log::debug!("Cannot verify bearer credential: no verifier provisioned");
            return ResolvedIdentity::anonymous();
        };

        let claims = match verifier.decode(token, &self.audience) {
            Ok(claims) => claims,
            Err(TokenRejection::Expired) => {
                log::debug!("Bearer credential has expired");
                return ResolvedIdentity::anonymous();
            }
            Err(rejection) => {
                log::warn!("Bearer credential rejected: {rejection}");
                return ResolvedIdentity::anonymous();
            }
        };

        // Verifiers enforce expiry, but a stale claim is never trusted.
        if let Some(exp) = claims.exp {
            if exp <= self.clock.now().timestamp() {
                log::debug!("Bearer credential has expired");
                return ResolvedIdentity::anonymous();
            }
        }

        match claims.sub.as_deref().map(str::trim) {
            Some(sub) if !sub.is_empty() => ResolvedIdentity::tenant(TenantId::new(sub)),
            _ => {
                log::warn!("Verified credential carries no subject claim");
                ResolvedIdentity::anonymous()
            }
        }
    }
}

/// `Bearer <token>` with exactly one non-empty token.
fn bearer_token(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ")?;
    if token.is_empty() || token.chars().any(char::is_whitespace) {
        return None;
    }
    Some(token)
}
