//! Shared primitive types used across the entire service.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, unique identifier for a stored application row (UUID v4 text).
pub type ApplicationId = String;

/// The resolved subject of a verified bearer credential.
/// Every row written on behalf of a tenant carries this id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Row visibility for a read or write.
///
/// `None` is the anonymous scope: it sees only rows without a tenant id.
/// A tenant scope sees only rows carrying exactly that tenant id.
pub type Scope<'a> = Option<&'a TenantId>;
