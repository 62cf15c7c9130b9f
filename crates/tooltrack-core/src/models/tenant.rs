//! Tenant identity and directory model.
//!
//! Tenant identifiers are issued by the external identity provider (the
//! OIDC `sub` claim). The core never mints them; it only stores the
//! directory entry recorded at login so that references can be resolved.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque tenant identifier supplied by the identity collaborator.
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

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Directory entry for a tenant that has logged in at least once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tenant {
    pub id: TenantId,
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_login: DateTime<Utc>,
}

/// Profile data handed over by the identity collaborator after login.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordLogin {
    pub id: TenantId,
    pub email: String,
    pub display_name: String,
    pub picture: Option<String>,
}
