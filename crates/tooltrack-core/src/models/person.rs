//! Person domain model: someone a tenant lends tools to.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;

/// A borrower. `(tenant_id, name)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Person {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_info: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePerson {
    pub tenant_id: TenantId,
    pub name: String,
    pub contact_info: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePerson {
    pub name: Option<String>,
    pub contact_info: Option<String>,
}
