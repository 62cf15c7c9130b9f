//! Tool domain model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;

/// A physical tool owned by a tenant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    /// Replacement value in the tenant's currency. Never negative.
    pub value: f64,
    /// Opaque handle issued by the image-storage collaborator.
    pub image_ref: Option<String>,
    pub brand: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTool {
    pub tenant_id: TenantId,
    pub name: String,
    pub description: String,
    pub value: f64,
    pub image_ref: Option<String>,
    pub brand: Option<String>,
    pub model_number: Option<String>,
    pub serial_number: Option<String>,
}

/// Fields that can be updated on an existing tool.
///
/// For the optional columns, `Some(Some(v))` sets, `Some(None)` clears
/// and `None` leaves the stored value untouched.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdateTool {
    pub name: Option<String>,
    pub description: Option<String>,
    pub value: Option<f64>,
    pub image_ref: Option<Option<String>>,
    pub brand: Option<Option<String>>,
    pub model_number: Option<Option<String>>,
    pub serial_number: Option<Option<String>>,
}

/// Reject values the schema would refuse, with a readable message.
pub fn validate_value(value: f64) -> Result<(), String> {
    if !value.is_finite() {
        return Err(format!("tool value must be a finite number, got {value}"));
    }
    if value < 0.0 {
        return Err(format!("tool value must not be negative, got {value}"));
    }
    Ok(())
}
