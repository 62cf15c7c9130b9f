//! Loan domain model.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tenant::TenantId;
use crate::policy::{self, LoanDuration};

/// A single lending of a tool to a person.
///
/// A loan is open while `returned_on` is `None`; a tool has at most one
/// open loan at any time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Loan {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub person_id: Uuid,
    /// Copied from the tool at lend time.
    pub tenant_id: TenantId,
    pub lent_on: NaiveDate,
    pub returned_on: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
}

impl Loan {
    pub fn is_open(&self) -> bool {
        self.returned_on.is_none()
    }

    pub fn duration(&self, today: NaiveDate) -> LoanDuration {
        policy::duration(self.lent_on, self.returned_on, today)
    }

    pub fn is_overdue(&self, today: NaiveDate) -> bool {
        policy::is_overdue(self.lent_on, self.returned_on, today)
    }
}

/// Input for lending a tool.
///
/// `lent_on` is the raw `YYYY-MM-DD` value supplied by the caller;
/// `None` means today.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LendTool {
    pub tenant_id: TenantId,
    pub tool_id: Uuid,
    pub person_id: Uuid,
    pub lent_on: Option<String>,
}

/// Corrective edit of a loan's dates.
///
/// `returned_on`: `Some(Some(d))` sets, `Some(None)` re-opens the loan,
/// `None` leaves it unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EditLoan {
    pub lent_on: Option<String>,
    pub returned_on: Option<Option<String>>,
}
