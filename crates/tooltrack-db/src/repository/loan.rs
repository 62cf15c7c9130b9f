//! SurrealDB implementation of [`LoanLedger`].
//!
//! Every loan carries an `open_slot` key covered by the unique index
//! `idx_loan_open_slot`. While the loan is open the key is the tool id;
//! once it is closed the key becomes `closed:<loan_id>`. Opening a second
//! loan for a tool therefore fails inside the `CREATE` itself, whichever
//! of several concurrent writers gets there second.
//!
//! `lend` checks ownership and creates the loan in one transaction that
//! also bumps `lend_count` on the tool and the person. Deleting either
//! record writes the same key, so a delete racing a lend makes one of
//! the two transactions conflict and retry against the other's result.

use chrono::{DateTime, NaiveDate, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tooltrack_core::error::{TrackerError, TrackerResult};
use tooltrack_core::models::loan::{EditLoan, LendTool, Loan};
use tooltrack_core::models::tenant::TenantId;
use tooltrack_core::policy;
use tooltrack_core::repository::{LoanLedger, PaginatedResult, Pagination};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{
    DbError, MAX_CONFLICT_RETRIES, TxFailure, conflict_backoff, is_retryable_conflict,
};
use crate::schema::LOAN_OPEN_SLOT_INDEX;

const LEND_TX: &str = "\
BEGIN TRANSACTION;
LET $tool_owner = (SELECT VALUE tenant_id FROM type::record('tool', $tool_id))[0];
IF $tool_owner = NONE { THROW 'lend:tool:missing' };
IF $tool_owner != $tenant_id { THROW 'lend:tool:foreign' };
LET $person_owner = (SELECT VALUE tenant_id FROM type::record('person', $person_id))[0];
IF $person_owner = NONE { THROW 'lend:person:missing' };
IF $person_owner != $tenant_id { THROW 'lend:person:foreign' };
UPDATE type::record('tool', $tool_id) SET lend_count = (lend_count ?? 0) + 1 RETURN NONE;
UPDATE type::record('person', $person_id) SET lend_count = (lend_count ?? 0) + 1 RETURN NONE;
CREATE type::record('loan', $id) SET
    tenant_id = $tenant_id, tool_id = $tool_id, person_id = $person_id,
    lent_on = $lent_on, open_slot = $open_slot
    RETURN NONE;
COMMIT TRANSACTION;
";

// Re-opening a loan claims the tool the same way `lend` does.
const EDIT_LOAN_TX: &str = "\
BEGIN TRANSACTION;
IF $reopen {
    IF (SELECT VALUE tenant_id FROM type::record('tool', $tool_id))[0] != $tenant_id {
        THROW 'edit_loan:tool:missing'
    };
    UPDATE type::record('tool', $tool_id) SET lend_count = (lend_count ?? 0) + 1 RETURN NONE;
};
UPDATE type::record('loan', $id) SET
    lent_on = $lent_on, returned_on = $returned_on, open_slot = $open_slot
    WHERE tenant_id = $tenant_id
    RETURN NONE;
COMMIT TRANSACTION;
";

/// Value of `open_slot` for a loan in the given state.
pub(crate) fn open_slot(tool_id: &str, loan_id: &str, open: bool) -> String {
    if open {
        tool_id.to_string()
    } else {
        format!("closed:{loan_id}")
    }
}

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct LoanRow {
    tenant_id: String,
    tool_id: String,
    person_id: String,
    lent_on: String,
    returned_on: Option<String>,
    created_at: DateTime<Utc>,
}

impl LoanRow {
    fn try_into_loan(self, id: Uuid) -> Result<Loan, DbError> {
        let uuid = |field: &str, raw: &str| {
            Uuid::parse_str(raw)
                .map_err(|e| DbError::decode("loan", format!("invalid {field} UUID: {e}")))
        };
        let date = |field: &str, raw: &str| {
            NaiveDate::parse_from_str(raw, policy::DATE_FORMAT)
                .map_err(|e| DbError::decode("loan", format!("invalid {field} '{raw}': {e}")))
        };

        Ok(Loan {
            id,
            tool_id: uuid("tool_id", &self.tool_id)?,
            person_id: uuid("person_id", &self.person_id)?,
            tenant_id: TenantId::new(self.tenant_id),
            lent_on: date("lent_on", &self.lent_on)?,
            returned_on: self
                .returned_on
                .as_deref()
                .map(|raw| date("returned_on", raw))
                .transpose()?,
            created_at: self.created_at,
        })
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct LoanRowWithId {
    record_id: String,
    tenant_id: String,
    tool_id: String,
    person_id: String,
    lent_on: String,
    returned_on: Option<String>,
    created_at: DateTime<Utc>,
}

impl LoanRowWithId {
    fn try_into_loan(self) -> Result<Loan, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::decode("loan", format!("invalid UUID: {e}")))?;
        LoanRow {
            tenant_id: self.tenant_id,
            tool_id: self.tool_id,
            person_id: self.person_id,
            lent_on: self.lent_on,
            returned_on: self.returned_on,
            created_at: self.created_at,
        }
        .try_into_loan(id)
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

const LOAN_COLUMNS: &str = "meta::id(id) AS record_id, *";

/// SurrealDB implementation of the loan ledger.
#[derive(Clone)]
pub struct SurrealLoanRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealLoanRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn select_loans(
        &self,
        filter: &str,
        tenant_id: &TenantId,
        key: (&'static str, String),
    ) -> TrackerResult<Vec<Loan>> {
        let query = format!(
            "SELECT {LOAN_COLUMNS} FROM loan \
             WHERE tenant_id = $tenant_id AND {filter} \
             ORDER BY lent_on DESC, created_at DESC"
        );

        let mut result = self
            .db
            .query(&query)
            .bind(("tenant_id", tenant_id.as_str().to_string()))
            .bind(key)
            .await
            .map_err(DbError::from)?;

        let rows: Vec<LoanRowWithId> = result.take(0).map_err(DbError::from)?;
        let loans = rows
            .into_iter()
            .map(|row| row.try_into_loan())
            .collect::<Result<Vec<_>, DbError>>()?;
        Ok(loans)
    }
}

impl<C: Connection> LoanLedger for SurrealLoanRepository<C> {
    async fn lend(&self, input: LendTool) -> TrackerResult<Loan> {
        let lent_on = policy::parse_date_or_today(input.lent_on.as_deref())?;

        let id = Uuid::now_v7();
        let id_str = id.to_string();
        let tool_id_str = input.tool_id.to_string();

        let mut attempt = 0;
        loop {
            let outcome = self
                .db
                .query(LEND_TX)
                .bind(("id", id_str.clone()))
                .bind(("tenant_id", input.tenant_id.as_str().to_string()))
                .bind(("tool_id", tool_id_str.clone()))
                .bind(("person_id", input.person_id.to_string()))
                .bind(("lent_on", policy::format_date(lent_on)))
                .bind(("open_slot", open_slot(&tool_id_str, &id_str, true)))
                .await;

            let failure = match TxFailure::check(outcome) {
                Ok(_) => break,
                Err(failure) => failure,
            };
            if failure.thrown("lend:tool:missing") {
                return Err(TrackerError::not_found("tool", input.tool_id));
            }
            if failure.thrown("lend:person:missing") {
                return Err(TrackerError::not_found("person", input.person_id));
            }
            if failure.thrown("lend:tool:foreign") {
                return Err(TrackerError::CrossTenant {
                    entity: "tool".into(),
                    id: tool_id_str,
                });
            }
            if failure.thrown("lend:person:foreign") {
                return Err(TrackerError::CrossTenant {
                    entity: "person".into(),
                    id: input.person_id.to_string(),
                });
            }
            if failure.violates(LOAN_OPEN_SLOT_INDEX) {
                debug!(tool_id = %input.tool_id, "Lend lost the open-slot race");
                return Err(TrackerError::ToolAlreadyLent {
                    tool_id: input.tool_id,
                });
            }
            if failure.is_retryable() && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                conflict_backoff(attempt).await;
                continue;
            }
            return Err(DbError::from(failure).into());
        }

        let loan = self.get_by_id(&input.tenant_id, id).await?;
        info!(
            loan_id = %loan.id,
            tool_id = %loan.tool_id,
            person_id = %loan.person_id,
            tenant_id = %loan.tenant_id,
            "Tool lent"
        );
        Ok(loan)
    }

    async fn return_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
        returned_on: Option<String>,
    ) -> TrackerResult<Loan> {
        let returned_on = policy::parse_date_or_today(returned_on.as_deref())?;

        let open = self
            .open_loan_for_tool(tenant_id, tool_id)
            .await?
            .ok_or(TrackerError::NoOpenLoan { tool_id })?;
        policy::check_order(open.lent_on, Some(returned_on))?;

        let loan_id_str = open.id.to_string();
        let tool_id_str = tool_id.to_string();

        // Compare-and-set: only a still-open row is closed.
        let mut attempt = 0;
        let mut result = loop {
            let outcome = self
                .db
                .query(
                    "UPDATE type::record('loan', $id) SET \
                     returned_on = $returned_on, open_slot = $open_slot \
                     WHERE tenant_id = $tenant_id AND returned_on = NONE",
                )
                .bind(("id", loan_id_str.clone()))
                .bind(("tenant_id", tenant_id.as_str().to_string()))
                .bind(("returned_on", policy::format_date(returned_on)))
                .bind(("open_slot", open_slot(&tool_id_str, &loan_id_str, false)))
                .await
                .and_then(|response| response.check());

            match outcome {
                Ok(result) => break result,
                Err(e) if is_retryable_conflict(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    conflict_backoff(attempt).await;
                }
                Err(e) => return Err(DbError::from(e).into()),
            }
        };

        let rows: Vec<LoanRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or(TrackerError::NoOpenLoan { tool_id })?;
        let loan = row.try_into_loan(open.id)?;

        info!(loan_id = %loan.id, tool_id = %tool_id, tenant_id = %tenant_id, "Tool returned");
        Ok(loan)
    }

    async fn edit_loan(
        &self,
        tenant_id: &TenantId,
        loan_id: Uuid,
        input: EditLoan,
    ) -> TrackerResult<Loan> {
        let current = self.get_by_id(tenant_id, loan_id).await?;

        let lent_on = match input.lent_on.as_deref() {
            Some(raw) => policy::parse_date(raw)?,
            None => current.lent_on,
        };
        let returned_on = match input.returned_on {
            None => current.returned_on,
            Some(None) => None,
            Some(Some(raw)) => Some(policy::parse_date(&raw)?),
        };
        policy::check_order(lent_on, returned_on)?;

        let loan_id_str = loan_id.to_string();
        let tool_id_str = current.tool_id.to_string();
        let reopen = current.returned_on.is_some() && returned_on.is_none();

        let mut attempt = 0;
        loop {
            let outcome = self
                .db
                .query(EDIT_LOAN_TX)
                .bind(("id", loan_id_str.clone()))
                .bind(("tenant_id", tenant_id.as_str().to_string()))
                .bind(("tool_id", tool_id_str.clone()))
                .bind(("reopen", reopen))
                .bind(("lent_on", policy::format_date(lent_on)))
                .bind(("returned_on", returned_on.map(policy::format_date)))
                .bind((
                    "open_slot",
                    open_slot(&tool_id_str, &loan_id_str, returned_on.is_none()),
                ))
                .await;

            let failure = match TxFailure::check(outcome) {
                Ok(_) => break,
                Err(failure) => failure,
            };
            if failure.thrown("edit_loan:tool:missing") {
                return Err(TrackerError::not_found("tool", current.tool_id));
            }
            if failure.violates(LOAN_OPEN_SLOT_INDEX) {
                return Err(TrackerError::ToolAlreadyLent {
                    tool_id: current.tool_id,
                });
            }
            if failure.is_retryable() && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                conflict_backoff(attempt).await;
                continue;
            }
            return Err(DbError::from(failure).into());
        }

        debug!(loan_id = %loan_id, tenant_id = %tenant_id, reopen, "Edited loan dates");
        self.get_by_id(tenant_id, loan_id).await
    }

    async fn get_by_id(&self, tenant_id: &TenantId, id: Uuid) -> TrackerResult<Loan> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('loan', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.as_str().to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<LoanRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "loan".into(),
            id: id_str,
        })?;

        Ok(row.try_into_loan(id)?)
    }

    async fn open_loan_for_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
    ) -> TrackerResult<Option<Loan>> {
        let loans = self
            .select_loans(
                "tool_id = $tool_id AND returned_on = NONE",
                tenant_id,
                ("tool_id", tool_id.to_string()),
            )
            .await?;
        Ok(loans.into_iter().next())
    }

    async fn loans_for_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
    ) -> TrackerResult<Vec<Loan>> {
        self.select_loans("tool_id = $tool_id", tenant_id, ("tool_id", tool_id.to_string()))
            .await
    }

    async fn loans_for_person(
        &self,
        tenant_id: &TenantId,
        person_id: Uuid,
    ) -> TrackerResult<Vec<Loan>> {
        self.select_loans(
            "person_id = $person_id",
            tenant_id,
            ("person_id", person_id.to_string()),
        )
        .await
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> TrackerResult<PaginatedResult<Loan>> {
        let tenant_id_str = tenant_id.as_str().to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM loan \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(&format!(
                "SELECT {LOAN_COLUMNS} FROM loan \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY lent_on DESC, created_at DESC \
                 LIMIT $limit START $offset"
            ))
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<LoanRowWithId> = result.take(0).map_err(DbError::from)?;
        let items = rows
            .into_iter()
            .map(|row| row.try_into_loan())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
