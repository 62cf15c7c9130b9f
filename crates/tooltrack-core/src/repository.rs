//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async and take an explicit `tenant_id`;
//! there is no ambient "current tenant". A record owned by another tenant
//! is reported as [`TrackerError::NotFound`](crate::error::TrackerError),
//! never as a distinct error, so callers cannot learn that it exists.
//!
//! [`ToolRepository`] and [`PersonRepository`] together form the
//! inventory store; [`LoanLedger`] sits on top of them.

use uuid::Uuid;

use crate::error::TrackerResult;
use crate::models::{
    loan::{EditLoan, LendTool, Loan},
    person::{CreatePerson, Person, UpdatePerson},
    tenant::{RecordLogin, Tenant, TenantId},
    tool::{CreateTool, Tool, UpdateTool},
};

/// Pagination parameters for list queries.
#[derive(Debug, Clone)]
pub struct Pagination {
    pub offset: u64,
    pub limit: u64,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

impl Pagination {
    pub fn next(&self) -> Self {
        Self {
            offset: self.offset + self.limit,
            limit: self.limit,
        }
    }
}

/// A paginated result set.
#[derive(Debug, Clone)]
pub struct PaginatedResult<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub offset: u64,
    pub limit: u64,
}

impl<T> PaginatedResult<T> {
    pub fn has_more(&self) -> bool {
        self.offset + (self.items.len() as u64) < self.total
    }
}

// ---------------------------------------------------------------------------
// Tenant directory (global scope)
// ---------------------------------------------------------------------------

pub trait TenantDirectory: Send + Sync {
    /// Insert or refresh a tenant after a successful external login.
    /// `created_at` is preserved across logins.
    fn record_login(
        &self,
        input: RecordLogin,
    ) -> impl Future<Output = TrackerResult<Tenant>> + Send;
    fn get(&self, id: &TenantId) -> impl Future<Output = TrackerResult<Tenant>> + Send;
    fn list(
        &self,
        pagination: Pagination,
    ) -> impl Future<Output = TrackerResult<PaginatedResult<Tenant>>> + Send;
    /// The earliest-created tenant, ties broken by ascending id.
    fn earliest(&self) -> impl Future<Output = TrackerResult<Option<Tenant>>> + Send;
}

// ---------------------------------------------------------------------------
// Inventory store
// ---------------------------------------------------------------------------

pub trait ToolRepository: Send + Sync {
    fn create(&self, input: CreateTool) -> impl Future<Output = TrackerResult<Tool>> + Send;
    fn get_by_id(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
    ) -> impl Future<Output = TrackerResult<Tool>> + Send;
    fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        input: UpdateTool,
    ) -> impl Future<Output = TrackerResult<Tool>> + Send;
    /// Delete a tool that is not lent out. Returns the deleted record so
    /// the caller can release its image.
    fn delete(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
    ) -> impl Future<Output = TrackerResult<Tool>> + Send;
    fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> impl Future<Output = TrackerResult<PaginatedResult<Tool>>> + Send;
}

pub trait PersonRepository: Send + Sync {
    /// Fails with `DuplicateName` if the tenant already has a person
    /// with this name. Detection is part of the insert itself.
    fn create(&self, input: CreatePerson) -> impl Future<Output = TrackerResult<Person>> + Send;
    fn get_by_id(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
    ) -> impl Future<Output = TrackerResult<Person>> + Send;
    fn find_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> impl Future<Output = TrackerResult<Option<Person>>> + Send;
    fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        input: UpdatePerson,
    ) -> impl Future<Output = TrackerResult<Person>> + Send;
    /// Fails with `HasLoans` if any loan, open or closed, references
    /// the person.
    fn delete(&self, tenant_id: &TenantId, id: Uuid)
    -> impl Future<Output = TrackerResult<()>> + Send;
    fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> impl Future<Output = TrackerResult<PaginatedResult<Person>>> + Send;
}

// ---------------------------------------------------------------------------
// Loan ledger
// ---------------------------------------------------------------------------

pub trait LoanLedger: Send + Sync {
    /// Open a loan. Succeeds only if the tool has no open loan; of any
    /// number of concurrent calls for the same tool exactly one wins.
    fn lend(&self, input: LendTool) -> impl Future<Output = TrackerResult<Loan>> + Send;
    /// Close the tool's open loan. `returned_on` defaults to today.
    fn return_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
        returned_on: Option<String>,
    ) -> impl Future<Output = TrackerResult<Loan>> + Send;
    fn edit_loan(
        &self,
        tenant_id: &TenantId,
        loan_id: Uuid,
        input: EditLoan,
    ) -> impl Future<Output = TrackerResult<Loan>> + Send;
    fn get_by_id(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
    ) -> impl Future<Output = TrackerResult<Loan>> + Send;
    fn open_loan_for_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
    ) -> impl Future<Output = TrackerResult<Option<Loan>>> + Send;
    /// Loan history of a tool, most recent first.
    fn loans_for_tool(
        &self,
        tenant_id: &TenantId,
        tool_id: Uuid,
    ) -> impl Future<Output = TrackerResult<Vec<Loan>>> + Send;
    /// Loan history of a person, most recent first.
    fn loans_for_person(
        &self,
        tenant_id: &TenantId,
        person_id: Uuid,
    ) -> impl Future<Output = TrackerResult<Vec<Loan>>> + Send;
    fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> impl Future<Output = TrackerResult<PaginatedResult<Loan>>> + Send;
}
