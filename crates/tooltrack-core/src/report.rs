//! Read-only aggregations over a tenant's inventory and loans.
//!
//! The aggregation functions are pure and work on already-loaded slices;
//! [`ReportService`] loads a tenant's records through the repositories
//! and hands them over.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;
use uuid::Uuid;

use crate::error::TrackerResult;
use crate::models::{loan::Loan, person::Person, tenant::TenantId, tool::Tool};
use crate::repository::{LoanLedger, Pagination, PersonRepository, ToolRepository};

/// Upper bounds (exclusive) of the value histogram. The last bucket is
/// open-ended.
pub const VALUE_BUCKET_EDGES: [f64; 5] = [50.0, 100.0, 250.0, 500.0, 1000.0];

/// Label used for tools without a brand.
pub const UNBRANDED: &str = "Unbranded";

const UNKNOWN: &str = "(unknown)";
const PAGE_SIZE: u64 = 200;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OverdueLoan {
    pub loan_id: Uuid,
    pub tool_id: Uuid,
    pub tool_name: String,
    pub person_id: Uuid,
    pub person_name: String,
    pub lent_on: NaiveDate,
    /// Inclusive days out as of the report date.
    pub days_out: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq, Default)]
pub struct InventoryValuation {
    pub tool_count: u64,
    pub total_value: f64,
    pub on_loan_count: u64,
    pub on_loan_value: f64,
    pub available_value: f64,
    pub average_value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValueBucket {
    pub min: f64,
    /// Exclusive upper bound; `None` for the last bucket.
    pub max: Option<f64>,
    pub tool_count: u64,
    pub total_value: f64,
}

impl ValueBucket {
    pub fn label(&self) -> String {
        match self.max {
            Some(max) => format!("{:.0}-{:.0}", self.min, max),
            None => format!("{:.0}+", self.min),
        }
    }

    fn contains(&self, value: f64) -> bool {
        value >= self.min && self.max.is_none_or(|max| value < max)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BrandTotal {
    pub brand: String,
    pub tool_count: u64,
    pub total_value: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BorrowerSummary {
    pub person_id: Uuid,
    pub name: String,
    pub active_loans: u64,
    pub total_loans: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Availability {
    Available,
    OnLoan {
        loan_id: Uuid,
        person_id: Uuid,
        person_name: String,
        lent_on: NaiveDate,
        days_out: i64,
        overdue: bool,
    },
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolStatus {
    pub tool: Tool,
    pub availability: Availability,
}

fn names_by_id<'a, I>(items: I) -> HashMap<Uuid, &'a str>
where
    I: IntoIterator<Item = (Uuid, &'a str)>,
{
    items.into_iter().collect()
}

/// Open loans past the overdue threshold, oldest first.
pub fn overdue_loans(
    tools: &[Tool],
    people: &[Person],
    loans: &[Loan],
    today: NaiveDate,
) -> Vec<OverdueLoan> {
    let tool_names = names_by_id(tools.iter().map(|t| (t.id, t.name.as_str())));
    let person_names = names_by_id(people.iter().map(|p| (p.id, p.name.as_str())));

    let mut rows: Vec<OverdueLoan> = loans
        .iter()
        .filter(|loan| loan.is_overdue(today))
        .map(|loan| OverdueLoan {
            loan_id: loan.id,
            tool_id: loan.tool_id,
            tool_name: tool_names.get(&loan.tool_id).unwrap_or(&UNKNOWN).to_string(),
            person_id: loan.person_id,
            person_name: person_names
                .get(&loan.person_id)
                .unwrap_or(&UNKNOWN)
                .to_string(),
            lent_on: loan.lent_on,
            days_out: loan.duration(today).days,
        })
        .collect();
    rows.sort_by(|a, b| a.lent_on.cmp(&b.lent_on).then(a.tool_name.cmp(&b.tool_name)));
    rows
}

pub fn valuation(tools: &[Tool], loans: &[Loan]) -> InventoryValuation {
    let lent: HashSet<Uuid> = loans
        .iter()
        .filter(|loan| loan.is_open())
        .map(|loan| loan.tool_id)
        .collect();

    let mut out = InventoryValuation::default();
    for tool in tools {
        out.tool_count += 1;
        out.total_value += tool.value;
        if lent.contains(&tool.id) {
            out.on_loan_count += 1;
            out.on_loan_value += tool.value;
        }
    }
    out.available_value = out.total_value - out.on_loan_value;
    if out.tool_count > 0 {
        out.average_value = out.total_value / out.tool_count as f64;
    }
    out
}

/// Histogram over [`VALUE_BUCKET_EDGES`]. Empty buckets are included so
/// the shape is stable.
pub fn value_buckets(tools: &[Tool]) -> Vec<ValueBucket> {
    let mut lower = 0.0;
    let mut buckets: Vec<ValueBucket> = VALUE_BUCKET_EDGES
        .iter()
        .map(|&upper| {
            let bucket = ValueBucket {
                min: lower,
                max: Some(upper),
                tool_count: 0,
                total_value: 0.0,
            };
            lower = upper;
            bucket
        })
        .collect();
    buckets.push(ValueBucket {
        min: lower,
        max: None,
        tool_count: 0,
        total_value: 0.0,
    });

    for tool in tools {
        if let Some(bucket) = buckets.iter_mut().find(|b| b.contains(tool.value)) {
            bucket.tool_count += 1;
            bucket.total_value += tool.value;
        }
    }
    buckets
}

/// Totals per brand, highest value first. Brands are matched
/// case-insensitively; the first spelling seen is reported.
pub fn brand_totals(tools: &[Tool]) -> Vec<BrandTotal> {
    let mut by_key: HashMap<String, BrandTotal> = HashMap::new();
    for tool in tools {
        let brand = tool
            .brand
            .as_deref()
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .unwrap_or(UNBRANDED);
        let entry = by_key
            .entry(brand.to_lowercase())
            .or_insert_with(|| BrandTotal {
                brand: brand.to_string(),
                tool_count: 0,
                total_value: 0.0,
            });
        entry.tool_count += 1;
        entry.total_value += tool.value;
    }

    let mut rows: Vec<BrandTotal> = by_key.into_values().collect();
    rows.sort_by(|a, b| {
        b.total_value
            .total_cmp(&a.total_value)
            .then_with(|| a.brand.cmp(&b.brand))
    });
    rows
}

/// Active and lifetime loan counts for every person, ordered by name.
pub fn borrower_summary(people: &[Person], loans: &[Loan]) -> Vec<BorrowerSummary> {
    let mut counts: HashMap<Uuid, (u64, u64)> = HashMap::new();
    for loan in loans {
        let entry = counts.entry(loan.person_id).or_default();
        entry.1 += 1;
        if loan.is_open() {
            entry.0 += 1;
        }
    }

    let mut rows: Vec<BorrowerSummary> = people
        .iter()
        .map(|person| {
            let (active, total) = counts.get(&person.id).copied().unwrap_or_default();
            BorrowerSummary {
                person_id: person.id,
                name: person.name.clone(),
                active_loans: active,
                total_loans: total,
            }
        })
        .collect();
    rows.sort_by(|a, b| a.name.cmp(&b.name));
    rows
}

/// Every tool with its current availability, in listing order.
pub fn inventory_overview(
    tools: &[Tool],
    people: &[Person],
    loans: &[Loan],
    today: NaiveDate,
) -> Vec<ToolStatus> {
    let person_names = names_by_id(people.iter().map(|p| (p.id, p.name.as_str())));
    let open: HashMap<Uuid, &Loan> = loans
        .iter()
        .filter(|loan| loan.is_open())
        .map(|loan| (loan.tool_id, loan))
        .collect();

    tools
        .iter()
        .map(|tool| {
            let availability = match open.get(&tool.id) {
                None => Availability::Available,
                Some(loan) => Availability::OnLoan {
                    loan_id: loan.id,
                    person_id: loan.person_id,
                    person_name: person_names
                        .get(&loan.person_id)
                        .unwrap_or(&UNKNOWN)
                        .to_string(),
                    lent_on: loan.lent_on,
                    days_out: loan.duration(today).days,
                    overdue: loan.is_overdue(today),
                },
            };
            ToolStatus {
                tool: tool.clone(),
                availability,
            }
        })
        .collect()
}

/// Loads a tenant's records and runs the aggregations over them.
#[derive(Clone)]
pub struct ReportService<T, P, L> {
    tools: T,
    people: P,
    loans: L,
}

impl<T, P, L> ReportService<T, P, L>
where
    T: ToolRepository,
    P: PersonRepository,
    L: LoanLedger,
{
    pub fn new(tools: T, people: P, loans: L) -> Self {
        Self {
            tools,
            people,
            loans,
        }
    }

    pub async fn overdue(
        &self,
        tenant_id: &TenantId,
        today: NaiveDate,
    ) -> TrackerResult<Vec<OverdueLoan>> {
        let tools = self.all_tools(tenant_id).await?;
        let people = self.all_people(tenant_id).await?;
        let loans = self.all_loans(tenant_id).await?;
        Ok(overdue_loans(&tools, &people, &loans, today))
    }

    pub async fn valuation(&self, tenant_id: &TenantId) -> TrackerResult<InventoryValuation> {
        let tools = self.all_tools(tenant_id).await?;
        let loans = self.all_loans(tenant_id).await?;
        Ok(valuation(&tools, &loans))
    }

    pub async fn value_buckets(&self, tenant_id: &TenantId) -> TrackerResult<Vec<ValueBucket>> {
        Ok(value_buckets(&self.all_tools(tenant_id).await?))
    }

    pub async fn brand_totals(&self, tenant_id: &TenantId) -> TrackerResult<Vec<BrandTotal>> {
        Ok(brand_totals(&self.all_tools(tenant_id).await?))
    }

    pub async fn borrower_summary(
        &self,
        tenant_id: &TenantId,
    ) -> TrackerResult<Vec<BorrowerSummary>> {
        let people = self.all_people(tenant_id).await?;
        let loans = self.all_loans(tenant_id).await?;
        Ok(borrower_summary(&people, &loans))
    }

    pub async fn inventory_overview(
        &self,
        tenant_id: &TenantId,
        today: NaiveDate,
    ) -> TrackerResult<Vec<ToolStatus>> {
        let tools = self.all_tools(tenant_id).await?;
        let people = self.all_people(tenant_id).await?;
        let loans = self.all_loans(tenant_id).await?;
        Ok(inventory_overview(&tools, &people, &loans, today))
    }

    async fn all_tools(&self, tenant_id: &TenantId) -> TrackerResult<Vec<Tool>> {
        let mut page = Pagination { offset: 0, limit: PAGE_SIZE };
        let mut items = Vec::new();
        loop {
            let result = self.tools.list(tenant_id, page.clone()).await?;
            let more = result.has_more() && !result.items.is_empty();
            items.extend(result.items);
            if !more {
                return Ok(items);
            }
            page = page.next();
        }
    }

    async fn all_people(&self, tenant_id: &TenantId) -> TrackerResult<Vec<Person>> {
        let mut page = Pagination { offset: 0, limit: PAGE_SIZE };
        let mut items = Vec::new();
        loop {
            let result = self.people.list(tenant_id, page.clone()).await?;
            let more = result.has_more() && !result.items.is_empty();
            items.extend(result.items);
            if !more {
                return Ok(items);
            }
            page = page.next();
        }
    }

    async fn all_loans(&self, tenant_id: &TenantId) -> TrackerResult<Vec<Loan>> {
        let mut page = Pagination { offset: 0, limit: PAGE_SIZE };
        let mut items = Vec::new();
        loop {
            let result = self.loans.list(tenant_id, page.clone()).await?;
            let more = result.has_more() && !result.items.is_empty();
            items.extend(result.items);
            if !more {
                return Ok(items);
            }
            page = page.next();
        }
    }
}
