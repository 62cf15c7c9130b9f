//! Integration tests for tenant reports loaded from SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tooltrack_core::models::loan::LendTool;
use tooltrack_core::models::person::{CreatePerson, Person};
use tooltrack_core::models::tenant::TenantId;
use tooltrack_core::models::tool::{CreateTool, Tool};
use tooltrack_core::policy;
use tooltrack_core::report::{Availability, ReportService};
use tooltrack_core::repository::{LoanLedger, PersonRepository, ToolRepository};
use tooltrack_db::repository::{
    SurrealLoanRepository, SurrealPersonRepository, SurrealToolRepository,
};

type Reports = ReportService<
    SurrealToolRepository<Db>,
    SurrealPersonRepository<Db>,
    SurrealLoanRepository<Db>,
>;

struct Fixture {
    tools: SurrealToolRepository<Db>,
    people: SurrealPersonRepository<Db>,
    loans: SurrealLoanRepository<Db>,
    reports: Reports,
    tenant: TenantId,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tooltrack_db::run_migrations(&db).await.unwrap();

    let tools = SurrealToolRepository::new(db.clone());
    let people = SurrealPersonRepository::new(db.clone());
    let loans = SurrealLoanRepository::new(db);
    Fixture {
        reports: ReportService::new(tools.clone(), people.clone(), loans.clone()),
        tools,
        people,
        loans,
        tenant: TenantId::from("u1"),
    }
}

impl Fixture {
    async fn tool(&self, tenant: &TenantId, name: &str, value: f64, brand: Option<&str>) -> Tool {
        self.tools
            .create(CreateTool {
                tenant_id: tenant.clone(),
                name: name.into(),
                description: String::new(),
                value,
                image_ref: None,
                brand: brand.map(Into::into),
                model_number: None,
                serial_number: None,
            })
            .await
            .unwrap()
    }

    async fn person(&self, tenant: &TenantId, name: &str) -> Person {
        self.people
            .create(CreatePerson {
                tenant_id: tenant.clone(),
                name: name.into(),
                contact_info: String::new(),
            })
            .await
            .unwrap()
    }

    async fn lend(&self, tool: &Tool, person: &Person, lent_on: &str) {
        self.loans
            .lend(LendTool {
                tenant_id: tool.tenant_id.clone(),
                tool_id: tool.id,
                person_id: person.id,
                lent_on: Some(lent_on.into()),
            })
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn overdue_lists_only_old_open_loans() {
    let f = setup().await;
    let today = policy::parse_date("2024-03-01").unwrap();

    let old = f.tool(&f.tenant, "Old drill", 10.0, None).await;
    let fresh = f.tool(&f.tenant, "New drill", 10.0, None).await;
    let ann = f.person(&f.tenant, "Ann").await;

    // 2024-01-30 is 31 days before 2024-03-01.
    f.lend(&old, &ann, "2024-01-30").await;
    f.lend(&fresh, &ann, "2024-02-15").await;

    let overdue = f.reports.overdue(&f.tenant, today).await.unwrap();
    assert_eq!(overdue.len(), 1);
    assert_eq!(overdue[0].tool_name, "Old drill");
    assert_eq!(overdue[0].person_name, "Ann");
    assert_eq!(overdue[0].days_out, 32);
}

#[tokio::test]
async fn valuation_splits_lent_and_available_value() {
    let f = setup().await;
    let saw = f.tool(&f.tenant, "Saw", 100.0, Some("Makita")).await;
    f.tool(&f.tenant, "Level", 25.5, None).await;
    let bob = f.person(&f.tenant, "Bob").await;
    f.lend(&saw, &bob, "2024-01-01").await;

    // Another tenant's inventory never leaks in.
    let other = TenantId::from("u2");
    f.tool(&other, "Crane", 90_000.0, None).await;

    let valuation = f.reports.valuation(&f.tenant).await.unwrap();
    assert_eq!(valuation.tool_count, 2);
    assert_eq!(valuation.total_value, 125.5);
    assert_eq!(valuation.on_loan_count, 1);
    assert_eq!(valuation.on_loan_value, 100.0);
    assert_eq!(valuation.available_value, 25.5);
}

#[tokio::test]
async fn value_buckets_and_brand_totals() {
    let f = setup().await;
    f.tool(&f.tenant, "Clamp", 12.0, Some("Bessey")).await;
    f.tool(&f.tenant, "Router", 320.0, Some("makita")).await;
    f.tool(&f.tenant, "Drill", 180.0, Some("Makita")).await;
    f.tool(&f.tenant, "Table saw", 1500.0, None).await;

    let buckets = f.reports.value_buckets(&f.tenant).await.unwrap();
    let counts: Vec<u64> = buckets.iter().map(|b| b.tool_count).collect();
    assert_eq!(counts, vec![1, 0, 1, 1, 0, 1]);

    let brands = f.reports.brand_totals(&f.tenant).await.unwrap();
    let rows: Vec<(&str, u64, f64)> = brands
        .iter()
        .map(|b| (b.brand.as_str(), b.tool_count, b.total_value))
        .collect();
    assert_eq!(rows[0], ("Unbranded", 1, 1500.0));
    assert_eq!(rows[1].1, 2);
    assert_eq!(rows[1].2, 500.0);
    assert_eq!(rows[2], ("Bessey", 1, 12.0));
}

#[tokio::test]
async fn borrower_summary_counts_active_and_total_loans() {
    let f = setup().await;
    let hammer = f.tool(&f.tenant, "Hammer", 15.0, None).await;
    let wrench = f.tool(&f.tenant, "Wrench", 20.0, None).await;
    let ann = f.person(&f.tenant, "Ann").await;
    let cid = f.person(&f.tenant, "Cid").await;

    f.lend(&hammer, &ann, "2024-01-01").await;
    f.loans
        .return_tool(&f.tenant, hammer.id, Some("2024-01-02".into()))
        .await
        .unwrap();
    f.lend(&hammer, &ann, "2024-01-05").await;
    f.lend(&wrench, &cid, "2024-01-05").await;

    let summary = f.reports.borrower_summary(&f.tenant).await.unwrap();
    let rows: Vec<(&str, u64, u64)> = summary
        .iter()
        .map(|s| (s.name.as_str(), s.active_loans, s.total_loans))
        .collect();
    assert_eq!(rows, vec![("Ann", 1, 2), ("Cid", 1, 1)]);
}

#[tokio::test]
async fn inventory_overview_shows_current_borrower() {
    let f = setup().await;
    let today = policy::parse_date("2024-01-10").unwrap();
    let lent = f.tool(&f.tenant, "Jigsaw", 60.0, None).await;
    let idle = f.tool(&f.tenant, "Plane", 45.0, None).await;
    let eve = f.person(&f.tenant, "Eve").await;
    f.lend(&lent, &eve, "2024-01-08").await;

    let overview = f.reports.inventory_overview(&f.tenant, today).await.unwrap();
    assert_eq!(overview.len(), 2);

    let status = |id| {
        overview
            .iter()
            .find(|s| s.tool.id == id)
            .map(|s| s.availability.clone())
            .unwrap()
    };
    assert_eq!(status(idle.id), Availability::Available);
    match status(lent.id) {
        Availability::OnLoan {
            person_name,
            days_out,
            overdue,
            ..
        } => {
            assert_eq!(person_name, "Eve");
            assert_eq!(days_out, 3);
            assert!(!overdue);
        }
        other => panic!("expected OnLoan, got {other:?}"),
    }
}
