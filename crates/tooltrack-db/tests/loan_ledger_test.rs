//! Integration tests for the SurrealDB loan ledger.

use std::sync::Arc;

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use surrealdb_types::SurrealValue;
use tooltrack_core::error::TrackerError;
use tooltrack_core::models::loan::{EditLoan, LendTool};
use tooltrack_core::models::person::{CreatePerson, Person};
use tooltrack_core::models::tenant::TenantId;
use tooltrack_core::models::tool::{CreateTool, Tool};
use tooltrack_core::policy;
use tooltrack_core::repository::{LoanLedger, Pagination, PersonRepository, ToolRepository};
use tooltrack_db::repository::{
    SurrealLoanRepository, SurrealPersonRepository, SurrealToolRepository,
};

struct Fixture {
    db: Surreal<Db>,
    loans: SurrealLoanRepository<Db>,
    tenant: TenantId,
    tool: Tool,
    person: Person,
}

async fn setup() -> Fixture {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tooltrack_db::run_migrations(&db).await.unwrap();

    let tenant = TenantId::from("u1");
    let tool = add_tool(&db, &tenant, "Hammer").await;
    let person = add_person(&db, &tenant, "John Doe").await;

    Fixture {
        loans: SurrealLoanRepository::new(db.clone()),
        db,
        tenant,
        tool,
        person,
    }
}

async fn add_tool(db: &Surreal<Db>, tenant: &TenantId, name: &str) -> Tool {
    SurrealToolRepository::new(db.clone())
        .create(CreateTool {
            tenant_id: tenant.clone(),
            name: name.into(),
            description: String::new(),
            value: 25.0,
            image_ref: None,
            brand: None,
            model_number: None,
            serial_number: None,
        })
        .await
        .unwrap()
}

async fn add_person(db: &Surreal<Db>, tenant: &TenantId, name: &str) -> Person {
    SurrealPersonRepository::new(db.clone())
        .create(CreatePerson {
            tenant_id: tenant.clone(),
            name: name.into(),
            contact_info: String::new(),
        })
        .await
        .unwrap()
}

fn lend(f: &Fixture, lent_on: Option<&str>) -> LendTool {
    LendTool {
        tenant_id: f.tenant.clone(),
        tool_id: f.tool.id,
        person_id: f.person.id,
        lent_on: lent_on.map(String::from),
    }
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

async fn open_loans(db: &Surreal<Db>, tool: &Tool) -> u64 {
    let mut result = db
        .query(
            "SELECT count() AS total FROM loan \
             WHERE tool_id = $tool_id AND returned_on = NONE GROUP ALL",
        )
        .bind(("tool_id", tool.id.to_string()))
        .await
        .unwrap();
    let rows: Vec<CountRow> = result.take(0).unwrap();
    rows.first().map(|r| r.total).unwrap_or(0)
}

#[tokio::test]
async fn lend_then_return() {
    let f = setup().await;

    let loan = f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    assert!(loan.is_open());
    assert_eq!(loan.tenant_id, f.tenant);
    assert_eq!(loan.lent_on, policy::parse_date("2024-01-10").unwrap());

    let open = f
        .loans
        .open_loan_for_tool(&f.tenant, f.tool.id)
        .await
        .unwrap()
        .expect("tool should be on loan");
    assert_eq!(open.id, loan.id);

    let returned = f
        .loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-12".into()))
        .await
        .unwrap();
    assert_eq!(returned.id, loan.id);
    assert_eq!(returned.duration(policy::today()).days, 3);
    assert!(
        f.loans
            .open_loan_for_tool(&f.tenant, f.tool.id)
            .await
            .unwrap()
            .is_none()
    );

    // Available again.
    f.loans.lend(lend(&f, Some("2024-02-01"))).await.unwrap();
    let history = f.loans.loans_for_tool(&f.tenant, f.tool.id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].lent_on, policy::parse_date("2024-02-01").unwrap());
}

#[tokio::test]
async fn lend_defaults_to_today() {
    let f = setup().await;
    let loan = f.loans.lend(lend(&f, None)).await.unwrap();
    assert_eq!(loan.lent_on, policy::today());
}

#[tokio::test]
async fn second_lend_is_rejected() {
    let f = setup().await;
    f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();

    let err = f.loans.lend(lend(&f, Some("2024-01-11"))).await.unwrap_err();
    assert!(matches!(err, TrackerError::ToolAlreadyLent { tool_id } if tool_id == f.tool.id));
    assert_eq!(open_loans(&f.db, &f.tool).await, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_lends_have_exactly_one_winner() {
    let f = setup().await;
    let loans = Arc::new(f.loans.clone());

    let mut handles = Vec::new();
    for _ in 0..8 {
        let loans = Arc::clone(&loans);
        let input = lend(&f, Some("2024-03-01"));
        handles.push(tokio::spawn(async move { loans.lend(input).await }));
    }

    let mut won = 0;
    let mut lost = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => won += 1,
            Err(TrackerError::ToolAlreadyLent { .. }) => lost += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(lost, 7);
    assert_eq!(open_loans(&f.db, &f.tool).await, 1);
}

#[derive(Debug, SurrealValue)]
struct DanglingRow {
    total: u64,
}

/// Loans whose tool or person record no longer exists.
async fn dangling_loans(db: &Surreal<Db>) -> u64 {
    let mut result = db
        .query(
            "SELECT count() AS total FROM loan \
             WHERE record::exists(type::record('tool', tool_id)) = false \
             OR record::exists(type::record('person', person_id)) = false GROUP ALL",
        )
        .await
        .unwrap();
    let rows: Vec<DanglingRow> = result.take(0).unwrap();
    rows.first().map(|r| r.total).unwrap_or(0)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_a_person_while_lending_never_orphans_a_loan() {
    let f = setup().await;
    let people = SurrealPersonRepository::new(f.db.clone());

    for round in 0..40 {
        let tool = add_tool(&f.db, &f.tenant, &format!("Chisel {round}")).await;
        let person = add_person(&f.db, &f.tenant, &format!("Borrower {round}")).await;

        let loans = f.loans.clone();
        let input = LendTool {
            tenant_id: f.tenant.clone(),
            tool_id: tool.id,
            person_id: person.id,
            lent_on: Some("2024-05-01".into()),
        };
        let lending = tokio::spawn(async move { loans.lend(input).await });
        let people_task = people.clone();
        let tenant = f.tenant.clone();
        let deleting = tokio::spawn(async move { people_task.delete(&tenant, person.id).await });

        let lent = lending.await.unwrap();
        let deleted = deleting.await.unwrap();
        match (&lent, &deleted) {
            (Ok(_), Err(TrackerError::HasLoans { loans: 1, .. })) => {}
            (Err(TrackerError::NotFound { entity, .. }), Ok(())) if entity == "person" => {}
            other => panic!("round {round}: lend and delete disagree: {other:?}"),
        }
    }

    assert_eq!(dangling_loans(&f.db).await, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn deleting_a_tool_while_lending_never_orphans_a_loan() {
    let f = setup().await;
    let tools = SurrealToolRepository::new(f.db.clone());

    for round in 0..40 {
        let tool = add_tool(&f.db, &f.tenant, &format!("Router {round}")).await;

        let loans = f.loans.clone();
        let input = LendTool {
            tenant_id: f.tenant.clone(),
            tool_id: tool.id,
            person_id: f.person.id,
            lent_on: Some("2024-05-01".into()),
        };
        let lending = tokio::spawn(async move { loans.lend(input).await });
        let tools_task = tools.clone();
        let tenant = f.tenant.clone();
        let deleting = tokio::spawn(async move { tools_task.delete(&tenant, tool.id).await });

        let lent = lending.await.unwrap();
        let deleted = deleting.await.unwrap();
        match (&lent, &deleted) {
            (Ok(_), Err(TrackerError::ToolLentOut { .. })) => {
                f.loans
                    .return_tool(&f.tenant, tool.id, Some("2024-05-02".into()))
                    .await
                    .unwrap();
            }
            (Err(TrackerError::NotFound { entity, .. }), Ok(_)) if entity == "tool" => {}
            other => panic!("round {round}: lend and delete disagree: {other:?}"),
        }
    }

    assert_eq!(dangling_loans(&f.db).await, 0);
}

#[tokio::test]
async fn return_without_open_loan_changes_nothing() {
    let f = setup().await;

    let err = f
        .loans
        .return_tool(&f.tenant, f.tool.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::NoOpenLoan { .. }));

    f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    f.loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-10".into()))
        .await
        .unwrap();

    let err = f
        .loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-11".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::NoOpenLoan { .. }));

    let history = f.loans.loans_for_tool(&f.tenant, f.tool.id).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(
        history[0].returned_on,
        Some(policy::parse_date("2024-01-10").unwrap())
    );
}

#[tokio::test]
async fn return_before_lent_on_is_invalid() {
    let f = setup().await;
    f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();

    let err = f
        .loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-09".into()))
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidDate { .. }));
    assert_eq!(open_loans(&f.db, &f.tool).await, 1);
}

#[tokio::test]
async fn malformed_dates_are_invalid() {
    let f = setup().await;

    for raw in ["2024-13-01", "2023-02-29", "yesterday", ""] {
        let err = f.loans.lend(lend(&f, Some(raw))).await.unwrap_err();
        assert!(matches!(err, TrackerError::InvalidDate { .. }), "{raw:?}: {err}");
    }
    assert_eq!(open_loans(&f.db, &f.tool).await, 0);
}

#[tokio::test]
async fn lending_across_tenants_is_rejected() {
    let f = setup().await;
    let other = TenantId::from("u2");
    let foreign_person = add_person(&f.db, &other, "Mallory").await;

    let err = f
        .loans
        .lend(LendTool {
            person_id: foreign_person.id,
            ..lend(&f, None)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::CrossTenant { ref entity, .. } if entity == "person"));

    let err = f
        .loans
        .lend(LendTool {
            tenant_id: other.clone(),
            person_id: foreign_person.id,
            ..lend(&f, None)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::CrossTenant { ref entity, .. } if entity == "tool"));

    let err = f
        .loans
        .lend(LendTool {
            tool_id: uuid::Uuid::now_v7(),
            ..lend(&f, None)
        })
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
}

#[tokio::test]
async fn edit_loan_revalidates_dates() {
    let f = setup().await;
    let loan = f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    f.loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-15".into()))
        .await
        .unwrap();

    let edited = f
        .loans
        .edit_loan(
            &f.tenant,
            loan.id,
            EditLoan {
                lent_on: Some("2024-01-05".into()),
                returned_on: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(edited.lent_on, policy::parse_date("2024-01-05").unwrap());
    assert_eq!(edited.returned_on, Some(policy::parse_date("2024-01-15").unwrap()));

    let err = f
        .loans
        .edit_loan(
            &f.tenant,
            loan.id,
            EditLoan {
                lent_on: Some("2024-01-20".into()),
                returned_on: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::InvalidDate { .. }));

    let err = f
        .loans
        .edit_loan(&TenantId::from("u2"), loan.id, EditLoan::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
}

#[tokio::test]
async fn reopening_a_loan_respects_the_open_slot() {
    let f = setup().await;
    let first = f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    f.loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-12".into()))
        .await
        .unwrap();
    f.loans.lend(lend(&f, Some("2024-01-20"))).await.unwrap();

    let reopen = EditLoan {
        lent_on: None,
        returned_on: Some(None),
    };
    let err = f
        .loans
        .edit_loan(&f.tenant, first.id, reopen.clone())
        .await
        .unwrap_err();
    assert!(matches!(err, TrackerError::ToolAlreadyLent { .. }));
    assert_eq!(open_loans(&f.db, &f.tool).await, 1);

    f.loans
        .return_tool(&f.tenant, f.tool.id, Some("2024-01-21".into()))
        .await
        .unwrap();
    let reopened = f.loans.edit_loan(&f.tenant, first.id, reopen).await.unwrap();
    assert!(reopened.is_open());
    assert_eq!(open_loans(&f.db, &f.tool).await, 1);
}

#[tokio::test]
async fn loan_reads_are_tenant_scoped() {
    let f = setup().await;
    let loan = f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    let other = TenantId::from("u2");

    let err = f.loans.get_by_id(&other, loan.id).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
    assert!(
        f.loans
            .open_loan_for_tool(&other, f.tool.id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(f.loans.loans_for_person(&other, f.person.id).await.unwrap().is_empty());
    assert_eq!(f.loans.list(&other, Pagination::default()).await.unwrap().total, 0);

    let mine = f.loans.loans_for_person(&f.tenant, f.person.id).await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(f.loans.list(&f.tenant, Pagination::default()).await.unwrap().total, 1);
}

#[tokio::test]
async fn tools_are_lent_independently() {
    let f = setup().await;
    let saw = add_tool(&f.db, &f.tenant, "Saw").await;

    f.loans.lend(lend(&f, Some("2024-01-10"))).await.unwrap();
    f.loans
        .lend(LendTool {
            tool_id: saw.id,
            ..lend(&f, Some("2024-01-10"))
        })
        .await
        .unwrap();

    assert_eq!(open_loans(&f.db, &f.tool).await, 1);
    assert_eq!(open_loans(&f.db, &saw).await, 1);
}
