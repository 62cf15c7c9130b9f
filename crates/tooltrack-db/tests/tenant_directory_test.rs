//! Integration tests for the SurrealDB tenant directory.

use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use tooltrack_core::error::TrackerError;
use tooltrack_core::models::tenant::{RecordLogin, TenantId};
use tooltrack_core::repository::{Pagination, TenantDirectory};
use tooltrack_db::repository::SurrealTenantDirectory;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    tooltrack_db::run_migrations(&db).await.unwrap();
    db
}

fn login(id: &str, name: &str) -> RecordLogin {
    RecordLogin {
        id: TenantId::from(id),
        email: format!("{id}@example.com"),
        display_name: name.into(),
        picture: None,
    }
}

#[tokio::test]
async fn record_login_creates_then_refreshes() {
    let db = setup().await;
    let directory = SurrealTenantDirectory::new(db);

    let first = directory.record_login(login("sub-1", "Ada")).await.unwrap();
    assert_eq!(first.id.as_str(), "sub-1");
    assert_eq!(first.display_name, "Ada");

    let second = directory
        .record_login(RecordLogin {
            picture: Some("https://example.com/ada.png".into()),
            ..login("sub-1", "Ada Lovelace")
        })
        .await
        .unwrap();
    assert_eq!(second.display_name, "Ada Lovelace");
    assert_eq!(second.picture.as_deref(), Some("https://example.com/ada.png"));
    assert_eq!(second.created_at, first.created_at);
    assert!(second.last_login >= first.last_login);

    let page = directory.list(Pagination::default()).await.unwrap();
    assert_eq!(page.total, 1);
}

#[tokio::test]
async fn earliest_tenant_is_the_first_to_log_in() {
    let db = setup().await;
    let directory = SurrealTenantDirectory::new(db);

    assert!(directory.earliest().await.unwrap().is_none());

    directory.record_login(login("first", "First")).await.unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    directory.record_login(login("second", "Second")).await.unwrap();
    directory.record_login(login("first", "First again")).await.unwrap();

    let earliest = directory.earliest().await.unwrap().expect("a tenant exists");
    assert_eq!(earliest.id.as_str(), "first");
}

#[tokio::test]
async fn unknown_tenant_is_not_found() {
    let db = setup().await;
    let directory = SurrealTenantDirectory::new(db);

    let err = directory.get(&TenantId::from("nobody")).await.unwrap_err();
    assert!(matches!(err, TrackerError::NotFound { .. }));
}
