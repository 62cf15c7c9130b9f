//! SurrealDB implementation of [`PersonRepository`].
//!
//! Name uniqueness per tenant is enforced by the composite unique index
//! `idx_person_tenant_name`; a violation surfaces from the `CREATE` or
//! `UPDATE` statement itself and is mapped to `DuplicateName`.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tooltrack_core::error::{TrackerError, TrackerResult};
use tooltrack_core::models::person::{CreatePerson, Person, UpdatePerson};
use tooltrack_core::models::tenant::TenantId;
use tooltrack_core::repository::{PaginatedResult, Pagination, PersonRepository};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{
    DbError, MAX_CONFLICT_RETRIES, TxFailure, conflict_backoff, is_retryable_conflict,
    is_unique_violation,
};
use crate::schema::PERSON_NAME_INDEX;

// The guard and the delete share a transaction; `lend` writes the
// person record in its own, so the two cannot both commit.
const DELETE_TX: &str = "\
BEGIN TRANSACTION;
IF (SELECT VALUE tenant_id FROM type::record('person', $id))[0] != $tenant_id {
    THROW 'delete_person:missing'
};
IF count(SELECT id FROM loan WHERE person_id = $id) > 0 {
    THROW 'delete_person:has_loans'
};
DELETE type::record('person', $id) RETURN NONE;
COMMIT TRANSACTION;
";

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct PersonRow {
    tenant_id: String,
    name: String,
    contact_info: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PersonRow {
    fn into_person(self, id: Uuid) -> Person {
        Person {
            id,
            tenant_id: TenantId::new(self.tenant_id),
            name: self.name,
            contact_info: self.contact_info.unwrap_or_default(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct PersonRowWithId {
    record_id: String,
    tenant_id: String,
    name: String,
    contact_info: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PersonRowWithId {
    fn try_into_person(self) -> Result<Person, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::decode("person", format!("invalid UUID: {e}")))?;
        Ok(PersonRow {
            tenant_id: self.tenant_id,
            name: self.name,
            contact_info: self.contact_info,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
        .into_person(id))
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn normalize_name(name: &str) -> TrackerResult<String> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(TrackerError::validation("person name must not be empty"));
    }
    Ok(trimmed.to_string())
}

/// SurrealDB implementation of the Person repository.
#[derive(Clone)]
pub struct SurrealPersonRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealPersonRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn loan_count(&self, id_str: &str) -> Result<u64, DbError> {
        let mut result = self
            .db
            .query("SELECT count() AS total FROM loan WHERE person_id = $person_id GROUP ALL")
            .bind(("person_id", id_str.to_string()))
            .await?;
        let rows: Vec<CountRow> = result.take(0)?;
        Ok(rows.first().map(|r| r.total).unwrap_or(0))
    }
}

impl<C: Connection> PersonRepository for SurrealPersonRepository<C> {
    async fn create(&self, input: CreatePerson) -> TrackerResult<Person> {
        let name = normalize_name(&input.name)?;
        let id = Uuid::now_v7();
        let id_str = id.to_string();

        let mut attempt = 0;
        let mut result = loop {
            let outcome = self
                .db
                .query(
                    "CREATE type::record('person', $id) SET \
                     tenant_id = $tenant_id, name = $name, \
                     contact_info = $contact_info",
                )
                .bind(("id", id_str.clone()))
                .bind(("tenant_id", input.tenant_id.as_str().to_string()))
                .bind(("name", name.clone()))
                .bind(("contact_info", input.contact_info.clone()))
                .await
                .and_then(|response| response.check());

            match outcome {
                Ok(result) => break result,
                Err(e) if is_unique_violation(&e, PERSON_NAME_INDEX) => {
                    return Err(TrackerError::DuplicateName { name });
                }
                Err(e) if is_retryable_conflict(&e) && attempt < MAX_CONFLICT_RETRIES => {
                    attempt += 1;
                    conflict_backoff(attempt).await;
                }
                Err(e) => return Err(DbError::from(e).into()),
            }
        };

        let rows: Vec<PersonRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "person".into(),
            id: id_str,
        })?;

        debug!(person_id = %id, tenant_id = %input.tenant_id, "Created person");
        Ok(row.into_person(id))
    }

    async fn get_by_id(&self, tenant_id: &TenantId, id: Uuid) -> TrackerResult<Person> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('person', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.as_str().to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PersonRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "person".into(),
            id: id_str,
        })?;

        Ok(row.into_person(id))
    }

    async fn find_by_name(
        &self,
        tenant_id: &TenantId,
        name: &str,
    ) -> TrackerResult<Option<Person>> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM person \
                 WHERE tenant_id = $tenant_id AND name = $name LIMIT 1",
            )
            .bind(("tenant_id", tenant_id.as_str().to_string()))
            .bind(("name", name.trim().to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PersonRowWithId> = result.take(0).map_err(DbError::from)?;
        match rows.into_iter().next() {
            Some(row) => Ok(Some(row.try_into_person()?)),
            None => Ok(None),
        }
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        input: UpdatePerson,
    ) -> TrackerResult<Person> {
        let name = input.name.as_deref().map(normalize_name).transpose()?;
        let id_str = id.to_string();

        let mut sets = Vec::new();
        if name.is_some() {
            sets.push("name = $name");
        }
        if input.contact_info.is_some() {
            sets.push("contact_info = $contact_info");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('person', $id) SET {} \
             WHERE tenant_id = $tenant_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.as_str().to_string()));

        if let Some(name) = &name {
            builder = builder.bind(("name", name.clone()));
        }
        if let Some(contact_info) = input.contact_info {
            builder = builder.bind(("contact_info", contact_info));
        }

        let outcome = builder.await.and_then(|response| response.check());
        let mut result = match outcome {
            Ok(result) => result,
            Err(e) if is_unique_violation(&e, PERSON_NAME_INDEX) => {
                return Err(TrackerError::DuplicateName {
                    name: name.unwrap_or_default(),
                });
            }
            Err(e) => return Err(DbError::from(e).into()),
        };

        let rows: Vec<PersonRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "person".into(),
            id: id_str,
        })?;

        Ok(row.into_person(id))
    }

    async fn delete(&self, tenant_id: &TenantId, id: Uuid) -> TrackerResult<()> {
        let id_str = id.to_string();

        let mut attempt = 0;
        loop {
            let outcome = self
                .db
                .query(DELETE_TX)
                .bind(("id", id_str.clone()))
                .bind(("tenant_id", tenant_id.as_str().to_string()))
                .await;

            let failure = match TxFailure::check(outcome) {
                Ok(_) => break,
                Err(failure) => failure,
            };
            if failure.thrown("delete_person:missing") {
                return Err(TrackerError::not_found("person", id));
            }
            if failure.thrown("delete_person:has_loans") {
                let loans = self.loan_count(&id_str).await?;
                warn!(person_id = %id, loans, "Refusing to delete person with loan history");
                return Err(TrackerError::HasLoans {
                    person_id: id,
                    loans,
                });
            }
            if failure.is_retryable() && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                conflict_backoff(attempt).await;
                continue;
            }
            return Err(DbError::from(failure).into());
        }

        debug!(person_id = %id, tenant_id = %tenant_id, "Deleted person");
        Ok(())
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> TrackerResult<PaginatedResult<Person>> {
        let tenant_id_str = tenant_id.as_str().to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM person \
                 WHERE tenant_id = $tenant_id GROUP ALL",
            )
            .bind(("tenant_id", tenant_id_str.clone()))
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM person \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY name ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<PersonRowWithId> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_person())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
