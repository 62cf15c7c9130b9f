//! SurrealDB implementation of [`TenantDirectory`].
//!
//! Tenant records are keyed by the identifier issued by the identity
//! provider, so `record_login` is a plain upsert.

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tooltrack_core::error::TrackerResult;
use tooltrack_core::models::tenant::{RecordLogin, Tenant, TenantId};
use tooltrack_core::repository::{PaginatedResult, Pagination, TenantDirectory};

use crate::error::DbError;

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct TenantRowWithId {
    record_id: String,
    email: String,
    display_name: String,
    picture: Option<String>,
    created_at: DateTime<Utc>,
    last_login: DateTime<Utc>,
}

impl TenantRowWithId {
    fn into_tenant(self) -> Tenant {
        Tenant {
            id: TenantId::new(self.record_id),
            email: self.email,
            display_name: self.display_name,
            picture: self.picture,
            created_at: self.created_at,
            last_login: self.last_login,
        }
    }
}

/// Creation stamp of a tenant, used to pick the default tenant.
#[derive(Debug, SurrealValue)]
struct TenantStamp {
    record_id: String,
    created_at: DateTime<Utc>,
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// Id of the earliest-created tenant, ties broken by ascending id.
pub(crate) async fn earliest_tenant_id<C: Connection>(
    db: &Surreal<C>,
) -> Result<Option<String>, DbError> {
    let mut result = db
        .query("SELECT meta::id(id) AS record_id, created_at FROM tenant")
        .await?;
    let stamps: Vec<TenantStamp> = result.take(0)?;
    Ok(stamps
        .into_iter()
        .min_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.record_id.cmp(&b.record_id))
        })
        .map(|s| s.record_id))
}

/// Ids of every tenant in the directory.
pub(crate) async fn known_tenant_ids<C: Connection>(
    db: &Surreal<C>,
) -> Result<Vec<String>, DbError> {
    let mut result = db
        .query("SELECT meta::id(id) AS record_id, created_at FROM tenant")
        .await?;
    let stamps: Vec<TenantStamp> = result.take(0)?;
    Ok(stamps.into_iter().map(|s| s.record_id).collect())
}

/// SurrealDB implementation of the tenant directory.
#[derive(Clone)]
pub struct SurrealTenantDirectory<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealTenantDirectory<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> TenantDirectory for SurrealTenantDirectory<C> {
    async fn record_login(&self, input: RecordLogin) -> TrackerResult<Tenant> {
        let id_str = input.id.as_str().to_string();

        let result = self
            .db
            .query(
                "UPSERT type::record('tenant', $id) SET \
                 email = $email, display_name = $display_name, \
                 picture = $picture, last_login = time::now(); \
                 SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id);",
            )
            .bind(("id", id_str.clone()))
            .bind(("email", input.email))
            .bind(("display_name", input.display_name))
            .bind(("picture", input.picture))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(DbError::from)?;

        // Statement 0 is the UPSERT, statement 1 re-reads with the id.
        let rows: Vec<TenantRowWithId> = result.take(1).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;

        Ok(row.into_tenant())
    }

    async fn get(&self, id: &TenantId) -> TrackerResult<Tenant> {
        let id_str = id.as_str().to_string();

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * \
                 FROM type::record('tenant', $id)",
            )
            .bind(("id", id_str.clone()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tenant".into(),
            id: id_str,
        })?;

        Ok(row.into_tenant())
    }

    async fn list(&self, pagination: Pagination) -> TrackerResult<PaginatedResult<Tenant>> {
        let mut count_result = self
            .db
            .query("SELECT count() AS total FROM tenant GROUP ALL")
            .await
            .map_err(DbError::from)?;
        let count_rows: Vec<CountRow> = count_result.take(0).map_err(DbError::from)?;
        let total = count_rows.first().map(|r| r.total).unwrap_or(0);

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, * FROM tenant \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<TenantRowWithId> = result.take(0).map_err(DbError::from)?;

        Ok(PaginatedResult {
            items: rows.into_iter().map(TenantRowWithId::into_tenant).collect(),
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }

    async fn earliest(&self) -> TrackerResult<Option<Tenant>> {
        match earliest_tenant_id(&self.db).await? {
            Some(id) => Ok(Some(self.get(&TenantId::new(id)).await?)),
            None => Ok(None),
        }
    }
}
