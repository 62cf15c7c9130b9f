//! SurrealDB implementation of [`ToolRepository`].

use chrono::{DateTime, Utc};
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tooltrack_core::error::{TrackerError, TrackerResult};
use tooltrack_core::models::tenant::TenantId;
use tooltrack_core::models::tool::{CreateTool, Tool, UpdateTool, validate_value};
use tooltrack_core::repository::{PaginatedResult, Pagination, ToolRepository};
use tracing::debug;
use uuid::Uuid;

use crate::error::{DbError, MAX_CONFLICT_RETRIES, TxFailure, conflict_backoff};

// `lend` writes the tool record in its own transaction, so a lend and
// this delete cannot both commit.
const DELETE_TX: &str = "\
BEGIN TRANSACTION;
IF (SELECT VALUE tenant_id FROM type::record('tool', $id))[0] != $tenant_id {
    THROW 'delete_tool:missing'
};
IF count(SELECT id FROM loan WHERE tool_id = $id AND returned_on = NONE) > 0 {
    THROW 'delete_tool:lent_out'
};
DELETE type::record('tool', $id) RETURN BEFORE;
COMMIT TRANSACTION;
";

/// Result slot of the `DELETE` in [`DELETE_TX`]; `BEGIN` takes slot 0.
const DELETED_ROW: usize = 3;

/// DB-side row struct for queries where the UUID is already known.
#[derive(Debug, SurrealValue)]
struct ToolRow {
    tenant_id: String,
    name: String,
    description: Option<String>,
    estimated_value: f64,
    image_ref: Option<String>,
    brand: Option<String>,
    model_number: Option<String>,
    serial_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ToolRow {
    fn into_tool(self, id: Uuid) -> Tool {
        Tool {
            id,
            tenant_id: TenantId::new(self.tenant_id),
            name: self.name,
            description: self.description.unwrap_or_default(),
            value: self.estimated_value,
            image_ref: self.image_ref,
            brand: self.brand,
            model_number: self.model_number,
            serial_number: self.serial_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// DB-side row struct that includes the record ID via `meta::id(id)`.
#[derive(Debug, SurrealValue)]
struct ToolRowWithId {
    record_id: String,
    tenant_id: String,
    name: String,
    description: Option<String>,
    estimated_value: f64,
    image_ref: Option<String>,
    brand: Option<String>,
    model_number: Option<String>,
    serial_number: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ToolRowWithId {
    fn try_into_tool(self) -> Result<Tool, DbError> {
        let id = Uuid::parse_str(&self.record_id)
            .map_err(|e| DbError::decode("tool", format!("invalid UUID: {e}")))?;
        Ok(Tool {
            id,
            tenant_id: TenantId::new(self.tenant_id),
            name: self.name,
            description: self.description.unwrap_or_default(),
            value: self.estimated_value,
            image_ref: self.image_ref,
            brand: self.brand,
            model_number: self.model_number,
            serial_number: self.serial_number,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Row struct for count queries.
#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

fn check_value(value: f64) -> TrackerResult<()> {
    validate_value(value).map_err(TrackerError::validation)
}

fn check_name(name: &str) -> TrackerResult<()> {
    if name.trim().is_empty() {
        return Err(TrackerError::validation("tool name must not be empty"));
    }
    Ok(())
}

/// SurrealDB implementation of the Tool repository.
#[derive(Clone)]
pub struct SurrealToolRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealToolRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> ToolRepository for SurrealToolRepository<C> {
    async fn create(&self, input: CreateTool) -> TrackerResult<Tool> {
        check_name(&input.name)?;
        check_value(input.value)?;

        let id = Uuid::now_v7();
        let id_str = id.to_string();

        let result = self
            .db
            .query(
                "CREATE type::record('tool', $id) SET \
                 tenant_id = $tenant_id, name = $name, \
                 description = $description, \
                 estimated_value = $estimated_value, \
                 image_ref = $image_ref, brand = $brand, \
                 model_number = $model_number, \
                 serial_number = $serial_number",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", input.tenant_id.as_str().to_string()))
            .bind(("name", input.name.trim().to_string()))
            .bind(("description", input.description))
            .bind(("estimated_value", input.value))
            .bind(("image_ref", input.image_ref))
            .bind(("brand", input.brand))
            .bind(("model_number", input.model_number))
            .bind(("serial_number", input.serial_number))
            .await
            .map_err(DbError::from)?;

        let mut result = result
            .check()
            .map_err(DbError::from)?;

        let rows: Vec<ToolRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tool".into(),
            id: id_str,
        })?;

        debug!(tool_id = %id, tenant_id = %input.tenant_id, "Created tool");
        Ok(row.into_tool(id))
    }

    async fn get_by_id(&self, tenant_id: &TenantId, id: Uuid) -> TrackerResult<Tool> {
        let id_str = id.to_string();

        let mut result = self
            .db
            .query(
                "SELECT * FROM type::record('tool', $id) \
                 WHERE tenant_id = $tenant_id",
            )
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.as_str().to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ToolRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tool".into(),
            id: id_str,
        })?;

        Ok(row.into_tool(id))
    }

    async fn update(
        &self,
        tenant_id: &TenantId,
        id: Uuid,
        input: UpdateTool,
    ) -> TrackerResult<Tool> {
        if let Some(name) = &input.name {
            check_name(name)?;
        }
        if let Some(value) = input.value {
            check_value(value)?;
        }

        let id_str = id.to_string();

        let mut sets = Vec::new();
        if input.name.is_some() {
            sets.push("name = $name");
        }
        if input.description.is_some() {
            sets.push("description = $description");
        }
        if input.value.is_some() {
            sets.push("estimated_value = $estimated_value");
        }
        if input.image_ref.is_some() {
            sets.push("image_ref = $image_ref");
        }
        if input.brand.is_some() {
            sets.push("brand = $brand");
        }
        if input.model_number.is_some() {
            sets.push("model_number = $model_number");
        }
        if input.serial_number.is_some() {
            sets.push("serial_number = $serial_number");
        }
        sets.push("updated_at = time::now()");

        let query = format!(
            "UPDATE type::record('tool', $id) SET {} \
             WHERE tenant_id = $tenant_id",
            sets.join(", ")
        );

        let mut builder = self
            .db
            .query(&query)
            .bind(("id", id_str.clone()))
            .bind(("tenant_id", tenant_id.as_str().to_string()));

        if let Some(name) = input.name {
            builder = builder.bind(("name", name.trim().to_string()));
        }
        if let Some(description) = input.description {
            builder = builder.bind(("description", description));
        }
        if let Some(value) = input.value {
            builder = builder.bind(("estimated_value", value));
        }
        // Option<Option<String>>: Some(Some(v)) = set, Some(None) = clear.
        if let Some(image_ref) = input.image_ref {
            builder = builder.bind(("image_ref", image_ref));
        }
        if let Some(brand) = input.brand {
            builder = builder.bind(("brand", brand));
        }
        if let Some(model_number) = input.model_number {
            builder = builder.bind(("model_number", model_number));
        }
        if let Some(serial_number) = input.serial_number {
            builder = builder.bind(("serial_number", serial_number));
        }

        let result = builder.await.map_err(DbError::from)?;
        let mut result = result
            .check()
            .map_err(DbError::from)?;

        let rows: Vec<ToolRow> = result.take(0).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tool".into(),
            id: id_str,
        })?;

        Ok(row.into_tool(id))
    }

    async fn delete(&self, tenant_id: &TenantId, id: Uuid) -> TrackerResult<Tool> {
        let id_str = id.to_string();

        let mut attempt = 0;
        let mut result = loop {
            let outcome = self
                .db
                .query(DELETE_TX)
                .bind(("id", id_str.clone()))
                .bind(("tenant_id", tenant_id.as_str().to_string()))
                .await;

            let failure = match TxFailure::check(outcome) {
                Ok(result) => break result,
                Err(failure) => failure,
            };
            if failure.thrown("delete_tool:missing") {
                return Err(TrackerError::not_found("tool", id));
            }
            if failure.thrown("delete_tool:lent_out") {
                return Err(TrackerError::ToolLentOut { tool_id: id });
            }
            if failure.is_retryable() && attempt < MAX_CONFLICT_RETRIES {
                attempt += 1;
                conflict_backoff(attempt).await;
                continue;
            }
            return Err(DbError::from(failure).into());
        };

        let rows: Vec<ToolRow> = result.take(DELETED_ROW).map_err(DbError::from)?;
        let row = rows.into_iter().next().ok_or_else(|| DbError::NotFound {
            entity: "tool".into(),
            id: id_str,
        })?;

        debug!(tool_id = %id, tenant_id = %tenant_id, "Deleted tool");
        Ok(row.into_tool(id))
    }

    async fn list(
        &self,
        tenant_id: &TenantId,
        pagination: Pagination,
    ) -> TrackerResult<PaginatedResult<Tool>> {
        let tenant_id_str = tenant_id.as_str().to_string();

        let mut count_result = self
            .db
            .query(
                "SELECT count() AS total FROM tool \
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
                "SELECT meta::id(id) AS record_id, * FROM tool \
                 WHERE tenant_id = $tenant_id \
                 ORDER BY created_at ASC \
                 LIMIT $limit START $offset",
            )
            .bind(("tenant_id", tenant_id_str))
            .bind(("limit", pagination.limit))
            .bind(("offset", pagination.offset))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ToolRowWithId> = result.take(0).map_err(DbError::from)?;

        let items = rows
            .into_iter()
            .map(|row| row.try_into_tool())
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(PaginatedResult {
            items,
            total,
            offset: pagination.offset,
            limit: pagination.limit,
        })
    }
}
