//! Schema definitions and migration runner for SurrealDB.
//!
//! Migrations are applied once and recorded in `_migration`. Version 1
//! defines the tables in a shape that also accepts rows written before
//! tenants existed; version 2 ([`crate::tenant_scope`]) assigns those
//! rows to a tenant and switches `person` name uniqueness from global
//! to per-tenant. Version 3 adds the `lend_count` counters that lending
//! bumps and deletion races against.

use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;

use crate::error::DbError;
use crate::tenant_scope;

/// Composite `(tenant_id, name)` unique index on `person`.
pub(crate) const PERSON_NAME_INDEX: &str = "idx_person_tenant_name";

/// Unique index on `loan.open_slot`: an open loan stores its tool id
/// there, a closed loan a key derived from its own id.
pub(crate) const LOAN_OPEN_SLOT_INDEX: &str = "idx_loan_open_slot";

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

#[derive(Debug, SurrealValue)]
struct MigrationRecord {
    version: u32,
    #[allow(dead_code)]
    name: String,
}

enum MigrationStep {
    Sql(&'static str),
    TenantScope,
}

struct Migration {
    version: u32,
    name: &'static str,
    step: MigrationStep,
}

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "inventory_schema",
        step: MigrationStep::Sql(SCHEMA_V1),
    },
    Migration {
        version: 2,
        name: "tenant_scoped_person_names",
        step: MigrationStep::TenantScope,
    },
    Migration {
        version: 3,
        name: "lend_counters",
        step: MigrationStep::Sql(SCHEMA_V3),
    },
];

// -----------------------------------------------------------------------
// Schema v1: tables, tolerant of pre-tenant rows
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Tenants (global scope, written by the identity collaborator)
-- =======================================================================
DEFINE TABLE IF NOT EXISTS tenant SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS email ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS display_name ON TABLE tenant TYPE string;
DEFINE FIELD IF NOT EXISTS picture ON TABLE tenant TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS last_login ON TABLE tenant TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_tenant_created ON TABLE tenant \
    COLUMNS created_at;

-- =======================================================================
-- Tools (tenant scope)
-- =======================================================================
DEFINE TABLE IF NOT EXISTS tool SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS tenant_id ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS name ON TABLE tool TYPE string;
DEFINE FIELD IF NOT EXISTS description ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS estimated_value ON TABLE tool TYPE float \
    ASSERT $value >= 0;
DEFINE FIELD IF NOT EXISTS image_ref ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS brand ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS model_number ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS serial_number ON TABLE tool TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE tool TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE tool TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_tool_tenant ON TABLE tool \
    COLUMNS tenant_id;

-- =======================================================================
-- People (tenant scope)
-- =======================================================================
DEFINE TABLE IF NOT EXISTS person SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS tenant_id ON TABLE person TYPE option<string>;
DEFINE FIELD IF NOT EXISTS name ON TABLE person TYPE string;
DEFINE FIELD IF NOT EXISTS contact_info ON TABLE person TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE person TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD IF NOT EXISTS updated_at ON TABLE person TYPE datetime \
    DEFAULT time::now();

-- =======================================================================
-- Loans (tenant scope, never deleted)
-- =======================================================================
DEFINE TABLE IF NOT EXISTS loan SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS tenant_id ON TABLE loan TYPE option<string>;
DEFINE FIELD IF NOT EXISTS tool_id ON TABLE loan TYPE string;
DEFINE FIELD IF NOT EXISTS person_id ON TABLE loan TYPE string;
DEFINE FIELD IF NOT EXISTS lent_on ON TABLE loan TYPE string;
DEFINE FIELD IF NOT EXISTS returned_on ON TABLE loan TYPE option<string>;
DEFINE FIELD IF NOT EXISTS open_slot ON TABLE loan TYPE option<string>;
DEFINE FIELD IF NOT EXISTS created_at ON TABLE loan TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_loan_tenant_tool ON TABLE loan \
    COLUMNS tenant_id, tool_id;
DEFINE INDEX IF NOT EXISTS idx_loan_person ON TABLE loan \
    COLUMNS person_id;
";

// -----------------------------------------------------------------------
// Schema v3: loans opened per tool and per person
// -----------------------------------------------------------------------

const SCHEMA_V3: &str = "\
DEFINE FIELD IF NOT EXISTS lend_count ON TABLE tool TYPE option<int>;
DEFINE FIELD IF NOT EXISTS lend_count ON TABLE person TYPE option<int>;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Run all pending migrations against the given SurrealDB client.
///
/// Creates a `_migration` tracking table on first run, then applies
/// each migration whose version exceeds the current maximum and records
/// it. A [`DbError::Integrity`] from the tenant-scope step is returned
/// unchanged so that callers can refuse to start.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    // Ensure migration tracking table exists (idempotent).
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let current_version = current_version(db).await?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );

        match migration.step {
            MigrationStep::Sql(sql) => {
                db.query(sql).await?.check().map_err(|e| {
                    DbError::Migration(format!(
                        "Migration v{} '{}' failed: {}",
                        migration.version, migration.name, e,
                    ))
                })?;
            }
            MigrationStep::TenantScope => {
                let report = tenant_scope::migrate(db).await?;
                info!(
                    version = migration.version,
                    removed_indexes = ?report.removed_indexes,
                    default_tenant = ?report.default_tenant,
                    people_assigned = report.people_assigned,
                    people_renamed = report.people_renamed.len(),
                    tools_assigned = report.tools_assigned,
                    loans_assigned = report.loans_assigned,
                    loan_slots_backfilled = report.loan_slots_backfilled,
                    "Tenant-scope migration finished"
                );
            }
        }

        // Record the applied migration.
        db.query(
            "CREATE _migration SET version = $version, \
             name = $name",
        )
        .bind(("version", migration.version))
        .bind(("name", migration.name))
        .await?
        .check()
        .map_err(|e| {
            DbError::Migration(format!(
                "Failed to record migration v{}: {}",
                migration.version, e,
            ))
        })?;

        info!(
            version = migration.version,
            "Migration applied successfully"
        );
    }

    Ok(())
}

/// Highest recorded migration version, `0` for a store that has never
/// been migrated.
pub async fn current_version<C: Connection>(db: &Surreal<C>) -> Result<u32, DbError> {
    let mut result = db
        .query("SELECT * FROM _migration ORDER BY version DESC LIMIT 1")
        .await?;
    let records: Vec<MigrationRecord> = result.take(0)?;
    Ok(records.first().map(|m| m.version).unwrap_or(0))
}

/// Version the migration runner brings a store to.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Returns the raw table DDL of version 1.
///
/// Exposed for tests that build a store by hand.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
