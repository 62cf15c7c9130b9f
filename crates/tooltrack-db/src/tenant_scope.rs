//! Tenant-scope migration.
//!
//! Moves a store written before tenants existed onto per-tenant data:
//! the global unique index on `person.name` is dropped, rows without a
//! `tenant_id` are assigned to the earliest-created tenant (renaming
//! people whose names collide), the composite `(tenant_id, name)` and
//! loan open-slot unique indexes are built, and `tenant_id` becomes a
//! required field. Rows imported with keys that are not UUIDs (integer
//! keys from the old store, for instance) are moved onto fresh UUIDv7
//! keys, and the loan columns referencing them are rewritten.
//!
//! Running [`migrate`] on an already migrated store changes nothing.
//! Any state that cannot be migrated without losing rows is reported as
//! [`DbError::Integrity`].

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;
use surrealdb::{Connection, Surreal};
use surrealdb_types::{RecordId, RecordIdKey, SurrealValue, ToSql};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{DbError, TxFailure};
use crate::repository::loan::open_slot;
use crate::repository::tenant::{earliest_tenant_id, known_tenant_ids};
use crate::schema::{LOAN_OPEN_SLOT_INDEX, PERSON_NAME_INDEX};

const UNASSIGNED: &str = "tenant_id = NONE OR tenant_id = NULL OR tenant_id = ''";

/// A person renamed to resolve a name collision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersonRename {
    /// Record key before any re-keying.
    pub id: String,
    pub from: String,
    pub to: String,
}

/// What a run of [`migrate`] changed.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    /// Legacy single-column unique indexes removed from `person`.
    pub removed_indexes: Vec<String>,
    /// Tenant that received unassigned rows, if any were found.
    pub default_tenant: Option<String>,
    pub people_assigned: u64,
    pub people_renamed: Vec<PersonRename>,
    pub tools_assigned: u64,
    pub loans_assigned: u64,
    pub loan_slots_backfilled: u64,
    /// Rows moved from a legacy key onto a UUIDv7 key.
    pub records_rekeyed: u64,
}

impl MigrationReport {
    /// `true` when the run found nothing to change.
    pub fn is_noop(&self) -> bool {
        self.removed_indexes.is_empty()
            && self.people_assigned == 0
            && self.people_renamed.is_empty()
            && self.tools_assigned == 0
            && self.loans_assigned == 0
            && self.loan_slots_backfilled == 0
            && self.records_rekeyed == 0
    }
}

#[derive(Debug, SurrealValue)]
struct UnassignedPerson {
    id: RecordId,
    name: String,
}

#[derive(Debug, SurrealValue)]
struct UnassignedLoan {
    id: RecordId,
    tool_id: String,
}

#[derive(Debug, SurrealValue)]
struct KeyedRow {
    id: RecordId,
}

#[derive(Debug, SurrealValue)]
struct SlotlessLoan {
    record_id: String,
    tool_id: String,
    returned_on: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct ToolOwner {
    id: RecordId,
    tenant_id: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct NameGroup {
    tenant_id: Option<String>,
    name: String,
    total: u64,
}

#[derive(Debug, SurrealValue)]
struct SlotGroup {
    open_slot: Option<String>,
    total: u64,
}

#[derive(Debug, SurrealValue)]
struct TenantGroup {
    tenant_id: Option<String>,
}

#[derive(Debug, SurrealValue)]
struct CountRow {
    total: u64,
}

/// Apply the tenant-scope migration.
pub async fn migrate<C: Connection>(db: &Surreal<C>) -> Result<MigrationReport, DbError> {
    let mut report = MigrationReport {
        removed_indexes: remove_legacy_name_indexes(db).await?,
        ..MigrationReport::default()
    };

    let default_tenant = earliest_tenant_id(db).await?;
    let require_default = |what: &str| {
        default_tenant.clone().ok_or_else(|| {
            DbError::Integrity(format!(
                "{what} rows have no tenant and no tenant exists to receive them"
            ))
        })
    };

    // People: rename collisions, then assign.
    let mut result = db
        .query(format!("SELECT id, name FROM person WHERE {UNASSIGNED}"))
        .await?;
    let people: Vec<UnassignedPerson> = result.take(0)?;

    if !people.is_empty() {
        let tenant = require_default("person")?;
        let renames =
            plan_person_renames(people.iter().map(|p| (&p.id.key, p.name.as_str())));
        let new_names: HashMap<&str, &str> = renames
            .iter()
            .map(|r| (r.id.as_str(), r.to.as_str()))
            .collect();

        for person in &people {
            let key = key_text(&person.id.key);
            let name = new_names
                .get(key.as_str())
                .copied()
                .unwrap_or(person.name.as_str());
            db.query(
                "UPDATE $id SET \
                 tenant_id = $tenant_id, name = $name, \
                 created_at = created_at ?? time::now(), \
                 updated_at = time::now() RETURN NONE",
            )
            .bind(("id", person.id.clone()))
            .bind(("tenant_id", tenant.clone()))
            .bind(("name", name.to_string()))
            .await?
            .check()?;
        }

        for rename in &renames {
            debug!(person_id = %rename.id, from = %rename.from, to = %rename.to, "Renamed person");
        }
        report.people_assigned = people.len() as u64;
        report.people_renamed = renames;
        report.default_tenant = Some(tenant);
    }

    // Tools: assign, no renaming.
    let unassigned_tools = count(db, "tool", UNASSIGNED).await?;
    if unassigned_tools > 0 {
        let tenant = require_default("tool")?;
        db.query(format!(
            "UPDATE tool SET tenant_id = $tenant_id, \
             estimated_value = estimated_value ?? 0.0, \
             created_at = created_at ?? time::now(), \
             updated_at = time::now() \
             WHERE {UNASSIGNED} RETURN NONE"
        ))
        .bind(("tenant_id", tenant.clone()))
        .await?
        .check()?;
        report.tools_assigned = unassigned_tools;
        report.default_tenant = Some(tenant);
    }

    // Loans follow their tool's tenant; the default tenant only covers
    // loans whose tool is gone.
    let mut result = db
        .query(format!("SELECT id, tool_id FROM loan WHERE {UNASSIGNED}"))
        .await?;
    let loans: Vec<UnassignedLoan> = result.take(0)?;

    if !loans.is_empty() {
        let mut result = db.query("SELECT id, tenant_id FROM tool").await?;
        let tools: Vec<ToolOwner> = result.take(0)?;
        let owners: HashMap<String, String> = tools
            .into_iter()
            .filter_map(|o| o.tenant_id.map(|t| (key_text(&o.id.key), t)))
            .collect();

        for loan in &loans {
            let tenant = match owners.get(&loan.tool_id) {
                Some(tenant) => tenant.clone(),
                None => {
                    let tenant = require_default("loan")?;
                    report.default_tenant = Some(tenant.clone());
                    tenant
                }
            };
            db.query(
                "UPDATE $id SET tenant_id = $tenant_id, \
                 created_at = created_at ?? time::now() RETURN NONE",
            )
            .bind(("id", loan.id.clone()))
            .bind(("tenant_id", tenant))
            .await?
            .check()?;
        }
        report.loans_assigned = loans.len() as u64;
    }

    report.records_rekeyed = rekey_legacy_records(db).await?;
    report.loan_slots_backfilled = backfill_open_slots(db).await?;

    check_conflicts(db).await?;
    db.query(format!(
        "DEFINE INDEX IF NOT EXISTS {PERSON_NAME_INDEX} ON TABLE person \
             FIELDS tenant_id, name UNIQUE;\n\
         DEFINE INDEX IF NOT EXISTS {LOAN_OPEN_SLOT_INDEX} ON TABLE loan \
             FIELDS open_slot UNIQUE;"
    ))
    .await?
    .check()
    .map_err(|e| DbError::Integrity(format!("building unique indexes failed: {e}")))?;

    check_tenant_references(db).await?;

    db.query(
        "DEFINE FIELD OVERWRITE tenant_id ON TABLE tool TYPE string;\n\
         DEFINE FIELD OVERWRITE tenant_id ON TABLE person TYPE string;\n\
         DEFINE FIELD OVERWRITE tenant_id ON TABLE loan TYPE string;\n\
         DEFINE FIELD OVERWRITE open_slot ON TABLE loan TYPE string;",
    )
    .await?
    .check()
    .map_err(|e| DbError::Migration(format!("tightening tenant_id failed: {e}")))?;

    if report.is_noop() {
        debug!("Tenant-scope migration found nothing to change");
    } else {
        info!(
            default_tenant = ?report.default_tenant,
            renamed = report.people_renamed.len(),
            rekeyed = report.records_rekeyed,
            "Tenant-scope migration changed rows"
        );
    }
    Ok(report)
}

/// Drop every single-column unique index on `person.name`.
async fn remove_legacy_name_indexes<C: Connection>(
    db: &Surreal<C>,
) -> Result<Vec<String>, DbError> {
    let mut result = db.query("INFO FOR TABLE person").await?;
    let info: Option<serde_json::Value> = result.take(0)?;

    let Some(indexes) = info
        .as_ref()
        .and_then(|info| info.get("indexes"))
        .and_then(|indexes| indexes.as_object())
    else {
        return Ok(Vec::new());
    };

    let mut removed = Vec::new();
    for (name, definition) in indexes {
        let Some(definition) = definition.as_str() else {
            continue;
        };
        if !is_single_column_unique(definition, "name") {
            continue;
        }
        warn!(index = %name, "Removing legacy global unique index on person.name");
        db.query(format!(
            "REMOVE INDEX IF EXISTS {} ON TABLE person",
            quote_ident(name)
        ))
        .await?
        .check()
        .map_err(|e| DbError::Migration(format!("removing index {name} failed: {e}")))?;
        removed.push(name.clone());
    }
    Ok(removed)
}

/// Move `tool`, `person` and `loan` rows whose key is not a UUID string
/// onto UUIDv7 keys, one transaction per row. Loan columns naming a moved
/// tool or person follow it. A moved loan loses its open slot, which the
/// backfill then derives from the new key.
async fn rekey_legacy_records<C: Connection>(db: &Surreal<C>) -> Result<u64, DbError> {
    const FOLLOW: [(&str, &str); 3] = [
        (
            "tool",
            "UPDATE loan SET tool_id = $new WHERE tool_id = $old_key RETURN NONE;\n\
             UPDATE loan SET open_slot = $new WHERE open_slot = $old_key RETURN NONE;",
        ),
        (
            "person",
            "UPDATE loan SET person_id = $new WHERE person_id = $old_key RETURN NONE;",
        ),
        (
            "loan",
            "UPDATE type::record('loan', $new) SET open_slot = NONE RETURN NONE;",
        ),
    ];

    let mut moved = 0;
    for (table, follow) in FOLLOW {
        let mut result = db.query(format!("SELECT id FROM {table}")).await?;
        let rows: Vec<KeyedRow> = result.take(0)?;

        let statement = format!(
            "BEGIN TRANSACTION;\n\
             LET $row = (SELECT * OMIT id FROM ONLY $old);\n\
             DELETE $old RETURN NONE;\n\
             CREATE type::record('{table}', $new) CONTENT $row RETURN NONE;\n\
             {follow}\n\
             COMMIT TRANSACTION;"
        );

        for row in rows.into_iter().filter(|row| !is_uuid_key(&row.id.key)) {
            let old_key = key_text(&row.id.key);
            let new_key = Uuid::now_v7().to_string();
            let outcome = db
                .query(statement.as_str())
                .bind(("old", row.id))
                .bind(("old_key", old_key.clone()))
                .bind(("new", new_key.clone()))
                .await;
            TxFailure::check(outcome).map_err(DbError::from)?;
            debug!(table, from = %old_key, to = %new_key, "Re-keyed legacy record");
            moved += 1;
        }
    }
    Ok(moved)
}

async fn backfill_open_slots<C: Connection>(db: &Surreal<C>) -> Result<u64, DbError> {
    let mut result = db
        .query(
            "SELECT meta::id(id) AS record_id, tool_id, returned_on FROM loan \
             WHERE open_slot = NONE OR open_slot = NULL",
        )
        .await?;
    let loans: Vec<SlotlessLoan> = result.take(0)?;

    for loan in &loans {
        let slot = open_slot(&loan.tool_id, &loan.record_id, loan.returned_on.is_none());
        db.query("UPDATE type::record('loan', $id) SET open_slot = $open_slot RETURN NONE")
            .bind(("id", loan.record_id.clone()))
            .bind(("open_slot", slot))
            .await?
            .check()?;
    }
    Ok(loans.len() as u64)
}

/// Fail before building the unique indexes if they would reject rows.
async fn check_conflicts<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    let mut result = db
        .query("SELECT tenant_id, name, count() AS total FROM person GROUP BY tenant_id, name")
        .await?;
    let groups: Vec<NameGroup> = result.take(0)?;
    let names: Vec<String> = groups
        .into_iter()
        .filter(|g| g.total > 1)
        .map(|g| format!("({}, {})", g.tenant_id.unwrap_or_default(), g.name))
        .collect();
    if !names.is_empty() {
        return Err(DbError::Integrity(format!(
            "duplicate person names within a tenant: {}",
            names.join(", ")
        )));
    }

    let mut result = db
        .query("SELECT open_slot, count() AS total FROM loan GROUP BY open_slot")
        .await?;
    let slots: Vec<SlotGroup> = result.take(0)?;
    let tools: Vec<String> = slots
        .into_iter()
        .filter(|s| s.total > 1)
        .filter_map(|s| s.open_slot)
        .collect();
    if !tools.is_empty() {
        return Err(DbError::Integrity(format!(
            "tools with more than one open loan: {}",
            tools.join(", ")
        )));
    }
    Ok(())
}

/// Every `tenant_id` on tenant-scoped tables must name a known tenant.
async fn check_tenant_references<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    let known: HashSet<String> = known_tenant_ids(db).await?.into_iter().collect();

    let mut unresolved = Vec::new();
    for table in ["tool", "person", "loan"] {
        let mut result = db
            .query(format!("SELECT tenant_id FROM {table} GROUP BY tenant_id"))
            .await?;
        let groups: Vec<TenantGroup> = result.take(0)?;
        for group in groups {
            match group.tenant_id {
                Some(id) if known.contains(&id) => {}
                Some(id) => unresolved.push(format!("{table}:{id}")),
                None => unresolved.push(format!("{table}:<none>")),
            }
        }
    }

    if unresolved.is_empty() {
        Ok(())
    } else {
        Err(DbError::Integrity(format!(
            "tenant references do not resolve: {}",
            unresolved.join(", ")
        )))
    }
}

async fn count<C: Connection>(db: &Surreal<C>, table: &str, filter: &str) -> Result<u64, DbError> {
    let mut result = db
        .query(format!(
            "SELECT count() AS total FROM {table} WHERE {filter} GROUP ALL"
        ))
        .await?;
    let rows: Vec<CountRow> = result.take(0)?;
    Ok(rows.first().map(|r| r.total).unwrap_or(0))
}

/// Plan renames for rows that share a name. Within a group ordered by
/// ascending key the first row keeps its name and the row at 1-based
/// position `n >= 2` becomes `"<name>_<n>"`. Keys order the way the
/// store orders them: integers numerically, before any string key.
pub(crate) fn plan_person_renames<'a>(
    rows: impl IntoIterator<Item = (&'a RecordIdKey, &'a str)>,
) -> Vec<PersonRename> {
    let mut groups: BTreeMap<&str, Vec<&RecordIdKey>> = BTreeMap::new();
    for (key, name) in rows {
        groups.entry(name).or_default().push(key);
    }

    let mut renames = Vec::new();
    for (name, mut keys) in groups {
        keys.sort();
        for (index, key) in keys.into_iter().enumerate().skip(1) {
            renames.push(PersonRename {
                id: key_text(key),
                from: name.to_string(),
                to: format!("{name}_{}", index + 1),
            });
        }
    }
    renames
}

/// A record key as loan columns spell it: `1`, `p1` or the UUID text.
fn key_text(key: &RecordIdKey) -> String {
    match key {
        RecordIdKey::Number(n) => n.to_string(),
        RecordIdKey::String(s) => s.clone(),
        RecordIdKey::Uuid(u) => u.to_string(),
        other => other.to_sql(),
    }
}

/// Keys written by the repositories: a UUID stored as a string.
fn is_uuid_key(key: &RecordIdKey) -> bool {
    matches!(key, RecordIdKey::String(s) if Uuid::parse_str(s).is_ok())
}

/// Whether an index definition is `UNIQUE` over exactly `field`.
pub(crate) fn is_single_column_unique(definition: &str, field: &str) -> bool {
    let upper = definition.to_ascii_uppercase();
    if !upper.split_whitespace().any(|word| word == "UNIQUE") {
        return false;
    }

    let Some(start) = [" FIELDS ", " COLUMNS "]
        .iter()
        .filter_map(|kw| upper.find(kw).map(|pos| pos + kw.len()))
        .min()
    else {
        return false;
    };

    let rest = &definition[start..];
    let rest_upper = &upper[start..];
    let end = [" UNIQUE", " SEARCH", " MTREE", " HNSW", " COMMENT", " CONCURRENTLY", ";"]
        .iter()
        .filter_map(|kw| rest_upper.find(kw))
        .min()
        .unwrap_or(rest.len());

    let columns: Vec<&str> = rest[..end]
        .split(',')
        .map(|c| c.trim().trim_matches('`'))
        .filter(|c| !c.is_empty())
        .collect();
    columns.len() == 1 && columns[0].eq_ignore_ascii_case(field)
}

fn quote_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', ""))
}
