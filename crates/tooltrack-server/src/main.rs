//! tooltrack server entry point.
//!
//! Loads configuration, connects to SurrealDB and brings the schema to the
//! latest version. A store that fails the tenant-scope integrity checks
//! blocks startup.

mod config;

use anyhow::{Context, Result};
use tooltrack_core::repository::{Pagination, TenantDirectory};
use tooltrack_db::repository::SurrealTenantDirectory;
use tooltrack_db::{DbError, DbManager};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::config::AppConfig;

fn init_tracing(json: bool) -> Result<()> {
    let filter = EnvFilter::from_default_env().add_directive(
        "tooltrack=info"
            .parse()
            .context("invalid default log directive")?,
    );
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    init_tracing(config.log_json)?;

    info!("Starting tooltrack...");

    let manager = DbManager::connect(&config.db)
        .await
        .context("failed to connect to SurrealDB")?;
    let db = manager.client();

    match tooltrack_db::run_migrations(db).await {
        Ok(()) => {}
        Err(DbError::Integrity(message)) => {
            error!(%message, "Store failed migration integrity checks, refusing to start");
            anyhow::bail!("migration integrity violation: {message}");
        }
        Err(err) => return Err(err).context("schema migration failed"),
    }

    let version = tooltrack_db::current_version(db).await?;
    let tenants = SurrealTenantDirectory::new(db.clone())
        .list(Pagination::default())
        .await?;

    info!(
        schema_version = version,
        tenants = tenants.total,
        "tooltrack store ready"
    );
    Ok(())
}
