//! tooltrack storage: SurrealDB connection management, schema migrations
//! and repository implementations of the `tooltrack-core` traits.
//!
//! - Connection management ([`DbManager`], [`DbConfig`])
//! - Schema initialization and migrations ([`run_migrations`])
//! - The tenant-scope data migration ([`tenant_scope::migrate`])
//! - Error types ([`DbError`])

mod connection;
mod error;
pub mod repository;
mod schema;
pub mod tenant_scope;

pub use connection::{DbConfig, DbManager};
pub use error::DbError;
pub use schema::{current_version, latest_version, run_migrations, schema_v1};
pub use tenant_scope::{MigrationReport, PersonRename};
