//! Domain models for tooltrack.
//!
//! Every record except [`tenant::Tenant`] is owned by exactly one tenant
//! and is only ever read or written through a `tenant_id`-scoped call.

pub mod loan;
pub mod person;
pub mod tenant;
pub mod tool;
