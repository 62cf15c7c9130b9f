//! tooltrack core: tenant-scoped tool inventory and loan domain.
//!
//! This crate holds the domain models, the error taxonomy, the
//! repository traits implemented by `tooltrack-db`, the loan date policy
//! and the report aggregations. It performs no I/O of its own.

pub mod error;
pub mod image;
pub mod models;
pub mod policy;
pub mod report;
pub mod repository;
pub mod service;

pub use error::{TrackerError, TrackerResult};
pub use models::tenant::TenantId;
