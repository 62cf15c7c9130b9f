//! SurrealDB repository implementations.

pub(crate) mod loan;
mod person;
pub(crate) mod tenant;
mod tool;

pub use loan::SurrealLoanRepository;
pub use person::SurrealPersonRepository;
pub use tenant::SurrealTenantDirectory;
pub use tool::SurrealToolRepository;
