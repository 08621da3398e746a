//! Database driver implementations.
//!
//! - [`mssql`]: Microsoft SQL Server, reached through tiberius
//!
//! A driver implements [`SchemaCatalog`](crate::core::SchemaCatalog),
//! [`ConstraintController`](crate::core::ConstraintController),
//! [`RowCopier`](crate::core::RowCopier) and
//! [`TenantStore`](crate::core::TenantStore); the engine only sees those traits.

pub mod mssql;

pub use mssql::MssqlDatabase;
