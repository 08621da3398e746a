//! Microsoft SQL Server driver.
//!
//! [`MssqlDatabase`] implements every engine seam on one owned session:
//!
//! - `catalog`: [`SchemaCatalog`](crate::core::SchemaCatalog) over `sys.*` views
//! - `controller`: [`ConstraintController`](crate::core::ConstraintController) DDL
//! - `copier`: [`RowCopier`](crate::core::RowCopier) cross-database inserts
//! - `tenant`: [`TenantStore`](crate::core::TenantStore) organization rows

mod catalog;
mod connection;
mod controller;
mod copier;
mod tenant;

pub use connection::MssqlDatabase;
