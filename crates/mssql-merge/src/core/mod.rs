//! Core abstractions shared by the merge components.
//!
//! - [`schema`]: table, column, key and reference metadata
//! - [`identifier`]: identifier validation and quoting
//! - [`ddl`]: statement builder over validated identifiers
//! - [`traits`]: catalog, constraint controller, row copier and tenant seams

pub mod ddl;
pub mod identifier;
pub mod schema;
pub mod traits;

#[cfg(test)]
pub(crate) mod memory;

pub use identifier::Ident;
pub use schema::{Column, ColumnKey, ForeignKeyReference, IdentityColumn, PrimaryKey, Table};
pub use traits::{ConstraintController, MergeDatabase, RowCopier, SchemaCatalog, TenantStore};
