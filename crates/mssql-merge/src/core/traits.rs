//! Component seams of the merge engine.
//!
//! - [`SchemaCatalog`]: read-only introspection of live metadata
//! - [`ConstraintController`]: constraint/trigger toggles and structural column DDL
//! - [`RowCopier`]: bulk row movement and plain row updates
//! - [`TenantStore`]: the organization row consumed by tenant bootstrap
//!
//! The SQL Server driver implements all three on one connection. Catalog
//! methods always re-query; structural changes made through the controller
//! invalidate earlier results immediately.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::Organization;
use crate::error::Result;

use super::schema::{Column, ColumnKey, ForeignKeyReference, PrimaryKey, Table};

/// Read-only schema introspection for one database.
#[async_trait]
pub trait SchemaCatalog: Send + Sync {
    /// Name of the database this catalog reads.
    fn database_name(&self) -> &str;

    /// Default schema the merge operates on.
    fn schema(&self) -> &str;

    /// All user tables in the default schema, ordered by name.
    async fn list_tables(&self) -> Result<Vec<Table>>;

    /// All identity columns, ordered by (schema, table, column).
    async fn list_identity_columns(&self) -> Result<Vec<Column>>;

    /// Every column across all tables with exactly this name.
    async fn list_columns_by_name(&self, name: &str) -> Result<Vec<Column>>;

    /// Foreign-key references, optionally only those whose parent is `parent`,
    /// optionally only currently enabled ones.
    async fn list_foreign_key_references(
        &self,
        parent: Option<&Column>,
        active_only: bool,
    ) -> Result<Vec<ForeignKeyReference>>;

    /// Tables owning at least one user-defined trigger.
    async fn list_trigger_bearing_tables(&self) -> Result<Vec<Table>>;

    /// Whether the column participates in its table's primary key.
    async fn is_primary_key(&self, column: &Column) -> Result<bool>;

    /// The primary key of a table, if it has one.
    async fn primary_key(&self, table: &Table) -> Result<Option<PrimaryKey>>;

    /// Column names used on both sides of a copy, excluding computed and
    /// rowversion columns.
    async fn list_copyable_columns(&self, table: &Table) -> Result<Vec<String>>;

    /// `MAX(column)`, or `None` for an empty table.
    async fn max_value(&self, column: &Column) -> Result<Option<i64>>;

    /// Last value issued by each identity column, where the engine has issued one.
    async fn last_identity_values(&self) -> Result<HashMap<ColumnKey, i64>>;
}

/// Constraint toggles and structural DDL. Every failure here is fatal.
#[async_trait]
pub trait ConstraintController: Send + Sync {
    /// Stop enforcing exactly these references.
    async fn disable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()>;

    /// Re-enable exactly these references, validating existing rows.
    async fn enable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()>;

    /// Disable database-level triggers and the triggers of every trigger-bearing table.
    async fn disable_all_triggers(&self) -> Result<()>;

    /// Enable database-level triggers and the triggers of every trigger-bearing table.
    async fn enable_all_triggers(&self) -> Result<()>;

    async fn drop_foreign_key_references(&self, refs: &[ForeignKeyReference]) -> Result<()>;

    /// Recreate references; cascade-on-update is never attached to self-references.
    async fn create_foreign_key_references(
        &self,
        refs: &[ForeignKeyReference],
        cascade_on_update: bool,
    ) -> Result<()>;

    /// Drop the primary key of the column's owning table.
    async fn drop_primary_key(&self, column: &Column) -> Result<()>;

    async fn create_primary_key(&self, pk: &PrimaryKey) -> Result<()>;

    /// Toggle explicit identity values for inserts into `table` on this session.
    async fn set_identity_insert(&self, table: &Table, enabled: bool) -> Result<()>;

    /// Add a non-null column of `column.data_type`.
    async fn add_column(&self, column: &Column) -> Result<()>;

    /// Drop the default constraint on a column, if one exists.
    async fn drop_column_default(&self, column: &Column) -> Result<()>;

    async fn drop_column(&self, column: &Column) -> Result<()>;

    /// Rename a column and return the rebound handle.
    async fn rename_column(&self, column: &Column, new_name: &str) -> Result<Column>;

    /// Copy every row's value of `from` into `to`. Returns rows affected.
    async fn copy_column_values(&self, from: &Column, to: &Column) -> Result<u64>;

    /// `column = column + offset` on every non-null row. Returns rows affected.
    async fn increment_column_values(&self, column: &Column, offset: i64) -> Result<u64>;
}

/// Row movement into this database.
#[async_trait]
pub trait RowCopier: Send + Sync {
    /// Copy every row of `table` from `source_database` using `columns` on both sides.
    ///
    /// Fails with `MergeError::DuplicateKey` when a row collides with an
    /// existing key; no rows of the statement are kept in that case.
    async fn copy_table_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
    ) -> Result<u64>;

    /// Copy only the rows of `table` whose `key_columns` are absent here.
    async fn copy_missing_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
        key_columns: &[String],
    ) -> Result<u64>;

    /// Set a column to `value` on every row. Returns rows affected.
    async fn set_column_value(&self, column: &Column, value: i64) -> Result<u64>;
}

/// Organization rows in the tenant table.
#[async_trait]
pub trait TenantStore: Send + Sync {
    async fn organization_exists(&self, table: &Table, id: i32) -> Result<bool>;

    /// Insert the row with its explicit id. The caller holds identity insert for `table`.
    async fn insert_organization(&self, table: &Table, organization: &Organization)
        -> Result<()>;
}

/// A database the merge can fully drive.
pub trait MergeDatabase: SchemaCatalog + ConstraintController + RowCopier + TenantStore {
    /// The same database viewed as a read-only catalog.
    fn catalog(&self) -> &dyn SchemaCatalog;
}

impl<T: SchemaCatalog + ConstraintController + RowCopier + TenantStore> MergeDatabase for T {
    fn catalog(&self) -> &dyn SchemaCatalog {
        self
    }
}
