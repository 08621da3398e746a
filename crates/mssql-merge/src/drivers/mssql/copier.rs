//! Cross-database row copy on one SQL Server instance.

use async_trait::async_trait;
use tracing::debug;

use super::MssqlDatabase;
use crate::core::ddl;
use crate::core::schema::{Column, Table};
use crate::core::traits::RowCopier;
use crate::error::{MergeError, Result};

#[async_trait]
impl RowCopier for MssqlDatabase {
    async fn copy_table_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
    ) -> Result<u64> {
        let sql = ddl::insert_select(source_database, table, columns)?;
        let rows = self
            .execute_raw(&sql, &[])
            .await
            .map_err(|e| MergeError::from_copy_failure(table.full_name(), e))?;
        debug!("Copied {} rows into {}", rows, table.full_name());
        Ok(rows)
    }

    async fn copy_missing_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
        key_columns: &[String],
    ) -> Result<u64> {
        let sql = ddl::insert_missing(source_database, table, columns, key_columns)?;
        self.execute_raw(&sql, &[])
            .await
            .map_err(|e| MergeError::from_copy_failure(table.full_name(), e))
    }

    async fn set_column_value(&self, column: &Column, value: i64) -> Result<u64> {
        let sql = ddl::set_column_value(column)?;
        self.execute_raw(&sql, &[&value])
            .await
            .map_err(|e| MergeError::copy(column.table.clone(), e))
    }
}
