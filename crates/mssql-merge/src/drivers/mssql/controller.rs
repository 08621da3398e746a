//! Constraint toggles and structural DDL for SQL Server.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, info};

use super::MssqlDatabase;
use crate::core::ddl;
use crate::core::schema::{group_by_constraint, Column, ForeignKeyReference, PrimaryKey, Table};
use crate::core::traits::{ConstraintController, SchemaCatalog};
use crate::error::{MergeError, Result};

/// One reference per constraint, first-seen order.
fn distinct_constraints(refs: &[ForeignKeyReference]) -> Vec<&ForeignKeyReference> {
    let mut seen = HashSet::new();
    refs.iter()
        .filter(|r| seen.insert(r.constraint_key()))
        .collect()
}

impl MssqlDatabase {
    async fn toggle_triggers(&self, enabled: bool) -> Result<()> {
        let verb = if enabled { "enable" } else { "disable" };

        self.batch_raw(ddl::database_triggers(enabled))
            .await
            .map_err(|e| MergeError::structural(verb, "database triggers", e))?;

        let tables = self.list_trigger_bearing_tables().await?;
        for table in &tables {
            let sql = ddl::table_triggers(table, enabled)?;
            self.batch_raw(&sql)
                .await
                .map_err(|e| MergeError::structural(verb, table.full_name(), e))?;
        }

        info!(
            "{}d triggers on {} and {} tables",
            if enabled { "Enable" } else { "Disable" },
            self.database,
            tables.len()
        );
        Ok(())
    }
}

#[async_trait]
impl ConstraintController for MssqlDatabase {
    async fn disable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        for reference in distinct_constraints(refs) {
            let sql = ddl::nocheck_constraint(reference)?;
            self.ddl("disable foreign key", &reference.constraint_name, &sql, &[])
                .await?;
        }
        debug!("Disabled {} foreign key references", refs.len());
        Ok(())
    }

    async fn enable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        for reference in distinct_constraints(refs) {
            let sql = ddl::check_constraint(reference)?;
            self.ddl("enable foreign key", &reference.constraint_name, &sql, &[])
                .await?;
        }
        debug!("Enabled {} foreign key references", refs.len());
        Ok(())
    }

    async fn disable_all_triggers(&self) -> Result<()> {
        self.toggle_triggers(false).await
    }

    async fn enable_all_triggers(&self) -> Result<()> {
        self.toggle_triggers(true).await
    }

    async fn drop_foreign_key_references(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        for reference in distinct_constraints(refs) {
            let sql = ddl::drop_constraint(
                &reference.fk_schema,
                &reference.fk_table,
                &reference.constraint_name,
            )?;
            self.ddl("drop foreign key", &reference.constraint_name, &sql, &[])
                .await?;
        }
        Ok(())
    }

    async fn create_foreign_key_references(
        &self,
        refs: &[ForeignKeyReference],
        cascade_on_update: bool,
    ) -> Result<()> {
        for group in group_by_constraint(refs) {
            // Existing rows were shifted consistently; skip revalidation.
            let sql = ddl::add_foreign_key(&group, cascade_on_update, false)?;
            self.ddl("create foreign key", &group[0].constraint_name, &sql, &[])
                .await?;
        }
        Ok(())
    }

    async fn drop_primary_key(&self, column: &Column) -> Result<()> {
        let table = Table::new(&column.schema, &column.table, column.is_identity);
        let pk = self.primary_key(&table).await?.ok_or_else(|| {
            MergeError::structural(
                "drop primary key",
                table.full_name(),
                "table has no primary key",
            )
        })?;

        let sql = ddl::drop_constraint(&pk.schema, &pk.table, &pk.constraint_name)?;
        self.ddl("drop primary key", &pk.constraint_name, &sql, &[])
            .await?;
        Ok(())
    }

    async fn create_primary_key(&self, pk: &PrimaryKey) -> Result<()> {
        let sql = ddl::add_primary_key(pk)?;
        self.ddl("create primary key", &pk.constraint_name, &sql, &[])
            .await?;
        Ok(())
    }

    async fn set_identity_insert(&self, table: &Table, enabled: bool) -> Result<()> {
        let sql = ddl::identity_insert(table, enabled)?;
        self.batch_raw(&sql).await.map_err(|e| {
            MergeError::structural("set identity insert", table.full_name(), e)
        })
    }

    async fn add_column(&self, column: &Column) -> Result<()> {
        let sql = ddl::add_column(column)?;
        self.ddl("add column", &column.full_name(), &sql, &[]).await?;
        Ok(())
    }

    async fn drop_column_default(&self, column: &Column) -> Result<()> {
        let sql = ddl::drop_default_constraint(column)?;
        self.ddl(
            "drop column default",
            &column.full_name(),
            &sql,
            &[&column.name],
        )
        .await?;
        Ok(())
    }

    async fn drop_column(&self, column: &Column) -> Result<()> {
        let sql = ddl::drop_column(column)?;
        self.ddl("drop column", &column.full_name(), &sql, &[]).await?;
        Ok(())
    }

    async fn rename_column(&self, column: &Column, new_name: &str) -> Result<Column> {
        let (sql, object_name) = ddl::rename_column(column, new_name)?;
        self.ddl(
            "rename column",
            &column.full_name(),
            &sql,
            &[&object_name, &new_name],
        )
        .await?;
        Ok(column.renamed(new_name))
    }

    async fn copy_column_values(&self, from: &Column, to: &Column) -> Result<u64> {
        let sql = ddl::copy_column_values(from, to)?;
        self.ddl("copy column values", &to.full_name(), &sql, &[])
            .await
    }

    async fn increment_column_values(&self, column: &Column, offset: i64) -> Result<u64> {
        let sql = ddl::increment_column(column, offset)?;
        let rows = self
            .ddl("increment column", &column.full_name(), &sql, &[])
            .await?;
        debug!("Shifted {} rows of {} by {}", rows, column.full_name(), offset);
        Ok(rows)
    }
}
