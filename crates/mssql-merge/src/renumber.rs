//! Identity renumbering.
//!
//! Each identity column is rebuilt as a plain column holding the same values,
//! shifted by its offset, and every foreign key column that points at it is
//! shifted by the same amount. Steps per column:
//!
//! 1. add a shadow column of the same type and copy the values into it
//! 2. drop the foreign keys referencing the column, every column pair included
//! 3. drop the table's primary key if the column is part of it
//! 4. drop the identity column and rename the shadow to its name
//! 5. shift the column by the offset
//! 6. shift each distinct child column, unless its table is excluded
//! 7. optionally recreate the primary key and foreign keys

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::MergeConfig;
use std::collections::HashSet;

use crate::core::schema::{
    distinct_child_columns, group_by_constraint, Column, ForeignKeyReference, Table,
};
use crate::core::traits::MergeDatabase;
use crate::error::Result;
use crate::offset::OffsetPlan;

/// Outcome of shifting one child column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildUpdate {
    pub column: String,
    pub rows_updated: u64,

    /// Left unchanged because the child table is excluded.
    pub excluded: bool,
}

/// Outcome of renumbering one identity column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenumberedColumn {
    pub column: String,
    pub offset: i64,
    pub rows_updated: u64,
    pub children: Vec<ChildUpdate>,
    pub primary_key_restored: bool,
    pub foreign_keys_restored: usize,
}

/// Shifts identity values of one database.
pub struct IdentityRenumberer<'a> {
    database: &'a dyn MergeDatabase,
    merge: &'a MergeConfig,
}

impl<'a> IdentityRenumberer<'a> {
    pub fn new(database: &'a dyn MergeDatabase, merge: &'a MergeConfig) -> Self {
        Self { database, merge }
    }

    /// Renumber every identity column in catalog order.
    ///
    /// Columns of excluded tables and columns with a zero offset are left alone.
    pub async fn renumber_all(&self, plan: &OffsetPlan) -> Result<Vec<RenumberedColumn>> {
        let columns = self.database.list_identity_columns().await?;
        info!(
            "Renumbering {} identity columns in {}",
            columns.len(),
            self.database.database_name()
        );

        let mut renumbered = Vec::new();
        for column in &columns {
            if self.merge.is_excluded(&column.table) {
                debug!("Skipping excluded table {}", column.table);
                continue;
            }
            let offset = plan.offset_for(column);
            if offset == 0 {
                debug!("Skipping {}: offset is 0", column.full_name());
                continue;
            }
            renumbered.push(self.renumber_column(column, offset).await?);
        }

        info!("Done renumbering {} identity columns", renumbered.len());
        Ok(renumbered)
    }

    /// Shift one identity column and its children by `offset`.
    pub async fn renumber_column(&self, column: &Column, offset: i64) -> Result<RenumberedColumn> {
        let db = self.database;
        info!("Incrementing identity column {} by {}", column.full_name(), offset);

        let shadow = column.shadow(self.merge.shadow_column.as_str());
        db.add_column(&shadow).await?;
        db.copy_column_values(column, &shadow).await?;
        db.drop_column_default(&shadow).await?;

        let references = self.constraint_references(column).await?;
        db.drop_foreign_key_references(&references).await?;

        let primary_key = if db.is_primary_key(column).await? {
            let table = Table::new(&column.schema, &column.table, true);
            let pk = db.primary_key(&table).await?;
            db.drop_primary_key(column).await?;
            pk
        } else {
            None
        };

        db.drop_column(column).await?;
        let column = db.rename_column(&shadow, &column.name).await?;

        let rows_updated = db.increment_column_values(&column, offset).await?;
        info!("Updated {} rows of {}", rows_updated, column.full_name());

        let mut children = Vec::new();
        let shifted: Vec<ForeignKeyReference> = references
            .iter()
            .filter(|r| r.references(&column))
            .cloned()
            .collect();
        for child in distinct_child_columns(&shifted) {
            if self.merge.is_excluded(&child.table) {
                debug!("Leaving {} unchanged: table is excluded", child.full_name());
                children.push(ChildUpdate {
                    column: child.full_name(),
                    rows_updated: 0,
                    excluded: true,
                });
                continue;
            }
            let rows = db.increment_column_values(&child, offset).await?;
            debug!("Updated {} rows of {}", rows, child.full_name());
            children.push(ChildUpdate {
                column: child.full_name(),
                rows_updated: rows,
                excluded: false,
            });
        }

        let mut primary_key_restored = false;
        let mut foreign_keys_restored = 0;
        if self.merge.restore_keys {
            if let Some(pk) = &primary_key {
                db.create_primary_key(pk).await?;
                primary_key_restored = true;
            }
            db.create_foreign_key_references(&references, self.merge.cascade_on_update)
                .await?;
            foreign_keys_restored = group_by_constraint(&references).len();
            debug!(
                "Restored keys of {}: primary key {}, {} references",
                column.full_name(),
                primary_key_restored,
                foreign_keys_restored
            );
        }

        Ok(RenumberedColumn {
            column: column.full_name(),
            offset,
            rows_updated,
            children,
            primary_key_restored,
            foreign_keys_restored,
        })
    }

    /// Every column pair of each constraint that references `column`.
    ///
    /// A composite key is dropped and recreated as a whole, so pairs whose
    /// parent is another key column are captured as well.
    async fn constraint_references(&self, column: &Column) -> Result<Vec<ForeignKeyReference>> {
        let direct = self
            .database
            .list_foreign_key_references(Some(column), false)
            .await?;
        if direct.is_empty() {
            return Ok(direct);
        }

        let constraints: HashSet<_> = direct.iter().map(|r| r.constraint_key()).collect();
        Ok(self
            .database
            .list_foreign_key_references(None, false)
            .await?
            .into_iter()
            .filter(|r| constraints.contains(&r.constraint_key()))
            .collect())
    }
}
