//! Bulk copy of every non-excluded table from source to destination.
//!
//! Foreign keys and triggers on the destination are suspended for the whole
//! run and restored afterwards on every path, including fatal errors. A
//! duplicate key in one table is reported and the remaining source rows of
//! that table are copied by primary key; every other failure aborts the run.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::MergeConfig;
use crate::core::schema::{ForeignKeyReference, Table};
use crate::core::traits::{MergeDatabase, SchemaCatalog};
use crate::error::Result;

/// How a table fared during the copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CopyStatus {
    Copied,

    /// The bulk insert hit an existing key.
    Conflict,

    /// Excluded by configuration.
    Skipped,
}

/// Per-table copy result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCopyOutcome {
    pub table: String,
    pub status: CopyStatus,

    /// Rows inserted by the bulk copy.
    pub rows_copied: u64,

    /// Rows inserted by the follow-up copy after a conflict.
    pub recovered_rows: u64,
}

impl TableCopyOutcome {
    fn new(table: &Table, status: CopyStatus) -> Self {
        Self {
            table: table.full_name(),
            status,
            rows_copied: 0,
            recovered_rows: 0,
        }
    }
}

/// Drives the copy phase against the destination connection.
pub struct CopyOrchestrator<'a> {
    source: &'a dyn SchemaCatalog,
    destination: &'a dyn MergeDatabase,
    merge: &'a MergeConfig,
}

impl<'a> CopyOrchestrator<'a> {
    pub fn new(
        source: &'a dyn SchemaCatalog,
        destination: &'a dyn MergeDatabase,
        merge: &'a MergeConfig,
    ) -> Self {
        Self {
            source,
            destination,
            merge,
        }
    }

    /// Copy every table in destination catalog order.
    pub async fn copy_all(&self) -> Result<Vec<TableCopyOutcome>> {
        let tables = self.destination.list_tables().await?;
        let references = self.destination.list_foreign_key_references(None, true).await?;

        info!(
            "Copying {} tables from {} to {}",
            tables.len(),
            self.source.database_name(),
            self.destination.database_name()
        );

        let result = match self.suspend(&references).await {
            Ok(()) => self.copy_tables(&tables).await,
            Err(e) => Err(e),
        };
        let restored = self.restore(&references).await;

        match result {
            Ok(outcomes) => {
                restored?;
                let conflicts = outcomes
                    .iter()
                    .filter(|o| o.status == CopyStatus::Conflict)
                    .count();
                info!("Copy complete: {} tables, {} conflicts", outcomes.len(), conflicts);
                Ok(outcomes)
            }
            Err(e) => {
                if let Err(restore_err) = restored {
                    warn!("Restoring destination constraints failed: {}", restore_err);
                }
                Err(e)
            }
        }
    }

    async fn copy_tables(&self, tables: &[Table]) -> Result<Vec<TableCopyOutcome>> {
        let mut outcomes = Vec::with_capacity(tables.len());
        for table in tables {
            if self.merge.is_excluded(&table.name) {
                debug!("Skipping excluded table {}", table.name);
                outcomes.push(TableCopyOutcome::new(table, CopyStatus::Skipped));
                continue;
            }
            outcomes.push(self.copy_table(table).await?);
        }
        Ok(outcomes)
    }

    /// Copy one table with identity insert held for its duration.
    async fn copy_table(&self, table: &Table) -> Result<TableCopyOutcome> {
        let columns = self.destination.list_copyable_columns(table).await?;

        if table.has_identity {
            self.destination.set_identity_insert(table, true).await?;
        }

        let result = self.copy_rows(table, &columns).await;

        if table.has_identity {
            let released = self.destination.set_identity_insert(table, false).await;
            match (&result, released) {
                (Ok(_), Err(e)) => return Err(e),
                (Err(_), Err(e)) => {
                    warn!("Failed to release identity insert on {}: {}", table.full_name(), e)
                }
                (_, Ok(())) => {}
            }
        }

        result
    }

    async fn copy_rows(&self, table: &Table, columns: &[String]) -> Result<TableCopyOutcome> {
        let source_db = self.source.database_name();

        match self
            .destination
            .copy_table_rows(source_db, table, columns)
            .await
        {
            Ok(rows) => {
                info!("Copied {} rows to table {}", rows, table.full_name());
                Ok(TableCopyOutcome {
                    rows_copied: rows,
                    ..TableCopyOutcome::new(table, CopyStatus::Copied)
                })
            }
            Err(e) if e.is_duplicate_key() => {
                warn!("Duplicate keys were found in table {}", table.full_name());
                debug!("{}", e);
                let recovered = self.copy_missing(table, columns).await?;
                Ok(TableCopyOutcome {
                    recovered_rows: recovered,
                    ..TableCopyOutcome::new(table, CopyStatus::Conflict)
                })
            }
            Err(e) => Err(e),
        }
    }

    /// After a conflict, copy the source rows whose primary key is absent.
    async fn copy_missing(&self, table: &Table, columns: &[String]) -> Result<u64> {
        let Some(pk) = self.destination.primary_key(table).await? else {
            warn!("{} has no primary key; conflicting rows not recovered", table.full_name());
            return Ok(0);
        };

        match self
            .destination
            .copy_missing_rows(self.source.database_name(), table, columns, &pk.columns)
            .await
        {
            Ok(rows) => {
                info!("Copied {} missing rows to table {}", rows, table.full_name());
                Ok(rows)
            }
            Err(e) if e.is_duplicate_key() => {
                warn!("Missing rows of {} could not be copied: {}", table.full_name(), e);
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }

    /// Disable the captured references and all triggers.
    ///
    /// A failure partway leaves some constraints disabled; the caller restores
    /// the whole captured set either way.
    async fn suspend(&self, references: &[ForeignKeyReference]) -> Result<()> {
        self.destination.disable_foreign_keys(references).await?;
        self.destination.disable_all_triggers().await
    }

    /// Re-enable the captured references and all triggers. Both are attempted.
    async fn restore(&self, references: &[ForeignKeyReference]) -> Result<()> {
        let foreign_keys = self.destination.enable_foreign_keys(references).await;
        let triggers = self.destination.enable_all_triggers().await;
        foreign_keys.and(triggers)
    }
}
