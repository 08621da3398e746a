//! Merge orchestrator - top-level sequencing of a merge run.
//!
//! A full run bootstraps the tenant (when configured), computes offsets,
//! renumbers the source and copies it into the destination. The `renumber`
//! and `copy` entry points run one phase each; `plan` changes nothing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::Config;
use crate::copy::{CopyOrchestrator, CopyStatus, TableCopyOutcome};
use crate::core::traits::MergeDatabase;
use crate::error::Result;
use crate::offset::{policy_for, ColumnOffset, OffsetPlan};
use crate::renumber::{IdentityRenumberer, RenumberedColumn};
use crate::tenant::{self, TenantStamp};

/// Merge orchestrator over an already-open source and destination.
pub struct Merger<'a> {
    source: &'a dyn MergeDatabase,
    destination: &'a dyn MergeDatabase,
    config: &'a Config,
}

/// Result of a merge run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    /// Unique run identifier.
    pub run_id: String,

    pub source: String,
    pub destination: String,

    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    pub offset_strategy: String,

    /// Offset for columns without their own entry.
    pub default_offset: i64,

    pub column_offsets: Vec<ColumnOffset>,
    pub tenant_stamps: Vec<TenantStamp>,
    pub renumbered: Vec<RenumberedColumn>,
    pub tables: Vec<TableCopyOutcome>,

    /// Rows inserted, including rows recovered after conflicts.
    pub rows_copied: u64,

    /// Tables that reported a duplicate key.
    pub conflicts: usize,
}

impl MergeReport {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// What a run would do, computed without changing either database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergePlan {
    pub offset_strategy: String,
    pub default_offset: i64,
    pub column_offsets: Vec<ColumnOffset>,

    /// Source identity columns that would be renumbered.
    pub identity_columns: Vec<String>,

    /// Destination tables that would be copied.
    pub tables_to_copy: Vec<String>,

    /// Destination tables skipped by the excluded-table list.
    pub excluded_tables: Vec<String>,
}

impl MergePlan {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

#[derive(Debug, Clone, Copy)]
struct Phases {
    tenant: bool,
    renumber: bool,
    copy: bool,
}

impl<'a> Merger<'a> {
    pub fn new(
        source: &'a dyn MergeDatabase,
        destination: &'a dyn MergeDatabase,
        config: &'a Config,
    ) -> Self {
        Self {
            source,
            destination,
            config,
        }
    }

    /// Full merge: tenant bootstrap, offsets, renumber, copy.
    pub async fn run(&self) -> Result<MergeReport> {
        self.execute(Phases {
            tenant: true,
            renumber: true,
            copy: true,
        })
        .await
    }

    /// Compute offsets and renumber the source only.
    pub async fn renumber(&self) -> Result<MergeReport> {
        self.execute(Phases {
            tenant: false,
            renumber: true,
            copy: false,
        })
        .await
    }

    /// Copy the (already renumbered) source into the destination only.
    pub async fn copy(&self) -> Result<MergeReport> {
        self.execute(Phases {
            tenant: false,
            renumber: false,
            copy: true,
        })
        .await
    }

    async fn compute_offsets(&self) -> Result<(String, OffsetPlan)> {
        let policy = policy_for(self.config.merge.offset_strategy);
        let plan = policy.compute(self.source.catalog(), self.destination.catalog()).await?;
        Ok((policy.name().to_string(), plan))
    }

    /// Offsets and affected objects, read-only.
    pub async fn plan(&self) -> Result<MergePlan> {
        let merge = &self.config.merge;
        let (strategy, offsets) = self.compute_offsets().await?;

        let identity_columns = self
            .source
            .list_identity_columns()
            .await?
            .into_iter()
            .filter(|c| !merge.is_excluded(&c.table) && offsets.offset_for(c) != 0)
            .map(|c| c.full_name())
            .collect();

        let (excluded, copied): (Vec<_>, Vec<_>) = self
            .destination
            .list_tables()
            .await?
            .into_iter()
            .partition(|t| merge.is_excluded(&t.name));

        Ok(MergePlan {
            offset_strategy: strategy,
            default_offset: offsets.default,
            column_offsets: offsets.entries(),
            identity_columns,
            tables_to_copy: copied.iter().map(|t| t.full_name()).collect(),
            excluded_tables: excluded.iter().map(|t| t.full_name()).collect(),
        })
    }

    async fn execute(&self, phases: Phases) -> Result<MergeReport> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let merge = &self.config.merge;

        info!(
            "Starting merge run {}: {} -> {}",
            run_id,
            self.source.database_name(),
            self.destination.database_name()
        );

        let mut tenant_stamps = Vec::new();
        if phases.tenant {
            if let Some(tenant_config) = &self.config.tenant {
                info!("Phase 1: Tenant bootstrap");
                tenant_stamps =
                    tenant::bootstrap(self.source, self.destination, tenant_config, merge).await?;
            }
        }

        let mut offset_strategy = String::new();
        let mut offsets = OffsetPlan::default();
        let mut renumbered = Vec::new();
        if phases.renumber {
            info!("Phase 2: Computing offsets");
            (offset_strategy, offsets) = self.compute_offsets().await?;

            info!("Phase 3: Renumbering source identity columns");
            renumbered = IdentityRenumberer::new(self.source, merge)
                .renumber_all(&offsets)
                .await?;
        }

        let mut tables = Vec::new();
        if phases.copy {
            info!("Phase 4: Copying data");
            tables = CopyOrchestrator::new(self.source.catalog(), self.destination, merge)
                .copy_all()
                .await?;
        }

        let completed_at = Utc::now();
        let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let rows_copied = tables
            .iter()
            .map(|t| t.rows_copied + t.recovered_rows)
            .sum();
        let conflicts = tables
            .iter()
            .filter(|t| t.status == CopyStatus::Conflict)
            .count();

        let report = MergeReport {
            run_id,
            source: self.source.database_name().to_string(),
            destination: self.destination.database_name().to_string(),
            started_at,
            completed_at,
            duration_seconds: duration,
            offset_strategy,
            default_offset: offsets.default,
            column_offsets: offsets.entries(),
            tenant_stamps,
            renumbered,
            tables,
            rows_copied,
            conflicts,
        };

        info!(
            "Merge {}: {} columns renumbered, {} rows copied, {} conflicts in {:.1}s",
            report.run_id,
            report.renumbered.len(),
            report.rows_copied,
            report.conflicts,
            report.duration_seconds
        );

        Ok(report)
    }
}
