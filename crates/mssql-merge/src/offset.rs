//! Offset selection for identity renumbering.
//!
//! An [`OffsetPolicy`] inspects both catalogs and produces an [`OffsetPlan`]:
//! a default offset plus optional per-column overrides.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::OffsetStrategy;
use crate::core::schema::{Column, ColumnKey, IdentityColumn};
use crate::core::traits::SchemaCatalog;
use crate::error::Result;

/// Offsets to apply, per identity column.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffsetPlan {
    /// Offset for columns without an entry in `per_column`.
    pub default: i64,

    pub per_column: HashMap<ColumnKey, i64>,
}

/// One column's entry in a serialized plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOffset {
    pub column: String,
    pub offset: i64,
}

impl OffsetPlan {
    /// Same offset for every column.
    pub fn uniform(offset: i64) -> Self {
        Self {
            default: offset,
            per_column: HashMap::new(),
        }
    }

    pub fn with_column(mut self, key: ColumnKey, offset: i64) -> Self {
        self.per_column.insert(key, offset);
        self
    }

    /// Offset for one column: its own entry, else the default.
    pub fn offset_for(&self, column: &Column) -> i64 {
        self.per_column
            .get(&column.key())
            .copied()
            .unwrap_or(self.default)
    }

    /// Per-column entries sorted by column name, for reports.
    pub fn entries(&self) -> Vec<ColumnOffset> {
        let mut entries: Vec<ColumnOffset> = self
            .per_column
            .iter()
            .map(|(key, offset)| ColumnOffset {
                column: key.to_string(),
                offset: *offset,
            })
            .collect();
        entries.sort_by(|a, b| a.column.cmp(&b.column));
        entries
    }
}

/// Strategy for choosing renumbering offsets.
#[async_trait]
pub trait OffsetPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn compute(
        &self,
        source: &dyn SchemaCatalog,
        destination: &dyn SchemaCatalog,
    ) -> Result<OffsetPlan>;
}

/// Every identity column of a database with its current maximum.
pub async fn identity_maxima(catalog: &dyn SchemaCatalog) -> Result<Vec<IdentityColumn>> {
    let columns = catalog.list_identity_columns().await?;
    let mut maxima = Vec::with_capacity(columns.len());
    for column in columns {
        let current_max = catalog.max_value(&column).await?;
        maxima.push(IdentityColumn {
            column,
            current_max,
        });
    }
    Ok(maxima)
}

/// Largest identity value stored anywhere in the database, or 0.
pub async fn max_identity(catalog: &dyn SchemaCatalog) -> Result<i64> {
    let max = identity_maxima(catalog)
        .await?
        .iter()
        .filter_map(|c| c.current_max)
        .max()
        .unwrap_or(0);
    debug!("Max identity in {}: {}", catalog.database_name(), max);
    Ok(max)
}

/// One global offset: the largest identity value in either database.
#[derive(Debug, Default, Clone, Copy)]
pub struct MaxIdentityPolicy;

#[async_trait]
impl OffsetPolicy for MaxIdentityPolicy {
    fn name(&self) -> &'static str {
        "max_identity"
    }

    async fn compute(
        &self,
        source: &dyn SchemaCatalog,
        destination: &dyn SchemaCatalog,
    ) -> Result<OffsetPlan> {
        let source_max = max_identity(source).await?;
        let destination_max = max_identity(destination).await?;
        let offset = source_max.max(destination_max);
        info!(
            "Identity offset {} (source max {}, destination max {})",
            offset, source_max, destination_max
        );
        Ok(OffsetPlan::uniform(offset))
    }
}

/// Per-column offsets from the destination's issued identity values.
///
/// Each destination column contributes `max(last issued value, current max)`,
/// so values issued and since deleted are never reused. Columns the
/// destination lacks fall back to the global maximum.
#[derive(Debug, Default, Clone, Copy)]
pub struct DestinationLastValuePolicy;

#[async_trait]
impl OffsetPolicy for DestinationLastValuePolicy {
    fn name(&self) -> &'static str {
        "destination_last_value"
    }

    async fn compute(
        &self,
        source: &dyn SchemaCatalog,
        destination: &dyn SchemaCatalog,
    ) -> Result<OffsetPlan> {
        let last_values = destination.last_identity_values().await?;
        let destination_maxima = identity_maxima(destination).await?;
        let source_max = max_identity(source).await?;

        let mut plan = OffsetPlan::default();
        let mut global = source_max;
        for identity in destination_maxima {
            let key = identity.column.key();
            let last = last_values.get(&key).copied();
            let offset = match (last, identity.current_max) {
                (Some(a), Some(b)) => a.max(b),
                (Some(a), None) | (None, Some(a)) => a,
                (None, None) => 0,
            };
            global = global.max(offset);
            plan = plan.with_column(key, offset);
        }
        plan.default = global;

        info!(
            "Per-column offsets for {} columns, default {}",
            plan.per_column.len(),
            plan.default
        );
        Ok(plan)
    }
}

/// Policy selected by configuration.
pub fn policy_for(strategy: OffsetStrategy) -> Box<dyn OffsetPolicy> {
    match strategy {
        OffsetStrategy::MaxIdentity => Box::new(MaxIdentityPolicy),
        OffsetStrategy::DestinationLastValue => Box::new(DestinationLastValuePolicy),
    }
}
