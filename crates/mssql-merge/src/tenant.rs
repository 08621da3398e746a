//! Tenant bootstrap: the organization row and the tenant column.

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{MergeConfig, Organization, TenantConfig};
use crate::core::schema::Table;
use crate::core::traits::MergeDatabase;
use crate::error::Result;

/// Rows stamped with the tenant id in one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantStamp {
    pub table: String,
    pub rows_updated: u64,
}

/// Insert the organization row unless a row with its id already exists.
///
/// Returns whether a row was inserted.
pub async fn ensure_organization(
    db: &dyn MergeDatabase,
    table_name: &str,
    organization: &Organization,
) -> Result<bool> {
    let table = Table::new(db.schema(), table_name, true);
    if db.organization_exists(&table, organization.id).await? {
        debug!(
            "Organization {} already present in {}",
            organization.id,
            db.database_name()
        );
        return Ok(false);
    }

    db.set_identity_insert(&table, true).await?;
    let inserted = db.insert_organization(&table, organization).await;
    let released = db.set_identity_insert(&table, false).await;
    inserted?;
    released?;

    info!(
        "Inserted organization {} ({}) into {}",
        organization.id,
        organization.eng_name,
        db.database_name()
    );
    Ok(true)
}

/// Set `column` to `tenant_id` on every row of every non-excluded table that has it.
pub async fn stamp_tenant_column(
    db: &dyn MergeDatabase,
    column: &str,
    tenant_id: i32,
    merge: &MergeConfig,
) -> Result<Vec<TenantStamp>> {
    let mut stamps = Vec::new();
    for target in db.list_columns_by_name(column).await? {
        if merge.is_excluded(&target.table) {
            debug!("Skipping excluded table {}", target.table);
            continue;
        }
        let rows = db.set_column_value(&target, i64::from(tenant_id)).await?;
        info!("{} is set in table {}: {} rows", column, target.table, rows);
        stamps.push(TenantStamp {
            table: format!("{}.{}", target.schema, target.table),
            rows_updated: rows,
        });
    }
    info!("Done setting {} in {}", column, db.database_name());
    Ok(stamps)
}

/// Ensure the organization exists in both databases, then stamp the source.
pub async fn bootstrap(
    source: &dyn MergeDatabase,
    destination: &dyn MergeDatabase,
    tenant: &TenantConfig,
    merge: &MergeConfig,
) -> Result<Vec<TenantStamp>> {
    for db in [source, destination] {
        ensure_organization(db, &tenant.organization_table, &tenant.organization).await?;
    }
    stamp_tenant_column(source, &tenant.column, tenant.organization.id, merge).await
}
