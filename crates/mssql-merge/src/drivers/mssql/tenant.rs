//! Organization rows for tenant bootstrap.

use async_trait::async_trait;

use super::MssqlDatabase;
use crate::config::Organization;
use crate::core::ddl;
use crate::core::schema::Table;
use crate::core::traits::TenantStore;
use crate::error::{MergeError, Result};

#[async_trait]
impl TenantStore for MssqlDatabase {
    async fn organization_exists(&self, table: &Table, id: i32) -> Result<bool> {
        let sql = ddl::organization_exists(table)?;
        let rows = self.query(&sql, &[&id]).await?;
        Ok(rows
            .first()
            .and_then(|row| row.get::<i32, _>(0))
            .unwrap_or(0)
            > 0)
    }

    async fn insert_organization(&self, table: &Table, organization: &Organization) -> Result<()> {
        let sql = ddl::insert_organization(table)?;
        self.execute_raw(
            &sql,
            &[
                &organization.id,
                &organization.eng_name.as_str(),
                &organization.loc_name.as_str(),
                &organization.last_status_id,
            ],
        )
        .await
        .map_err(|e| MergeError::copy(table.full_name(), e))?;
        Ok(())
    }
}
