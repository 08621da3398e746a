//! Schema catalog over SQL Server system views.

use std::collections::HashMap;

use async_trait::async_trait;
use tiberius::{Row, ToSql};
use tracing::debug;

use super::MssqlDatabase;
use crate::core::ddl;
use crate::core::identifier::Ident;
use crate::core::schema::{Column, ColumnKey, ForeignKeyReference, PrimaryKey, Table};
use crate::core::traits::SchemaCatalog;
use crate::error::{MergeError, Result};

/// Read a string column, failing on NULL so a malformed catalog row is never
/// turned into an empty identifier.
fn text(row: &Row, idx: usize) -> Result<String> {
    row.get::<&str, _>(idx)
        .map(str::to_string)
        .ok_or_else(|| MergeError::Catalog(format!("unexpected NULL in catalog column {}", idx)))
}

fn flag(row: &Row, idx: usize) -> bool {
    row.get::<i32, _>(idx).unwrap_or(0) == 1
}

/// Declared type of `c`, with precision and scale for exact numerics.
const TYPE_DECLARATION: &str = r#"
    CASE WHEN TYPE_NAME(c.system_type_id) IN ('decimal', 'numeric')
        THEN TYPE_NAME(c.system_type_id)
            + '(' + CAST(c.precision AS varchar(3)) + ',' + CAST(c.scale AS varchar(3)) + ')'
        ELSE TYPE_NAME(c.system_type_id)
    END
"#;

const PK_MEMBERSHIP: &str = r#"
    CAST(CASE WHEN EXISTS (
        SELECT 1
        FROM sys.index_columns ic
        JOIN sys.indexes i ON i.object_id = ic.object_id AND i.index_id = ic.index_id
        WHERE i.is_primary_key = 1 AND ic.object_id = c.object_id AND ic.column_id = c.column_id
    ) THEN 1 ELSE 0 END AS INT)
"#;

#[async_trait]
impl SchemaCatalog for MssqlDatabase {
    fn database_name(&self) -> &str {
        &self.database
    }

    fn schema(&self) -> &str {
        &self.schema
    }

    async fn list_tables(&self) -> Result<Vec<Table>> {
        let query = r#"
            SELECT
                t.name,
                CAST(CASE WHEN EXISTS (
                    SELECT 1 FROM sys.identity_columns ic WHERE ic.object_id = t.object_id
                ) THEN 1 ELSE 0 END AS INT)
            FROM sys.tables t
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE s.name = @P1
            ORDER BY t.name
        "#;

        let rows = self.query(query, &[&self.schema.as_str()]).await?;
        let tables = rows
            .iter()
            .map(|row| Ok(Table::new(&self.schema, text(row, 0)?, flag(row, 1))))
            .collect::<Result<Vec<_>>>()?;

        debug!("Listed {} tables in {}.{}", tables.len(), self.database, self.schema);
        Ok(tables)
    }

    async fn list_identity_columns(&self) -> Result<Vec<Column>> {
        let query = format!(
            r#"
            SELECT {ty}, s.name, t.name, c.name, {pk}
            FROM sys.columns c
            JOIN sys.tables t ON c.object_id = t.object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE c.is_identity = 1 AND s.name = @P1
            ORDER BY s.name, t.name, c.name
            "#,
            ty = TYPE_DECLARATION,
            pk = PK_MEMBERSHIP
        );

        let rows = self.query(&query, &[&self.schema.as_str()]).await?;
        rows.iter()
            .map(|row| {
                Ok(Column {
                    schema: text(row, 1)?,
                    table: text(row, 2)?,
                    name: text(row, 3)?,
                    is_identity: true,
                    data_type: Some(text(row, 0)?),
                    is_primary_key: flag(row, 4),
                })
            })
            .collect()
    }

    async fn list_columns_by_name(&self, name: &str) -> Result<Vec<Column>> {
        let query = format!(
            r#"
            SELECT s.name, t.name, c.name, {ty}, c.is_identity, {pk}
            FROM sys.columns c
            JOIN sys.tables t ON c.object_id = t.object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE c.name = @P1
            ORDER BY s.name, t.name
            "#,
            ty = TYPE_DECLARATION,
            pk = PK_MEMBERSHIP
        );

        let rows = self.query(&query, &[&name]).await?;
        rows.iter()
            .map(|row| {
                Ok(Column {
                    schema: text(row, 0)?,
                    table: text(row, 1)?,
                    name: text(row, 2)?,
                    is_identity: row.get::<bool, _>(4).unwrap_or(false),
                    data_type: row.get::<&str, _>(3).map(str::to_string),
                    is_primary_key: flag(row, 5),
                })
            })
            .collect()
    }

    async fn list_foreign_key_references(
        &self,
        parent: Option<&Column>,
        active_only: bool,
    ) -> Result<Vec<ForeignKeyReference>> {
        let mut query = String::from(
            r#"
            SELECT
                fk.name,
                ps.name, pt.name, pc.name,
                cs.name, ct.name, cc.name
            FROM sys.foreign_keys fk
            JOIN sys.foreign_key_columns fkc ON fkc.constraint_object_id = fk.object_id
            JOIN sys.tables ct ON ct.object_id = fkc.parent_object_id
            JOIN sys.schemas cs ON cs.schema_id = ct.schema_id
            JOIN sys.columns cc ON cc.object_id = ct.object_id AND cc.column_id = fkc.parent_column_id
            JOIN sys.tables pt ON pt.object_id = fkc.referenced_object_id
            JOIN sys.schemas ps ON ps.schema_id = pt.schema_id
            JOIN sys.columns pc ON pc.object_id = pt.object_id AND pc.column_id = fkc.referenced_column_id
            WHERE cs.name = @P1
            "#,
        );

        let mut params: Vec<&dyn ToSql> = vec![&self.schema];
        if let Some(column) = parent {
            query.push_str(" AND ps.name = @P2 AND pt.name = @P3 AND pc.name = @P4");
            params.push(&column.schema);
            params.push(&column.table);
            params.push(&column.name);
        }
        if active_only {
            query.push_str(" AND fk.is_disabled = 0");
        }
        query.push_str(" ORDER BY cs.name, ct.name, fk.name, fkc.constraint_column_id");

        let rows = self.query(&query, &params).await?;
        let refs = rows
            .iter()
            .map(|row| {
                Ok(ForeignKeyReference {
                    constraint_name: text(row, 0)?,
                    pk_schema: text(row, 1)?,
                    pk_table: text(row, 2)?,
                    pk_column: text(row, 3)?,
                    fk_schema: text(row, 4)?,
                    fk_table: text(row, 5)?,
                    fk_column: text(row, 6)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Found {} foreign key references{}",
            refs.len(),
            parent
                .map(|c| format!(" to {}", c.full_name()))
                .unwrap_or_default()
        );
        Ok(refs)
    }

    async fn list_trigger_bearing_tables(&self) -> Result<Vec<Table>> {
        let query = r#"
            SELECT DISTINCT s.name, t.name
            FROM sys.triggers tr
            JOIN sys.tables t ON t.object_id = tr.parent_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE tr.is_ms_shipped = 0 AND tr.parent_class = 1 AND s.name = @P1
            ORDER BY t.name
        "#;

        let rows = self.query(query, &[&self.schema.as_str()]).await?;
        rows.iter()
            .map(|row| Ok(Table::new(text(row, 0)?, text(row, 1)?, false)))
            .collect()
    }

    async fn is_primary_key(&self, column: &Column) -> Result<bool> {
        let query = r#"
            SELECT COUNT(*)
            FROM INFORMATION_SCHEMA.TABLE_CONSTRAINTS tc
            JOIN INFORMATION_SCHEMA.KEY_COLUMN_USAGE k
                ON k.CONSTRAINT_NAME = tc.CONSTRAINT_NAME
                AND k.CONSTRAINT_SCHEMA = tc.CONSTRAINT_SCHEMA
                AND k.TABLE_NAME = tc.TABLE_NAME
            WHERE tc.CONSTRAINT_TYPE = 'PRIMARY KEY'
              AND k.TABLE_SCHEMA = @P1
              AND k.TABLE_NAME = @P2
              AND k.COLUMN_NAME = @P3
        "#;

        let rows = self
            .query(query, &[&column.schema, &column.table, &column.name])
            .await?;
        Ok(rows
            .first()
            .and_then(|row| row.get::<i32, _>(0))
            .unwrap_or(0)
            > 0)
    }

    async fn primary_key(&self, table: &Table) -> Result<Option<PrimaryKey>> {
        let query = r#"
            SELECT
                kc.name,
                c.name,
                CAST(CASE WHEN i.type = 1 THEN 1 ELSE 0 END AS INT)
            FROM sys.key_constraints kc
            JOIN sys.tables t ON t.object_id = kc.parent_object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            JOIN sys.indexes i ON i.object_id = kc.parent_object_id AND i.index_id = kc.unique_index_id
            JOIN sys.index_columns ic ON ic.object_id = i.object_id AND ic.index_id = i.index_id
            JOIN sys.columns c ON c.object_id = ic.object_id AND c.column_id = ic.column_id
            WHERE kc.type = 'PK' AND s.name = @P1 AND t.name = @P2
            ORDER BY ic.key_ordinal
        "#;

        let rows = self.query(query, &[&table.schema, &table.name]).await?;
        let Some(first) = rows.first() else {
            return Ok(None);
        };

        Ok(Some(PrimaryKey {
            schema: table.schema.clone(),
            table: table.name.clone(),
            constraint_name: text(first, 0)?,
            columns: rows.iter().map(|r| text(r, 1)).collect::<Result<_>>()?,
            clustered: flag(first, 2),
        }))
    }

    async fn list_copyable_columns(&self, table: &Table) -> Result<Vec<String>> {
        let query = r#"
            SELECT c.name
            FROM sys.columns c
            JOIN sys.tables t ON t.object_id = c.object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE s.name = @P1 AND t.name = @P2
              AND c.is_computed = 0
              AND TYPE_NAME(c.system_type_id) <> 'timestamp'
            ORDER BY c.column_id
        "#;

        let rows = self.query(query, &[&table.schema, &table.name]).await?;
        rows.iter().map(|row| text(row, 0)).collect()
    }

    async fn max_value(&self, column: &Column) -> Result<Option<i64>> {
        let query = format!(
            "SELECT CAST(MAX({}) AS BIGINT) FROM {}",
            Ident::new(column.name.as_str())?,
            ddl::qualified(&column.schema, &column.table)?
        );

        let rows = self.query(&query, &[]).await?;
        Ok(rows.first().and_then(|row| row.get::<i64, _>(0)))
    }

    async fn last_identity_values(&self) -> Result<HashMap<ColumnKey, i64>> {
        let query = r#"
            SELECT s.name, t.name, ic.name, CAST(ic.last_value AS BIGINT)
            FROM sys.identity_columns ic
            JOIN sys.tables t ON t.object_id = ic.object_id
            JOIN sys.schemas s ON s.schema_id = t.schema_id
            WHERE s.name = @P1 AND ic.last_value IS NOT NULL
        "#;

        let rows = self.query(query, &[&self.schema.as_str()]).await?;
        let mut values = HashMap::with_capacity(rows.len());
        for row in &rows {
            if let Some(last) = row.get::<i64, _>(3) {
                values.insert(
                    ColumnKey::new(&text(row, 0)?, &text(row, 1)?, &text(row, 2)?),
                    last,
                );
            }
        }
        Ok(values)
    }
}
