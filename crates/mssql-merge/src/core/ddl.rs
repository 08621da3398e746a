//! Statement builder for every schema-altering and copy statement the engine runs.
//!
//! Each function validates its identifiers through [`Ident`] and returns the
//! finished T-SQL text. Data values that are not engine-computed integers are
//! never rendered here; callers bind them as parameters.

use crate::core::identifier::Ident;
use crate::core::schema::{Column, ForeignKeyReference, PrimaryKey, Table};
use crate::error::{MergeError, Result};

/// `[schema].[table]`
pub fn qualified(schema: &str, table: &str) -> Result<String> {
    Ok(format!("{}.{}", Ident::new(schema)?, Ident::new(table)?))
}

fn column_table(column: &Column) -> Result<String> {
    qualified(&column.schema, &column.table)
}

fn column_list(columns: &[String], prefix: &str) -> Result<String> {
    if columns.is_empty() {
        return Err(MergeError::Catalog("empty column list".to_string()));
    }
    let quoted = columns
        .iter()
        .map(|c| Ident::new(c.as_str()).map(|i| format!("{}{}", prefix, i)))
        .collect::<Result<Vec<_>>>()?;
    Ok(quoted.join(", "))
}

/// Validate a type declaration from the catalog: a bare `sys.types` name
/// (`int`, `bigint`) or a name with precision and scale (`numeric(10,0)`).
fn type_name(column: &Column) -> Result<&str> {
    let data_type = column.data_type.as_deref().ok_or_else(|| {
        MergeError::Catalog(format!("no data type known for {}", column.full_name()))
    })?;

    let (base, args) = match data_type.split_once('(') {
        Some((base, rest)) => (base, rest.strip_suffix(')')),
        None => (data_type, Some("")),
    };
    let valid_base =
        !base.is_empty() && base.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    let valid_args = args.is_some_and(|args| {
        args.is_empty()
            || (args.split(',').count() <= 2
                && args
                    .split(',')
                    .all(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())))
    });
    if !valid_base || !valid_args || data_type.ends_with("()") {
        return Err(MergeError::Catalog(format!(
            "unexpected data type {:?} for {}",
            data_type,
            column.full_name()
        )));
    }
    Ok(data_type)
}

/// Add a non-null column with the column's data type.
///
/// The placeholder default fills existing rows until values are copied in.
pub fn add_column(column: &Column) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} ADD {} {} NOT NULL DEFAULT(1);",
        column_table(column)?,
        Ident::new(column.name.as_str())?,
        type_name(column)?
    ))
}

/// Drop the default constraint attached to a column, if any.
pub fn drop_default_constraint(column: &Column) -> Result<String> {
    let table = column_table(column)?;
    Ok(format!(
        "DECLARE @df sysname = (SELECT dc.name FROM sys.default_constraints dc \
         JOIN sys.columns c ON c.object_id = dc.parent_object_id AND c.column_id = dc.parent_column_id \
         WHERE dc.parent_object_id = OBJECT_ID(N'{table_lit}') AND c.name = @P1); \
         IF @df IS NOT NULL EXEC(N'ALTER TABLE {table_lit} DROP CONSTRAINT [' + REPLACE(@df, ']', ']]') + N']');",
        table_lit = table.replace('\'', "''")
    ))
}

/// Copy every row's value from one column to another on the same table.
pub fn copy_column_values(from: &Column, to: &Column) -> Result<String> {
    Ok(format!(
        "UPDATE {} SET {} = {};",
        column_table(to)?,
        Ident::new(to.name.as_str())?,
        Ident::new(from.name.as_str())?
    ))
}

pub fn drop_column(column: &Column) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} DROP COLUMN {};",
        column_table(column)?,
        Ident::new(column.name.as_str())?
    ))
}

/// `sp_rename` call plus its object-name argument.
///
/// The new name is bound as `@P2`, the object name as `@P1`.
pub fn rename_column(column: &Column, new_name: &str) -> Result<(String, String)> {
    Ident::new(new_name)?;
    let object_name = format!(
        "{}.{}",
        column_table(column)?,
        Ident::new(column.name.as_str())?
    );
    Ok((
        "EXEC sp_rename @P1, @P2, 'COLUMN';".to_string(),
        object_name,
    ))
}

/// Shift every value of a column by `offset`.
pub fn increment_column(column: &Column, offset: i64) -> Result<String> {
    let name = Ident::new(column.name.as_str())?;
    Ok(format!(
        "UPDATE {} SET {} = ({} + {}) WHERE {} IS NOT NULL;",
        column_table(column)?,
        name,
        name,
        offset,
        name
    ))
}

/// Set a column to the bound value `@P1` on every row.
pub fn set_column_value(column: &Column) -> Result<String> {
    Ok(format!(
        "UPDATE {} SET {} = @P1;",
        column_table(column)?,
        Ident::new(column.name.as_str())?
    ))
}

pub fn drop_constraint(schema: &str, table: &str, constraint: &str) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} DROP CONSTRAINT {};",
        qualified(schema, table)?,
        Ident::new(constraint)?
    ))
}

/// Disable enforcement of a foreign key.
pub fn nocheck_constraint(reference: &ForeignKeyReference) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} NOCHECK CONSTRAINT {};",
        qualified(&reference.fk_schema, &reference.fk_table)?,
        Ident::new(reference.constraint_name.as_str())?
    ))
}

/// Re-enable a foreign key, validating existing rows.
pub fn check_constraint(reference: &ForeignKeyReference) -> Result<String> {
    Ok(format!(
        "ALTER TABLE {} WITH CHECK CHECK CONSTRAINT {};",
        qualified(&reference.fk_schema, &reference.fk_table)?,
        Ident::new(reference.constraint_name.as_str())?
    ))
}

/// Create one foreign key from the column pairs of a single constraint.
///
/// `ON UPDATE CASCADE` is never attached to a self-reference.
pub fn add_foreign_key(
    group: &[&ForeignKeyReference],
    cascade_on_update: bool,
    validate_existing: bool,
) -> Result<String> {
    let first = group
        .first()
        .ok_or_else(|| MergeError::Catalog("empty foreign key group".to_string()))?;
    let fk_columns: Vec<String> = group.iter().map(|r| r.fk_column.clone()).collect();
    let pk_columns: Vec<String> = group.iter().map(|r| r.pk_column.clone()).collect();

    let check = if validate_existing {
        "WITH CHECK"
    } else {
        "WITH NOCHECK"
    };
    let cascade = if cascade_on_update && !first.is_self_reference() {
        " ON UPDATE CASCADE"
    } else {
        ""
    };

    Ok(format!(
        "ALTER TABLE {} {} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {} ({}){};",
        qualified(&first.fk_schema, &first.fk_table)?,
        check,
        Ident::new(first.constraint_name.as_str())?,
        column_list(&fk_columns, "")?,
        qualified(&first.pk_schema, &first.pk_table)?,
        column_list(&pk_columns, "")?,
        cascade
    ))
}

pub fn add_primary_key(pk: &PrimaryKey) -> Result<String> {
    let kind = if pk.clustered {
        "CLUSTERED"
    } else {
        "NONCLUSTERED"
    };
    Ok(format!(
        "ALTER TABLE {} ADD CONSTRAINT {} PRIMARY KEY {} ({});",
        qualified(&pk.schema, &pk.table)?,
        Ident::new(pk.constraint_name.as_str())?,
        kind,
        column_list(&pk.columns, "")?
    ))
}

pub fn identity_insert(table: &Table, enabled: bool) -> Result<String> {
    Ok(format!(
        "SET IDENTITY_INSERT {} {};",
        qualified(&table.schema, &table.name)?,
        if enabled { "ON" } else { "OFF" }
    ))
}

pub fn database_triggers(enabled: bool) -> &'static str {
    if enabled {
        "ENABLE TRIGGER ALL ON DATABASE;"
    } else {
        "DISABLE TRIGGER ALL ON DATABASE;"
    }
}

pub fn table_triggers(table: &Table, enabled: bool) -> Result<String> {
    Ok(format!(
        "{} TRIGGER ALL ON {};",
        if enabled { "ENABLE" } else { "DISABLE" },
        qualified(&table.schema, &table.name)?
    ))
}

/// Copy a whole table from another database on the same server.
///
/// The same column list is used for the insert target and the select source.
pub fn insert_select(source_database: &str, table: &Table, columns: &[String]) -> Result<String> {
    let list = column_list(columns, "")?;
    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}.{};",
        qualified(&table.schema, &table.name)?,
        list,
        list,
        Ident::new(source_database)?,
        qualified(&table.schema, &table.name)?
    ))
}

/// Copy only the source rows whose key is not yet present in the destination.
pub fn insert_missing(
    source_database: &str,
    table: &Table,
    columns: &[String],
    key_columns: &[String],
) -> Result<String> {
    if key_columns.is_empty() {
        return Err(MergeError::Catalog(format!(
            "no key columns to match rows of {}",
            table.full_name()
        )));
    }
    let target = qualified(&table.schema, &table.name)?;
    let join = key_columns
        .iter()
        .map(|k| Ident::new(k.as_str()).map(|i| format!("dst.{} = src.{}", i, i)))
        .collect::<Result<Vec<_>>>()?
        .join(" AND ");

    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}.{} AS src WHERE NOT EXISTS (SELECT 1 FROM {} AS dst WHERE {});",
        target,
        column_list(columns, "")?,
        column_list(columns, "src.")?,
        Ident::new(source_database)?,
        target,
        target,
        join
    ))
}

/// Count organization rows with the bound id `@P1`.
pub fn organization_exists(table: &Table) -> Result<String> {
    Ok(format!(
        "SELECT COUNT(*) FROM {} WHERE [Id] = @P1;",
        qualified(&table.schema, &table.name)?
    ))
}

/// Insert an active organization; id, names and status are bound as `@P1`..`@P4`.
pub fn insert_organization(table: &Table) -> Result<String> {
    Ok(format!(
        "INSERT INTO {} ([Id], [EngName], [LocName], [IsActive], [LastStatusId]) VALUES (@P1, @P2, @P3, 1, @P4);",
        qualified(&table.schema, &table.name)?
    ))
}
