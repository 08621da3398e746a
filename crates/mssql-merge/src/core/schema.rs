//! Schema metadata types produced by catalog introspection.
//!
//! Values here are immutable snapshots. A rename yields a new [`Column`];
//! nothing is cached across structural changes.

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// A user table that may need copying.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Whether the table owns an identity column.
    pub has_identity: bool,
}

impl Table {
    pub fn new(schema: impl Into<String>, name: impl Into<String>, has_identity: bool) -> Self {
        Self {
            schema: schema.into(),
            name: name.into(),
            has_identity,
        }
    }

    /// Get the fully qualified table name.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }
}

/// One attribute of a table.
///
/// Used both for introspection results and as the handle for column DDL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    /// Schema name.
    pub schema: String,

    /// Owning table name.
    pub table: String,

    /// Column name.
    pub name: String,

    /// Whether values are generated by the engine.
    pub is_identity: bool,

    /// Declared data type (e.g. "int", "bigint"), when known.
    pub data_type: Option<String>,

    /// Whether the column participates in the table's primary key.
    pub is_primary_key: bool,
}

impl Column {
    /// A plain column handle with no type information, used for child FK columns.
    pub fn plain(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            is_identity: false,
            data_type: None,
            is_primary_key: false,
        }
    }

    /// An identity column handle.
    pub fn identity(
        schema: impl Into<String>,
        table: impl Into<String>,
        name: impl Into<String>,
        data_type: impl Into<String>,
    ) -> Self {
        Self {
            is_identity: true,
            data_type: Some(data_type.into()),
            ..Self::plain(schema, table, name)
        }
    }

    /// A non-identity column with the same table and type under another name.
    pub fn shadow(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_identity: false,
            is_primary_key: false,
            ..self.clone()
        }
    }

    /// The same column under a new name. Callers rebind the handle after a rename.
    pub fn renamed(&self, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..self.clone()
        }
    }

    /// Key identifying this column in per-column maps.
    pub fn key(&self) -> ColumnKey {
        ColumnKey::new(&self.schema, &self.table, &self.name)
    }

    /// `schema.table.column`, for log lines.
    pub fn full_name(&self) -> String {
        format!("{}.{}.{}", self.schema, self.table, self.name)
    }
}

/// Hashable `(schema, table, column)` key.
///
/// Equality and hashing ignore ASCII case, like SQL Server's default collation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnKey {
    pub schema: String,
    pub table: String,
    pub column: String,
}

impl ColumnKey {
    pub fn new(schema: &str, table: &str, column: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
        }
    }
}

impl PartialEq for ColumnKey {
    fn eq(&self, other: &Self) -> bool {
        self.schema.eq_ignore_ascii_case(&other.schema)
            && self.table.eq_ignore_ascii_case(&other.table)
            && self.column.eq_ignore_ascii_case(&other.column)
    }
}

impl Eq for ColumnKey {}

impl Hash for ColumnKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.schema.to_ascii_lowercase().hash(state);
        self.table.to_ascii_lowercase().hash(state);
        self.column.to_ascii_lowercase().hash(state);
    }
}

impl fmt::Display for ColumnKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.schema, self.table, self.column)
    }
}

/// An identity column together with the largest value it currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityColumn {
    pub column: Column,

    /// `MAX(column)`, or `None` for an empty table.
    pub current_max: Option<i64>,
}

/// A foreign-key edge from a child column to a parent column.
///
/// A composite constraint shows up as several references sharing one
/// `constraint_name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ForeignKeyReference {
    pub pk_schema: String,
    pub pk_table: String,
    pub pk_column: String,
    pub fk_schema: String,
    pub fk_table: String,
    pub fk_column: String,
    pub constraint_name: String,
}

impl ForeignKeyReference {
    /// Parent and child are the same table.
    pub fn is_self_reference(&self) -> bool {
        self.pk_schema.eq_ignore_ascii_case(&self.fk_schema)
            && self.pk_table.eq_ignore_ascii_case(&self.fk_table)
    }

    /// Whether the parent side of this pair is the given column.
    pub fn references(&self, column: &Column) -> bool {
        self.pk_schema.eq_ignore_ascii_case(&column.schema)
            && self.pk_table.eq_ignore_ascii_case(&column.table)
            && self.pk_column.eq_ignore_ascii_case(&column.name)
    }

    /// The child column as a column handle.
    pub fn child_column(&self) -> Column {
        Column::plain(&self.fk_schema, &self.fk_table, &self.fk_column)
    }

    /// `(schema, table, constraint)` identity of the owning constraint.
    pub fn constraint_key(&self) -> (String, String, String) {
        (
            self.fk_schema.to_ascii_lowercase(),
            self.fk_table.to_ascii_lowercase(),
            self.constraint_name.to_ascii_lowercase(),
        )
    }
}

/// A primary key constraint, captured so it can be recreated after a rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrimaryKey {
    pub schema: String,
    pub table: String,
    pub constraint_name: String,

    /// Key columns in key order.
    pub columns: Vec<String>,

    pub clustered: bool,
}

impl PrimaryKey {
    /// Whether the key includes the given column.
    pub fn contains(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }
}

/// Group references by owning constraint, preserving first-seen order.
pub fn group_by_constraint(refs: &[ForeignKeyReference]) -> Vec<Vec<&ForeignKeyReference>> {
    let mut groups: Vec<Vec<&ForeignKeyReference>> = Vec::new();
    for reference in refs {
        let key = reference.constraint_key();
        match groups
            .iter_mut()
            .find(|g| g[0].constraint_key() == key)
        {
            Some(group) => {
                if !group.iter().any(|r| r.fk_column.eq_ignore_ascii_case(&reference.fk_column)) {
                    group.push(reference);
                }
            }
            None => groups.push(vec![reference]),
        }
    }
    groups
}

/// Child columns of the given references, each listed once.
pub fn distinct_child_columns(refs: &[ForeignKeyReference]) -> Vec<Column> {
    let mut seen: Vec<ColumnKey> = Vec::new();
    let mut columns = Vec::new();
    for reference in refs {
        let column = reference.child_column();
        let key = column.key();
        if !seen.contains(&key) {
            seen.push(key);
            columns.push(column);
        }
    }
    columns
}
