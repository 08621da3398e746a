//! In-memory server with SQL Server's observable merge semantics, for tests.
//!
//! Every database lives in one shared [`MemoryServer`] so cross-database
//! copies resolve the same way they do on a real instance. Names compare
//! case-insensitively and only the `dbo` schema exists.
//!
//! Modelled behaviour:
//! - inserts and updates are statement-atomic; a failing statement keeps no rows
//! - primary key collisions raise `DuplicateKey`
//! - explicit identity values need `IDENTITY_INSERT` on, one table per session
//! - enabled foreign keys are enforced on insert, update and `WITH CHECK` enable
//! - a column cannot be dropped while a key or default depends on it
//! - a primary key cannot be dropped while a foreign key references it
//! - a new foreign key must reference exactly the parent's primary key columns

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::core::schema::{
    group_by_constraint, Column, ColumnKey, ForeignKeyReference, PrimaryKey, Table,
};
use crate::config::Organization;
use crate::core::traits::{ConstraintController, RowCopier, SchemaCatalog, TenantStore};
use crate::error::{MergeError, Result};

pub(crate) const SCHEMA: &str = "dbo";

/// Column values keyed by lowercase column name.
type Row = BTreeMap<String, Option<i64>>;

fn norm(name: &str) -> String {
    name.to_ascii_lowercase()
}

fn value(row: &Row, column: &str) -> Option<i64> {
    row.get(&norm(column)).copied().flatten()
}

#[derive(Debug, Clone)]
struct MemColumn {
    name: String,
    identity: bool,
    computed: bool,
    has_default: bool,
}

#[derive(Debug, Clone)]
struct MemTable {
    name: String,
    columns: Vec<MemColumn>,
    rows: Vec<Row>,
    primary_key: Option<PrimaryKey>,
    has_trigger: bool,
    triggers_enabled: bool,
    last_identity: Option<i64>,
    trigger_fires: usize,
}

impl MemTable {
    fn column(&self, name: &str) -> Option<&MemColumn> {
        self.columns
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    fn identity_column(&self) -> Option<&MemColumn> {
        self.columns.iter().find(|c| c.identity)
    }

    fn key(&self, row: &Row) -> Option<Vec<Option<i64>>> {
        self.primary_key
            .as_ref()
            .map(|pk| pk.columns.iter().map(|c| value(row, c)).collect())
    }

    fn duplicate_key(&self) -> Option<String> {
        let pk = self.primary_key.as_ref()?;
        let mut seen = HashSet::new();
        for row in &self.rows {
            let key = self.key(row)?;
            if !seen.insert(key.clone()) {
                return Some(format!(
                    "Violation of PRIMARY KEY constraint '{}'. Cannot insert duplicate key in object 'dbo.{}'. The duplicate key value is {:?}.",
                    pk.constraint_name, self.name, key
                ));
            }
        }
        None
    }
}

#[derive(Debug, Clone)]
struct MemForeignKey {
    reference: ForeignKeyReference,
    enabled: bool,
    cascade_on_update: bool,
}

enum InsertError {
    Duplicate(String),
    Other(String),
}

#[derive(Debug)]
struct MemDb {
    tables: BTreeMap<String, MemTable>,
    foreign_keys: Vec<MemForeignKey>,
    database_triggers_enabled: bool,
    identity_insert: Option<String>,
    failing_copies: HashSet<String>,
    failing_disables: HashSet<String>,
}

impl MemDb {
    fn new() -> Self {
        Self {
            tables: BTreeMap::new(),
            foreign_keys: Vec::new(),
            database_triggers_enabled: true,
            identity_insert: None,
            failing_copies: HashSet::new(),
            failing_disables: HashSet::new(),
        }
    }

    fn table(&self, name: &str) -> std::result::Result<&MemTable, String> {
        self.tables
            .get(&norm(name))
            .ok_or_else(|| format!("Invalid object name 'dbo.{}'.", name))
    }

    fn table_mut(&mut self, name: &str) -> std::result::Result<&mut MemTable, String> {
        self.tables
            .get_mut(&norm(name))
            .ok_or_else(|| format!("Invalid object name 'dbo.{}'.", name))
    }

    fn has_constraint(&self, reference: &ForeignKeyReference) -> bool {
        let key = reference.constraint_key();
        self.foreign_keys
            .iter()
            .any(|fk| fk.reference.constraint_key() == key)
    }

    /// First child row of the constraint with no matching parent row.
    fn orphan(&self, group: &[&ForeignKeyReference]) -> Option<String> {
        let first = group.first()?;
        let child = self.tables.get(&norm(&first.fk_table))?;
        let parent = self.tables.get(&norm(&first.pk_table));

        for row in &child.rows {
            let values: Option<Vec<i64>> = group.iter().map(|r| value(row, &r.fk_column)).collect();
            let Some(values) = values else { continue };
            let found = parent.is_some_and(|p| {
                p.rows.iter().any(|prow| {
                    group
                        .iter()
                        .zip(&values)
                        .all(|(r, v)| value(prow, &r.pk_column) == Some(*v))
                })
            });
            if !found {
                return Some(format!(
                    "The statement conflicted with the FOREIGN KEY constraint \"{}\". Value {:?} has no parent row.",
                    first.constraint_name, values
                ));
            }
        }
        None
    }

    /// Validate every enabled constraint for which `touches` holds on one of its column pairs.
    fn check_foreign_keys(
        &self,
        touches: impl Fn(&ForeignKeyReference) -> bool,
    ) -> std::result::Result<(), String> {
        let enabled: Vec<ForeignKeyReference> = self
            .foreign_keys
            .iter()
            .filter(|fk| fk.enabled)
            .map(|fk| fk.reference.clone())
            .collect();
        for group in group_by_constraint(&enabled) {
            if !group.iter().any(|r| touches(*r)) {
                continue;
            }
            if let Some(message) = self.orphan(&group) {
                return Err(message);
            }
        }
        Ok(())
    }

    /// Apply `f` to one column of every row; `None` from `f` leaves the row alone.
    fn update_column(
        &mut self,
        column: &Column,
        f: impl Fn(Option<i64>) -> Option<Option<i64>>,
    ) -> std::result::Result<u64, String> {
        let key = norm(&column.name);
        let table = self.table_mut(&column.table)?;
        let meta = table
            .column(&column.name)
            .ok_or_else(|| format!("Invalid column name '{}'.", column.name))?;
        if meta.identity {
            return Err(format!("Cannot update identity column '{}'.", column.name));
        }

        let snapshot = table.rows.clone();
        let mut affected = 0u64;
        for row in &mut table.rows {
            let current = row.get(&key).copied().flatten();
            if let Some(next) = f(current) {
                row.insert(key.clone(), next);
                affected += 1;
            }
        }

        let failure = table.duplicate_key().or_else(|| {
            self.check_foreign_keys(|r| {
                (r.fk_table.eq_ignore_ascii_case(&column.table)
                    && r.fk_column.eq_ignore_ascii_case(&column.name))
                    || (r.pk_table.eq_ignore_ascii_case(&column.table)
                        && r.pk_column.eq_ignore_ascii_case(&column.name))
            })
            .err()
        });

        if let Some(message) = failure {
            if let Ok(table) = self.table_mut(&column.table) {
                table.rows = snapshot;
            }
            return Err(message);
        }
        Ok(affected)
    }

    fn insert_rows(
        &mut self,
        table_name: &str,
        columns: &[String],
        source_rows: Vec<Row>,
    ) -> std::result::Result<u64, InsertError> {
        if self.failing_copies.contains(&norm(table_name)) {
            return Err(InsertError::Other(format!(
                "Transport-level error while copying into '{}'.",
                table_name
            )));
        }
        let identity_insert = self.identity_insert.clone();
        let table = self.table_mut(table_name).map_err(InsertError::Other)?;

        for name in columns {
            match table.column(name) {
                None => {
                    return Err(InsertError::Other(format!("Invalid column name '{}'.", name)))
                }
                Some(c) if c.computed => {
                    return Err(InsertError::Other(format!(
                        "The column \"{}\" cannot be modified because it is computed.",
                        name
                    )))
                }
                Some(_) => {}
            }
        }

        let identity = table.identity_column().map(|c| norm(&c.name));
        let explicit = identity
            .as_ref()
            .is_some_and(|id| columns.iter().any(|c| norm(c) == *id));
        if explicit && identity_insert.as_deref() != Some(norm(table_name).as_str()) {
            return Err(InsertError::Other(format!(
                "Cannot insert explicit value for identity column in table '{}' when IDENTITY_INSERT is set to OFF.",
                table.name
            )));
        }

        let snapshot = table.rows.clone();
        let mut next_identity = table.last_identity.unwrap_or(0);
        let mut max_identity = table.last_identity;
        let count = source_rows.len() as u64;

        for source in source_rows {
            let mut row: Row = table.columns.iter().map(|c| (norm(&c.name), None)).collect();
            for name in columns {
                row.insert(norm(name), value(&source, name));
            }
            if let Some(id) = &identity {
                if !explicit {
                    next_identity += 1;
                    row.insert(id.clone(), Some(next_identity));
                }
                if let Some(v) = row.get(id).copied().flatten() {
                    max_identity = Some(max_identity.map_or(v, |m| m.max(v)));
                }
            }
            table.rows.push(row);
        }

        if let Some(message) = table.duplicate_key() {
            table.rows = snapshot;
            return Err(InsertError::Duplicate(message));
        }

        if let Err(message) =
            self.check_foreign_keys(|r| r.fk_table.eq_ignore_ascii_case(table_name))
        {
            if let Ok(table) = self.table_mut(table_name) {
                table.rows = snapshot;
            }
            return Err(InsertError::Other(message));
        }

        let table = self.table_mut(table_name).map_err(InsertError::Other)?;
        if identity.is_some() {
            table.last_identity = max_identity;
        }
        if table.has_trigger && table.triggers_enabled && count > 0 {
            table.trigger_fires += 1;
        }
        Ok(count)
    }

    fn column_handle(&self, table: &MemTable, column: &MemColumn) -> Column {
        Column {
            schema: SCHEMA.to_string(),
            table: table.name.clone(),
            name: column.name.clone(),
            is_identity: column.identity,
            data_type: Some("int".to_string()),
            is_primary_key: table
                .primary_key
                .as_ref()
                .is_some_and(|pk| pk.contains(&column.name)),
        }
    }
}

/// Table definition for seeding a [`MemoryDatabase`].
pub(crate) struct TableDef {
    name: String,
    columns: Vec<MemColumn>,
    primary_key: Vec<String>,
    has_trigger: bool,
}

impl TableDef {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            columns: Vec::new(),
            primary_key: Vec::new(),
            has_trigger: false,
        }
    }

    fn push(mut self, name: &str, identity: bool, computed: bool) -> Self {
        self.columns.push(MemColumn {
            name: name.to_string(),
            identity,
            computed,
            has_default: false,
        });
        self
    }

    /// An `int IDENTITY` column.
    pub fn identity(self, name: &str) -> Self {
        self.push(name, true, false)
    }

    /// A nullable `int` column.
    pub fn column(self, name: &str) -> Self {
        self.push(name, false, false)
    }

    pub fn computed(self, name: &str) -> Self {
        self.push(name, false, true)
    }

    /// Clustered primary key named `PK_<table>`.
    pub fn primary_key(mut self, columns: &[&str]) -> Self {
        self.primary_key = columns.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_trigger(mut self) -> Self {
        self.has_trigger = true;
        self
    }
}

/// A set of in-memory databases sharing one "instance".
#[derive(Clone)]
pub(crate) struct MemoryServer {
    dbs: Arc<Mutex<HashMap<String, MemDb>>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self {
            dbs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Handle to a database, creating it empty on first use.
    pub fn database(&self, name: &str) -> MemoryDatabase {
        self.dbs
            .lock()
            .expect("memory server lock")
            .entry(norm(name))
            .or_insert_with(MemDb::new);
        MemoryDatabase {
            server: self.clone(),
            name: name.to_string(),
        }
    }
}

/// One database of a [`MemoryServer`], acting as its single session.
pub(crate) struct MemoryDatabase {
    server: MemoryServer,
    name: String,
}

impl MemoryDatabase {
    fn with<R>(&self, f: impl FnOnce(&mut MemDb) -> R) -> R {
        let mut dbs = self.server.dbs.lock().expect("memory server lock");
        let db = dbs.get_mut(&norm(&self.name)).expect("database exists");
        f(db)
    }

    fn ddl<R>(
        &self,
        operation: &str,
        object: &str,
        f: impl FnOnce(&mut MemDb) -> std::result::Result<R, String>,
    ) -> Result<R> {
        self.with(f)
            .map_err(|message| MergeError::structural(operation, object, message))
    }

    // Seeding and inspection helpers.

    pub fn create_table(&self, def: TableDef) {
        self.with(|db| {
            let primary_key = (!def.primary_key.is_empty()).then(|| PrimaryKey {
                schema: SCHEMA.to_string(),
                table: def.name.clone(),
                constraint_name: format!("PK_{}", def.name),
                columns: def.primary_key.clone(),
                clustered: true,
            });
            db.tables.insert(
                norm(&def.name),
                MemTable {
                    name: def.name,
                    columns: def.columns,
                    rows: Vec::new(),
                    primary_key,
                    has_trigger: def.has_trigger,
                    triggers_enabled: true,
                    last_identity: None,
                    trigger_fires: 0,
                },
            );
        });
    }

    /// Enabled single-column foreign key `child(child_column) -> parent(parent_column)`.
    pub fn add_foreign_key(
        &self,
        name: &str,
        child: (&str, &str),
        parent: (&str, &str),
    ) {
        self.add_composite_foreign_key(name, child.0, parent.0, &[(child.1, parent.1)]);
    }

    /// Enabled foreign key over `(child column, parent column)` pairs in key order.
    pub fn add_composite_foreign_key(
        &self,
        name: &str,
        child: &str,
        parent: &str,
        pairs: &[(&str, &str)],
    ) {
        self.with(|db| {
            for (child_column, parent_column) in pairs {
                db.foreign_keys.push(MemForeignKey {
                    reference: ForeignKeyReference {
                        pk_schema: SCHEMA.to_string(),
                        pk_table: parent.to_string(),
                        pk_column: parent_column.to_string(),
                        fk_schema: SCHEMA.to_string(),
                        fk_table: child.to_string(),
                        fk_column: child_column.to_string(),
                        constraint_name: name.to_string(),
                    },
                    enabled: true,
                    cascade_on_update: false,
                });
            }
        });
    }

    /// Insert a row directly, bypassing every check. Unlisted columns are NULL
    /// except the identity column, which is generated.
    pub fn insert(&self, table: &str, values: &[(&str, i64)]) {
        self.with(|db| {
            let t = db.table_mut(table).expect("table exists");
            let mut row: Row = t.columns.iter().map(|c| (norm(&c.name), None)).collect();
            for (name, v) in values {
                row.insert(norm(name), Some(*v));
            }
            if let Some(id) = t.identity_column().map(|c| norm(&c.name)) {
                let current = match row.get(&id).copied().flatten() {
                    Some(v) => v,
                    None => {
                        let next = t.last_identity.unwrap_or(0) + 1;
                        row.insert(id.clone(), Some(next));
                        next
                    }
                };
                t.last_identity = Some(t.last_identity.map_or(current, |m| m.max(current)));
            }
            t.rows.push(row);
        });
    }

    /// Column values in row order.
    pub fn values(&self, table: &str, column: &str) -> Vec<Option<i64>> {
        self.with(|db| {
            db.table(table)
                .expect("table exists")
                .rows
                .iter()
                .map(|row| value(row, column))
                .collect()
        })
    }

    /// Non-null column values, ascending.
    pub fn sorted_values(&self, table: &str, column: &str) -> Vec<i64> {
        let mut values: Vec<i64> = self.values(table, column).into_iter().flatten().collect();
        values.sort_unstable();
        values
    }

    pub fn row_count(&self, table: &str) -> usize {
        self.with(|db| db.table(table).expect("table exists").rows.len())
    }

    /// Lowercase names of enabled foreign key constraints, sorted.
    pub fn enabled_foreign_keys(&self) -> Vec<String> {
        self.with(|db| {
            let mut names: Vec<String> = db
                .foreign_keys
                .iter()
                .filter(|fk| fk.enabled)
                .map(|fk| norm(&fk.reference.constraint_name))
                .collect();
            names.sort();
            names.dedup();
            names
        })
    }

    /// `(child column, parent column)` pairs of one foreign key in key order.
    pub fn foreign_key_pairs(&self, name: &str) -> Vec<(String, String)> {
        self.with(|db| {
            db.foreign_keys
                .iter()
                .filter(|fk| fk.reference.constraint_name.eq_ignore_ascii_case(name))
                .map(|fk| (fk.reference.fk_column.clone(), fk.reference.pk_column.clone()))
                .collect()
        })
    }

    pub fn foreign_key_cascades(&self, name: &str) -> Option<bool> {
        self.with(|db| {
            db.foreign_keys
                .iter()
                .find(|fk| fk.reference.constraint_name.eq_ignore_ascii_case(name))
                .map(|fk| fk.cascade_on_update)
        })
    }

    pub fn identity_insert_table(&self) -> Option<String> {
        self.with(|db| db.identity_insert.clone())
    }

    pub fn triggers_enabled(&self, table: &str) -> bool {
        self.with(|db| db.table(table).expect("table exists").triggers_enabled)
    }

    pub fn database_triggers_enabled(&self) -> bool {
        self.with(|db| db.database_triggers_enabled)
    }

    pub fn trigger_fires(&self, table: &str) -> usize {
        self.with(|db| db.table(table).expect("table exists").trigger_fires)
    }

    pub fn primary_key_of(&self, table: &str) -> Option<PrimaryKey> {
        self.with(|db| db.table(table).expect("table exists").primary_key.clone())
    }

    pub fn is_identity(&self, table: &str, column: &str) -> bool {
        self.with(|db| {
            db.table(table)
                .expect("table exists")
                .column(column)
                .is_some_and(|c| c.identity)
        })
    }

    pub fn has_column(&self, table: &str, column: &str) -> bool {
        self.with(|db| db.table(table).expect("table exists").column(column).is_some())
    }

    /// Record an identity value issued and later deleted.
    pub fn set_last_identity(&self, table: &str, last: i64) {
        self.with(|db| db.table_mut(table).expect("table exists").last_identity = Some(last));
    }

    /// Make every copy into `table` fail with a non-duplicate error.
    pub fn fail_copies_into(&self, table: &str) {
        self.with(|db| db.failing_copies.insert(norm(table)));
    }

    /// Make disabling the named constraint fail.
    pub fn fail_disable_of(&self, constraint: &str) {
        self.with(|db| db.failing_disables.insert(norm(constraint)));
    }

    fn copy_into(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
        key_columns: Option<&[String]>,
    ) -> Result<u64> {
        let mut dbs = self.server.dbs.lock().expect("memory server lock");

        let source_rows = {
            let source = dbs.get(&norm(source_database)).ok_or_else(|| {
                MergeError::copy(
                    table.full_name(),
                    format!("Database '{}' does not exist.", source_database),
                )
            })?;
            let source_table = source
                .table(&table.name)
                .map_err(|m| MergeError::copy(table.full_name(), m))?;
            if let Some(missing) = columns.iter().find(|c| source_table.column(c).is_none()) {
                return Err(MergeError::copy(
                    table.full_name(),
                    format!("Invalid column name '{}'.", missing),
                ));
            }
            source_table.rows.clone()
        };

        let destination = dbs.get_mut(&norm(&self.name)).expect("database exists");
        let source_rows = match key_columns {
            None => source_rows,
            Some(keys) => {
                let existing: HashSet<Vec<Option<i64>>> = destination
                    .table(&table.name)
                    .map_err(|m| MergeError::copy(table.full_name(), m))?
                    .rows
                    .iter()
                    .map(|row| keys.iter().map(|k| value(row, k)).collect())
                    .collect();
                source_rows
                    .into_iter()
                    .filter(|row| {
                        let key: Vec<Option<i64>> = keys.iter().map(|k| value(row, k)).collect();
                        !existing.contains(&key)
                    })
                    .collect()
            }
        };

        destination
            .insert_rows(&table.name, columns, source_rows)
            .map_err(|e| match e {
                InsertError::Duplicate(message) => MergeError::DuplicateKey {
                    table: table.full_name(),
                    message,
                },
                InsertError::Other(message) => MergeError::copy(table.full_name(), message),
            })
    }
}

#[async_trait]
impl SchemaCatalog for MemoryDatabase {
    fn database_name(&self) -> &str {
        &self.name
    }

    fn schema(&self) -> &str {
        SCHEMA
    }

    async fn list_tables(&self) -> Result<Vec<Table>> {
        Ok(self.with(|db| {
            db.tables
                .values()
                .map(|t| Table::new(SCHEMA, &t.name, t.identity_column().is_some()))
                .collect()
        }))
    }

    async fn list_identity_columns(&self) -> Result<Vec<Column>> {
        Ok(self.with(|db| {
            let mut columns = Vec::new();
            for table in db.tables.values() {
                let mut identity: Vec<&MemColumn> =
                    table.columns.iter().filter(|c| c.identity).collect();
                identity.sort_by_key(|c| norm(&c.name));
                columns.extend(identity.into_iter().map(|c| db.column_handle(table, c)));
            }
            columns
        }))
    }

    async fn list_columns_by_name(&self, name: &str) -> Result<Vec<Column>> {
        Ok(self.with(|db| {
            db.tables
                .values()
                .filter_map(|t| t.column(name).map(|c| db.column_handle(t, c)))
                .collect()
        }))
    }

    async fn list_foreign_key_references(
        &self,
        parent: Option<&Column>,
        active_only: bool,
    ) -> Result<Vec<ForeignKeyReference>> {
        Ok(self.with(|db| {
            let mut refs: Vec<ForeignKeyReference> = db
                .foreign_keys
                .iter()
                .filter(|fk| !active_only || fk.enabled)
                .filter(|fk| {
                    parent.map_or(true, |c| {
                        fk.reference.pk_table.eq_ignore_ascii_case(&c.table)
                            && fk.reference.pk_column.eq_ignore_ascii_case(&c.name)
                    })
                })
                .map(|fk| fk.reference.clone())
                .collect();
            refs.sort_by_key(|r| (norm(&r.fk_table), norm(&r.constraint_name)));
            refs
        }))
    }

    async fn list_trigger_bearing_tables(&self) -> Result<Vec<Table>> {
        Ok(self.with(|db| {
            db.tables
                .values()
                .filter(|t| t.has_trigger)
                .map(|t| Table::new(SCHEMA, &t.name, t.identity_column().is_some()))
                .collect()
        }))
    }

    async fn is_primary_key(&self, column: &Column) -> Result<bool> {
        self.with(|db| {
            db.table(&column.table)
                .map(|t| t.primary_key.as_ref().is_some_and(|pk| pk.contains(&column.name)))
        })
        .map_err(MergeError::Catalog)
    }

    async fn primary_key(&self, table: &Table) -> Result<Option<PrimaryKey>> {
        self.with(|db| db.table(&table.name).map(|t| t.primary_key.clone()))
            .map_err(MergeError::Catalog)
    }

    async fn list_copyable_columns(&self, table: &Table) -> Result<Vec<String>> {
        self.with(|db| {
            db.table(&table.name).map(|t| {
                t.columns
                    .iter()
                    .filter(|c| !c.computed)
                    .map(|c| c.name.clone())
                    .collect()
            })
        })
        .map_err(MergeError::Catalog)
    }

    async fn max_value(&self, column: &Column) -> Result<Option<i64>> {
        self.with(|db| {
            db.table(&column.table)
                .map(|t| t.rows.iter().filter_map(|r| value(r, &column.name)).max())
        })
        .map_err(MergeError::Catalog)
    }

    async fn last_identity_values(&self) -> Result<HashMap<ColumnKey, i64>> {
        Ok(self.with(|db| {
            db.tables
                .values()
                .filter_map(|t| {
                    let column = t.identity_column()?;
                    let last = t.last_identity?;
                    Some((ColumnKey::new(SCHEMA, &t.name, &column.name), last))
                })
                .collect()
        }))
    }
}

#[async_trait]
impl ConstraintController for MemoryDatabase {
    async fn disable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        for reference in refs {
            self.ddl("disable foreign key", &reference.constraint_name, |db| {
                if !db.has_constraint(reference) {
                    return Err("constraint does not exist".to_string());
                }
                if db.failing_disables.contains(&norm(&reference.constraint_name)) {
                    return Err("Lock request time out period exceeded.".to_string());
                }
                let key = reference.constraint_key();
                for fk in db.foreign_keys.iter_mut() {
                    if fk.reference.constraint_key() == key {
                        fk.enabled = false;
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn enable_foreign_keys(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        for reference in refs {
            self.ddl("enable foreign key", &reference.constraint_name, |db| {
                if !db.has_constraint(reference) {
                    return Err("constraint does not exist".to_string());
                }
                let key = reference.constraint_key();
                let group: Vec<ForeignKeyReference> = db
                    .foreign_keys
                    .iter()
                    .filter(|fk| fk.reference.constraint_key() == key)
                    .map(|fk| fk.reference.clone())
                    .collect();
                let group: Vec<&ForeignKeyReference> = group.iter().collect();
                if let Some(message) = db.orphan(&group) {
                    return Err(message);
                }
                for fk in db.foreign_keys.iter_mut() {
                    if fk.reference.constraint_key() == key {
                        fk.enabled = true;
                    }
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn disable_all_triggers(&self) -> Result<()> {
        self.with(|db| {
            db.database_triggers_enabled = false;
            for table in db.tables.values_mut().filter(|t| t.has_trigger) {
                table.triggers_enabled = false;
            }
        });
        Ok(())
    }

    async fn enable_all_triggers(&self) -> Result<()> {
        self.with(|db| {
            db.database_triggers_enabled = true;
            for table in db.tables.values_mut().filter(|t| t.has_trigger) {
                table.triggers_enabled = true;
            }
        });
        Ok(())
    }

    async fn drop_foreign_key_references(&self, refs: &[ForeignKeyReference]) -> Result<()> {
        let mut dropped = HashSet::new();
        for reference in refs {
            let key = reference.constraint_key();
            if !dropped.insert(key.clone()) {
                continue;
            }
            self.ddl("drop foreign key", &reference.constraint_name, |db| {
                if !db.has_constraint(reference) {
                    return Err("constraint does not exist".to_string());
                }
                db.foreign_keys.retain(|fk| fk.reference.constraint_key() != key);
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn create_foreign_key_references(
        &self,
        refs: &[ForeignKeyReference],
        cascade_on_update: bool,
    ) -> Result<()> {
        for group in group_by_constraint(refs) {
            let name = &group[0].constraint_name;
            self.ddl("create foreign key", name, |db| {
                if db.has_constraint(group[0]) {
                    return Err(format!("There is already an object named '{}'.", name));
                }
                for reference in &group {
                    let child = db.table(&reference.fk_table)?;
                    let parent = db.table(&reference.pk_table)?;
                    if child.column(&reference.fk_column).is_none()
                        || parent.column(&reference.pk_column).is_none()
                    {
                        return Err("Foreign key references invalid column.".to_string());
                    }
                }
                let parent = db.table(&group[0].pk_table)?;
                let referenced: HashSet<String> = group.iter().map(|r| norm(&r.pk_column)).collect();
                let candidate = parent.primary_key.as_ref().is_some_and(|pk| {
                    pk.columns.len() == referenced.len()
                        && pk.columns.iter().all(|c| referenced.contains(&norm(c)))
                });
                if !candidate {
                    return Err(format!(
                        "There are no primary or candidate keys in the referenced table '{}' that match the referencing column list in the foreign key '{}'.",
                        parent.name, name
                    ));
                }
                for reference in &group {
                    db.foreign_keys.push(MemForeignKey {
                        reference: (*reference).clone(),
                        enabled: true,
                        cascade_on_update: cascade_on_update && !reference.is_self_reference(),
                    });
                }
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn drop_primary_key(&self, column: &Column) -> Result<()> {
        self.ddl("drop primary key", &column.table, |db| {
            let table = db.table(&column.table)?;
            let pk = table
                .primary_key
                .clone()
                .ok_or_else(|| "table has no primary key".to_string())?;
            if let Some(fk) = db.foreign_keys.iter().find(|fk| {
                fk.reference.pk_table.eq_ignore_ascii_case(&column.table)
                    && pk.contains(&fk.reference.pk_column)
            }) {
                return Err(format!(
                    "The constraint '{}' is being referenced by table '{}', foreign key constraint '{}'.",
                    pk.constraint_name, fk.reference.fk_table, fk.reference.constraint_name
                ));
            }
            db.table_mut(&column.table)?.primary_key = None;
            Ok(())
        })
    }

    async fn create_primary_key(&self, pk: &PrimaryKey) -> Result<()> {
        self.ddl("create primary key", &pk.constraint_name, |db| {
            let table = db.table_mut(&pk.table)?;
            if table.primary_key.is_some() {
                return Err("Table already has a primary key defined on it.".to_string());
            }
            if let Some(missing) = pk.columns.iter().find(|c| table.column(c).is_none()) {
                return Err(format!("Column name '{}' does not exist.", missing));
            }
            table.primary_key = Some(pk.clone());
            let nullable = table
                .rows
                .iter()
                .any(|row| pk.columns.iter().any(|c| value(row, c).is_none()));
            let failure = if nullable {
                Some("Cannot define PRIMARY KEY constraint on nullable values.".to_string())
            } else {
                table.duplicate_key()
            };
            if let Some(message) = failure {
                table.primary_key = None;
                return Err(message);
            }
            Ok(())
        })
    }

    async fn set_identity_insert(&self, table: &Table, enabled: bool) -> Result<()> {
        self.ddl("set identity insert", &table.full_name(), |db| {
            let t = db.table(&table.name)?;
            if t.identity_column().is_none() {
                return Err(format!(
                    "Table '{}' does not have the identity property. Cannot perform SET operation.",
                    table.name
                ));
            }
            let name = norm(&table.name);
            match (db.identity_insert.clone(), enabled) {
                (Some(current), true) if current != name => Err(format!(
                    "IDENTITY_INSERT is already ON for table '{}'. Cannot perform SET operation for table '{}'.",
                    current, table.name
                )),
                (_, true) => {
                    db.identity_insert = Some(name);
                    Ok(())
                }
                (Some(current), false) if current == name => {
                    db.identity_insert = None;
                    Ok(())
                }
                (_, false) => Ok(()),
            }
        })
    }

    async fn add_column(&self, column: &Column) -> Result<()> {
        self.ddl("add column", &column.full_name(), |db| {
            if column.data_type.is_none() {
                return Err("no data type".to_string());
            }
            let table = db.table_mut(&column.table)?;
            if table.column(&column.name).is_some() {
                return Err(format!(
                    "Column names in each table must be unique. Column name '{}' is specified more than once.",
                    column.name
                ));
            }
            table.columns.push(MemColumn {
                name: column.name.clone(),
                identity: false,
                computed: false,
                has_default: true,
            });
            for row in &mut table.rows {
                row.insert(norm(&column.name), Some(1));
            }
            Ok(())
        })
    }

    async fn drop_column_default(&self, column: &Column) -> Result<()> {
        self.ddl("drop column default", &column.full_name(), |db| {
            let table = db.table_mut(&column.table)?;
            let meta = table
                .columns
                .iter_mut()
                .find(|c| c.name.eq_ignore_ascii_case(&column.name))
                .ok_or_else(|| format!("Invalid column name '{}'.", column.name))?;
            meta.has_default = false;
            Ok(())
        })
    }

    async fn drop_column(&self, column: &Column) -> Result<()> {
        self.ddl("drop column", &column.full_name(), |db| {
            let referenced = db.foreign_keys.iter().any(|fk| {
                let r = &fk.reference;
                (r.pk_table.eq_ignore_ascii_case(&column.table)
                    && r.pk_column.eq_ignore_ascii_case(&column.name))
                    || (r.fk_table.eq_ignore_ascii_case(&column.table)
                        && r.fk_column.eq_ignore_ascii_case(&column.name))
            });
            let table = db.table_mut(&column.table)?;
            let meta = table
                .column(&column.name)
                .ok_or_else(|| format!("Invalid column name '{}'.", column.name))?;
            let in_key = table
                .primary_key
                .as_ref()
                .is_some_and(|pk| pk.contains(&column.name));
            if in_key || referenced || meta.has_default {
                return Err(format!(
                    "ALTER TABLE DROP COLUMN {} failed because one or more objects access this column.",
                    column.name
                ));
            }
            let key = norm(&column.name);
            table.columns.retain(|c| norm(&c.name) != key);
            for row in &mut table.rows {
                row.remove(&key);
            }
            Ok(())
        })
    }

    async fn rename_column(&self, column: &Column, new_name: &str) -> Result<Column> {
        self.ddl("rename column", &column.full_name(), |db| {
            let table = db.table_mut(&column.table)?;
            if table.column(&column.name).is_none() {
                return Err(format!("Invalid column name '{}'.", column.name));
            }
            if !column.name.eq_ignore_ascii_case(new_name) && table.column(new_name).is_some() {
                return Err(format!("Column '{}' already exists.", new_name));
            }

            let (old, new) = (norm(&column.name), norm(new_name));
            for meta in table.columns.iter_mut().filter(|c| norm(&c.name) == old) {
                meta.name = new_name.to_string();
            }
            for row in &mut table.rows {
                if let Some(v) = row.remove(&old) {
                    row.insert(new.clone(), v);
                }
            }
            if let Some(pk) = table.primary_key.as_mut() {
                for c in pk.columns.iter_mut().filter(|c| norm(c) == old) {
                    *c = new_name.to_string();
                }
            }
            for fk in db.foreign_keys.iter_mut() {
                let r = &mut fk.reference;
                if r.pk_table.eq_ignore_ascii_case(&column.table) && norm(&r.pk_column) == old {
                    r.pk_column = new_name.to_string();
                }
                if r.fk_table.eq_ignore_ascii_case(&column.table) && norm(&r.fk_column) == old {
                    r.fk_column = new_name.to_string();
                }
            }
            Ok(column.renamed(new_name))
        })
    }

    async fn copy_column_values(&self, from: &Column, to: &Column) -> Result<u64> {
        self.ddl("copy column values", &to.full_name(), |db| {
            let table = db.table_mut(&to.table)?;
            if table.column(&from.name).is_none() {
                return Err(format!("Invalid column name '{}'.", from.name));
            }
            match table.column(&to.name) {
                None => return Err(format!("Invalid column name '{}'.", to.name)),
                Some(c) if c.identity => {
                    return Err(format!("Cannot update identity column '{}'.", to.name))
                }
                Some(_) => {}
            }
            let (from_key, to_key) = (norm(&from.name), norm(&to.name));
            for row in &mut table.rows {
                let v = row.get(&from_key).copied().flatten();
                row.insert(to_key.clone(), v);
            }
            Ok(table.rows.len() as u64)
        })
    }

    async fn increment_column_values(&self, column: &Column, offset: i64) -> Result<u64> {
        self.ddl("increment column", &column.full_name(), |db| {
            db.update_column(column, |v| v.map(|x| Some(x + offset)))
        })
    }
}

#[async_trait]
impl RowCopier for MemoryDatabase {
    async fn copy_table_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
    ) -> Result<u64> {
        self.copy_into(source_database, table, columns, None)
    }

    async fn copy_missing_rows(
        &self,
        source_database: &str,
        table: &Table,
        columns: &[String],
        key_columns: &[String],
    ) -> Result<u64> {
        self.copy_into(source_database, table, columns, Some(key_columns))
    }

    async fn set_column_value(&self, column: &Column, value: i64) -> Result<u64> {
        self.with(|db| db.update_column(column, |_| Some(Some(value))))
            .map_err(|message| MergeError::copy(column.table.clone(), message))
    }
}

/// Organization names are not modelled; only the integer columns are stored.
#[async_trait]
impl TenantStore for MemoryDatabase {
    async fn organization_exists(&self, table: &Table, id: i32) -> Result<bool> {
        self.with(|db| {
            db.table(&table.name)
                .map(|t| t.rows.iter().any(|r| value(r, "Id") == Some(i64::from(id))))
        })
        .map_err(MergeError::Catalog)
    }

    async fn insert_organization(&self, table: &Table, organization: &Organization) -> Result<()> {
        let columns = vec![
            "Id".to_string(),
            "IsActive".to_string(),
            "LastStatusId".to_string(),
        ];
        let row: Row = [
            ("id".to_string(), Some(i64::from(organization.id))),
            ("isactive".to_string(), Some(1)),
            (
                "laststatusid".to_string(),
                Some(i64::from(organization.last_status_id)),
            ),
        ]
        .into_iter()
        .collect();

        self.with(|db| db.insert_rows(&table.name, &columns, vec![row]))
            .map(|_| ())
            .map_err(|e| match e {
                InsertError::Duplicate(message) | InsertError::Other(message) => {
                    MergeError::copy(table.full_name(), message)
                }
            })
    }
}

/// A small clinic schema shared by the engine tests.
///
/// - `Country`: lookup table (`Id` identity)
/// - `Organization`: tenant table (`Id` identity, `IsActive`, `LastStatusId`)
/// - `Patient`: `Id` identity, `ParentId` self-reference, `CountryId`, `OrganizationId`
/// - `Visit`: `Id` identity, `PatientId`, `OrganizationId`; carries a trigger
/// - `AuditLog`: `Id` identity, `PatientId`
/// - `Note`: no identity; `Id` primary key, `PatientId`
pub(crate) fn clinic(server: &MemoryServer, name: &str) -> MemoryDatabase {
    let db = server.database(name);
    db.create_table(TableDef::new("Country").identity("Id").primary_key(&["Id"]));
    db.create_table(
        TableDef::new("Organization")
            .identity("Id")
            .column("IsActive")
            .column("LastStatusId")
            .primary_key(&["Id"]),
    );
    db.create_table(
        TableDef::new("Patient")
            .identity("Id")
            .column("ParentId")
            .column("CountryId")
            .column("OrganizationId")
            .computed("Age")
            .primary_key(&["Id"]),
    );
    db.create_table(
        TableDef::new("Visit")
            .identity("Id")
            .column("PatientId")
            .column("OrganizationId")
            .primary_key(&["Id"])
            .with_trigger(),
    );
    db.create_table(
        TableDef::new("AuditLog")
            .identity("Id")
            .column("PatientId")
            .primary_key(&["Id"]),
    );
    db.create_table(TableDef::new("Note").column("Id").column("PatientId").primary_key(&["Id"]));

    db.add_foreign_key("FK_Patient_Parent", ("Patient", "ParentId"), ("Patient", "Id"));
    db.add_foreign_key("FK_Patient_Country", ("Patient", "CountryId"), ("Country", "Id"));
    db.add_foreign_key("FK_Visit_Patient", ("Visit", "PatientId"), ("Patient", "Id"));
    db.add_foreign_key("FK_AuditLog_Patient", ("AuditLog", "PatientId"), ("Patient", "Id"));
    db.add_foreign_key("FK_Note_Patient", ("Note", "PatientId"), ("Patient", "Id"));
    db
}

#[cfg(test)]
mod tests {
    use super::*;

    fn patients(server: &MemoryServer, name: &str) -> MemoryDatabase {
        let db = server.database(name);
        db.create_table(TableDef::new("Patient").identity("Id").primary_key(&["Id"]));
        db.create_table(
            TableDef::new("Visit")
                .identity("Id")
                .column("PatientId")
                .primary_key(&["Id"]),
        );
        db.add_foreign_key("FK_Visit_Patient", ("Visit", "PatientId"), ("Patient", "Id"));
        db
    }

    #[tokio::test]
    async fn test_explicit_identity_requires_identity_insert() {
        let server = MemoryServer::new();
        let source = patients(&server, "source");
        let destination = patients(&server, "destination");
        source.insert("Patient", &[("Id", 7)]);

        let table = Table::new("dbo", "Patient", true);
        let columns = vec!["Id".to_string()];
        let err = destination
            .copy_table_rows("source", &table, &columns)
            .await
            .unwrap_err();
        assert!(!err.is_duplicate_key());

        destination.set_identity_insert(&table, true).await.unwrap();
        assert_eq!(
            destination.copy_table_rows("source", &table, &columns).await.unwrap(),
            1
        );
        assert_eq!(destination.sorted_values("Patient", "Id"), vec![7]);
    }

    #[tokio::test]
    async fn test_identity_insert_one_table_per_session() {
        let server = MemoryServer::new();
        let db = patients(&server, "db");
        db.set_identity_insert(&Table::new("dbo", "Patient", true), true)
            .await
            .unwrap();
        assert!(db
            .set_identity_insert(&Table::new("dbo", "Visit", true), true)
            .await
            .is_err());
        db.set_identity_insert(&Table::new("dbo", "Patient", true), false)
            .await
            .unwrap();
        assert_eq!(db.identity_insert_table(), None);
    }

    #[tokio::test]
    async fn test_duplicate_insert_keeps_no_rows() {
        let server = MemoryServer::new();
        let source = patients(&server, "source");
        let destination = patients(&server, "destination");
        source.insert("Patient", &[("Id", 5)]);
        source.insert("Patient", &[("Id", 6)]);
        destination.insert("Patient", &[("Id", 5)]);

        let table = Table::new("dbo", "Patient", true);
        destination.set_identity_insert(&table, true).await.unwrap();
        let err = destination
            .copy_table_rows("source", &table, &["Id".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_duplicate_key());
        assert_eq!(destination.sorted_values("Patient", "Id"), vec![5]);
    }

    #[tokio::test]
    async fn test_enabled_foreign_key_blocks_orphans() {
        let server = MemoryServer::new();
        let db = patients(&server, "db");
        db.insert("Patient", &[("Id", 1)]);
        db.insert("Visit", &[("Id", 1), ("PatientId", 1)]);

        let column = Column::plain("dbo", "Visit", "PatientId");
        assert!(db.increment_column_values(&column, 10).await.is_err());
        assert_eq!(db.values("Visit", "PatientId"), vec![Some(1)]);

        let refs = db.list_foreign_key_references(None, true).await.unwrap();
        db.disable_foreign_keys(&refs).await.unwrap();
        assert_eq!(db.increment_column_values(&column, 10).await.unwrap(), 1);
        assert!(db.enable_foreign_keys(&refs).await.is_err());
        assert!(db.enabled_foreign_keys().is_empty());
    }

    #[tokio::test]
    async fn test_drop_column_blocked_by_dependents() {
        let server = MemoryServer::new();
        let db = patients(&server, "db");
        let id = Column::identity("dbo", "Patient", "Id", "int");
        assert!(db.drop_primary_key(&id).await.is_err());
        assert!(db.drop_column(&id).await.is_err());

        let refs = db.list_foreign_key_references(Some(&id), false).await.unwrap();
        db.drop_foreign_key_references(&refs).await.unwrap();
        db.drop_primary_key(&id).await.unwrap();
        db.drop_column(&id).await.unwrap();
        assert!(!db.has_column("Patient", "Id"));
    }

    #[tokio::test]
    async fn test_rename_updates_dependent_keys() {
        let server = MemoryServer::new();
        let db = patients(&server, "db");
        let column = Column::plain("dbo", "Visit", "PatientId");
        let renamed = db.rename_column(&column, "OwnerId").await.unwrap();
        assert_eq!(renamed.name, "OwnerId");

        let refs = db.list_foreign_key_references(None, false).await.unwrap();
        assert_eq!(refs[0].fk_column, "OwnerId");
    }
}
