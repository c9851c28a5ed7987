//! Tables, schemas, rights and triggers
//!
//! A [`Table`] binds a schema to one map id of a [`SqlEngine`]; rows live
//! in that map keyed by their primary-key projection. The schema validates
//! arity and not-null constraints; triggers hook row inserts; [`RowSink`]
//! is the shared surface of statements that buffer rows before writing
//! them, so query-fed and literal-fed statements look alike.

use crate::value::{Row, RowKey, SqlValue};
use lattice_core::{Error, MapId, Result, VersionedValue};
use lattice_storage::MemoryMap;
use lattice_txn::{Transaction, TransactionEngine, TransactionMap};
use std::sync::Arc;

/// Storage behind every SQL table map.
pub type SqlStorage = MemoryMap<RowKey, VersionedValue<Row>>;
/// Engine the SQL layer runs on.
pub type SqlEngine = TransactionEngine<RowKey, Row, SqlStorage>;
/// Transaction over a [`SqlEngine`].
pub type SqlTransaction = Transaction<RowKey, Row, SqlStorage>;
/// Transactional view over one table's rows.
pub type SqlMap<'t> = TransactionMap<'t, RowKey, Row, SqlStorage>;

/// One column of a table schema.
#[derive(Debug, Clone)]
pub struct Column {
    /// Column name.
    pub name: String,
    /// Whether NULL is rejected.
    pub not_null: bool,
}

impl Column {
    /// A nullable column.
    pub fn new(name: &str) -> Self {
        Column {
            name: name.to_string(),
            not_null: false,
        }
    }

    /// Mark the column NOT NULL.
    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }
}

/// A table's shape: named columns and the primary-key column set.
#[derive(Debug, Clone)]
pub struct TableSchema {
    /// Table name.
    pub name: String,
    /// Columns in declaration order.
    pub columns: Vec<Column>,
    /// Indexes of the primary-key columns, in key order.
    pub primary_key: Vec<usize>,
}

impl TableSchema {
    /// Build a schema; primary-key columns are named and must exist.
    pub fn new(name: &str, columns: Vec<Column>, primary_key: &[&str]) -> Result<Self> {
        let mut schema = TableSchema {
            name: name.to_string(),
            columns,
            primary_key: Vec::new(),
        };
        for key in primary_key {
            let index = schema
                .column_index(key)
                .ok_or_else(|| Error::ConstraintNotFound {
                    name: (*key).to_string(),
                })?;
            schema.primary_key.push(index);
        }
        // primary-key columns reject NULL by definition
        for &index in &schema.primary_key {
            schema.columns[index].not_null = true;
        }
        Ok(schema)
    }

    /// Index of the column called `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Names of the primary-key columns, in key order.
    pub fn primary_key_names(&self) -> Vec<String> {
        self.primary_key
            .iter()
            .map(|&i| self.columns[i].name.clone())
            .collect()
    }

    /// Name of the implicit primary-key index.
    pub fn primary_index_name(&self) -> String {
        format!("PRIMARY_KEY_{}", self.name.to_ascii_uppercase())
    }

    /// Check arity and not-null constraints.
    pub fn validate_row(&self, row: &[SqlValue]) -> Result<()> {
        if row.len() != self.columns.len() {
            return Err(Error::ColumnCountMismatch);
        }
        for (column, value) in self.columns.iter().zip(row) {
            if column.not_null && value.is_null() {
                return Err(Error::ColumnContainsNull {
                    column: column.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// The primary-key projection of a full row.
    pub fn key_of(&self, row: &[SqlValue]) -> RowKey {
        self.primary_key.iter().map(|&i| row[i].clone()).collect()
    }
}

/// Rights a session may hold on a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rights {
    /// May insert rows.
    pub insert: bool,
    /// May update rows.
    pub update: bool,
}

impl Rights {
    /// Every right granted.
    pub const ALL: Rights = Rights {
        insert: true,
        update: true,
    };
}

/// The caller's execution context.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    /// Rights the caller holds.
    pub rights: Rights,
}

impl Session {
    /// A session holding every right.
    pub fn privileged() -> Self {
        Session {
            rights: Rights::ALL,
        }
    }
}

/// Row-level hooks fired around inserts.
pub trait RowTrigger: Send + Sync {
    /// Fired before a row is inserted; return `false` to suppress the
    /// insert.
    fn before_insert(&self, row: &[SqlValue]) -> bool {
        let _ = row;
        true
    }

    /// Fired after a row was inserted.
    fn after_insert(&self, row: &[SqlValue]) {
        let _ = row;
    }
}

/// A table: schema bound to one map id of an engine.
pub struct Table {
    schema: TableSchema,
    map_id: MapId,
    triggers: Vec<Arc<dyn RowTrigger>>,
}

impl Table {
    /// Bind `schema` to `map_id`.
    pub fn new(schema: TableSchema, map_id: MapId) -> Self {
        Table {
            schema,
            map_id,
            triggers: Vec::new(),
        }
    }

    /// The table's schema.
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// The map holding this table's rows.
    pub fn map_id(&self) -> MapId {
        self.map_id
    }

    /// Attach a row trigger.
    pub fn add_trigger(&mut self, trigger: Arc<dyn RowTrigger>) {
        self.triggers.push(trigger);
    }

    /// Open this table's rows under `txn`.
    pub fn open<'t>(&self, txn: &'t SqlTransaction) -> SqlMap<'t> {
        txn.open_map(self.map_id)
    }

    pub(crate) fn fire_before_insert(&self, row: &[SqlValue]) -> bool {
        self.triggers.iter().all(|t| t.before_insert(row))
    }

    pub(crate) fn fire_after_insert(&self, row: &[SqlValue]) {
        for trigger in &self.triggers {
            trigger.after_insert(row);
        }
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("name", &self.schema.name)
            .field("map_id", &self.map_id)
            .field("triggers", &self.triggers.len())
            .finish()
    }
}

/// Shared surface of statements that buffer rows before writing them.
///
/// Statements fed by a query and statements fed by literal VALUES expose
/// the same sink, so the executor wiring them together never cares which
/// it holds.
pub trait RowSink {
    /// Schema of the target table.
    fn table(&self) -> &TableSchema;
    /// Arity the statement expects per row (its column list).
    fn column_count(&self) -> usize;
    /// Replace the buffered rows.
    fn set_rows(&mut self, rows: Vec<Row>);
    /// The buffered rows.
    fn rows(&self) -> &[Row];
}

/// Feed externally produced rows into a statement, checking arity against
/// its column list.
pub fn feed_rows(sink: &mut dyn RowSink, rows: Vec<Row>) -> Result<()> {
    for row in &rows {
        if row.len() != sink.column_count() {
            return Err(Error::ColumnCountMismatch);
        }
    }
    sink.set_rows(rows);
    Ok(())
}
