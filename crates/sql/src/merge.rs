//! The MERGE (upsert) statement
//!
//! For each input row: run a keyed update; exactly one match means done,
//! more than one is a duplicate-key error, none means validate the row,
//! fire triggers and insert it. An insert that then collides on the
//! primary key, while the primary key is covered by the declared key
//! columns, is re-classified as a concurrent update, because the update
//! step just proved the row absent.
//!
//! The statement is a prepared plan: it can be rebuilt from its own
//! [`plan_sql`](MergeStatement::plan_sql) text.

use crate::parser;
use crate::table::{RowSink, Session, SqlMap, SqlTransaction, Table, TableSchema};
use crate::value::{Row, RowKey, SqlValue};
use lattice_core::{Error, Result};
use std::sync::Arc;

/// A prepared MERGE statement.
pub struct MergeStatement {
    table: Arc<Table>,
    columns: Vec<String>,
    column_indexes: Vec<usize>,
    key_columns: Vec<String>,
    key_indexes: Vec<usize>,
    explicit_key: bool,
    rows: Vec<Row>,
}

impl MergeStatement {
    /// Prepare a statement against `table`.
    ///
    /// `columns` is the insert column list; `key` the declared KEY columns
    /// (defaulting to the primary key); `rows` the literal source rows.
    pub fn new(
        table: Arc<Table>,
        columns: Vec<String>,
        key: Option<Vec<String>>,
        rows: Vec<Row>,
    ) -> Result<Self> {
        let schema = table.schema();
        let mut column_indexes = Vec::with_capacity(columns.len());
        for name in &columns {
            let index = schema.column_index(name).ok_or_else(|| Error::Syntax {
                reason: format!("unknown column {name}"),
            })?;
            column_indexes.push(index);
        }

        let explicit_key = key.is_some();
        let key_columns = match key {
            Some(columns) => columns,
            None => schema.primary_key_names(),
        };
        let mut key_indexes = Vec::with_capacity(key_columns.len());
        for name in &key_columns {
            let index = schema
                .column_index(name)
                .ok_or_else(|| Error::ConstraintNotFound {
                    name: name.clone(),
                })?;
            key_indexes.push(index);
        }
        // every key column must receive a value
        for (name, index) in key_columns.iter().zip(&key_indexes) {
            if !column_indexes.contains(index) {
                return Err(Error::Syntax {
                    reason: format!("key column {name} is not in the column list"),
                });
            }
        }
        for row in &rows {
            if row.len() != columns.len() {
                return Err(Error::ColumnCountMismatch);
            }
        }

        Ok(MergeStatement {
            table,
            columns,
            column_indexes,
            key_columns,
            key_indexes,
            explicit_key,
            rows,
        })
    }

    /// Prepare a statement from SQL text.
    pub fn parse(sql: &str, table: Arc<Table>) -> Result<Self> {
        let parsed = parser::parse_merge(sql)?;
        if !parsed.table.eq_ignore_ascii_case(&table.schema().name) {
            return Err(Error::Syntax {
                reason: format!("statement targets {}, not {}", parsed.table, table.schema().name),
            });
        }
        Self::new(table, parsed.columns, parsed.key_columns, parsed.rows)
    }

    /// The statement's canonical SQL text; parsing it reproduces the plan.
    pub fn plan_sql(&self) -> String {
        let mut sql = format!(
            "MERGE INTO {}({})",
            self.table.schema().name,
            self.columns.join(", ")
        );
        if self.explicit_key {
            sql.push_str(&format!(" KEY({})", self.key_columns.join(", ")));
        }
        if !self.rows.is_empty() {
            let rows: Vec<String> = self
                .rows
                .iter()
                .map(|row| {
                    let values: Vec<String> = row.iter().map(|v| v.to_string()).collect();
                    format!("({})", values.join(", "))
                })
                .collect();
            sql.push_str(&format!(" VALUES {}", rows.join(", ")));
        }
        sql
    }

    /// Run the upsert under `txn`, returning the number of affected rows.
    pub fn execute(&self, txn: &SqlTransaction, session: &Session) -> Result<u64> {
        if !(session.rights.insert && session.rights.update) {
            return Err(Error::NotEnoughRights {
                required: "INSERT, UPDATE",
            });
        }
        let map = self.table.open(txn);
        let mut affected = 0;
        for source in &self.rows {
            affected += self.merge_row(&map, source)?;
        }
        Ok(affected)
    }

    fn merge_row(&self, map: &SqlMap<'_>, source: &[SqlValue]) -> Result<u64> {
        if source.len() != self.columns.len() {
            return Err(Error::ColumnCountMismatch);
        }
        let full = self.build_row(source);

        let updated = self.try_update(map, &full, source)?;
        if updated > 1 {
            return Err(Error::DuplicateKey {
                index: self.key_index_name(),
            });
        }
        if updated == 1 {
            return Ok(1);
        }

        self.table.schema().validate_row(&full)?;
        if !self.table.fire_before_insert(&full) {
            return Ok(0);
        }
        match self.insert(map, &full) {
            Ok(()) => {
                self.table.fire_after_insert(&full);
                Ok(1)
            }
            Err(Error::DuplicateKey { .. }) if self.primary_key_is_prefix_of_declared_key() => {
                Err(Error::ConcurrentUpdate {
                    table: self.table.schema().name.clone(),
                })
            }
            Err(e) => Err(e),
        }
    }

    /// Full schema-wide row for `source`; unlisted columns are NULL.
    fn build_row(&self, source: &[SqlValue]) -> Row {
        let mut row = vec![SqlValue::Null; self.table.schema().columns.len()];
        for (value, &index) in source.iter().zip(&self.column_indexes) {
            row[index] = value.clone();
        }
        row
    }

    /// Existing row with the listed columns overwritten from `source`.
    fn overlay(&self, base: &Row, source: &[SqlValue]) -> Row {
        let mut row = base.clone();
        for (value, &index) in source.iter().zip(&self.column_indexes) {
            row[index] = value.clone();
        }
        row
    }

    /// The keyed update; returns how many stored rows matched the key
    /// columns (writing through only when exactly one did).
    fn try_update(&self, map: &SqlMap<'_>, full: &Row, source: &[SqlValue]) -> Result<u64> {
        let schema = self.table.schema();
        if self.key_is_primary() {
            let key = schema.key_of(full);
            match map.get(&key)? {
                Some(existing) => {
                    map.put(key, self.overlay(&existing, source))?;
                    Ok(1)
                }
                None => Ok(0),
            }
        } else {
            let mut matches: Vec<(RowKey, Row)> = Vec::new();
            for entry in map.entries(None) {
                let (key, row) = entry?;
                if self.key_indexes.iter().all(|&i| row[i] == full[i]) {
                    matches.push((key, row));
                }
            }
            if matches.len() != 1 {
                return Ok(matches.len() as u64);
            }
            let (key, existing) = matches.remove(0);
            let updated = self.overlay(&existing, source);
            let new_key = schema.key_of(&updated);
            if new_key != key {
                map.remove(key)?;
            }
            map.put(new_key, updated)?;
            Ok(1)
        }
    }

    fn insert(&self, map: &SqlMap<'_>, full: &Row) -> Result<()> {
        let key = self.table.schema().key_of(full);
        if map.get(&key)?.is_some() {
            return Err(Error::DuplicateKey {
                index: self.table.schema().primary_index_name(),
            });
        }
        map.put(key, full.clone())?;
        Ok(())
    }

    fn key_is_primary(&self) -> bool {
        self.key_indexes == self.table.schema().primary_key
    }

    fn key_index_name(&self) -> String {
        if self.key_is_primary() {
            self.table.schema().primary_index_name()
        } else {
            format!("KEY({})", self.key_columns.join(", "))
        }
    }

    fn primary_key_is_prefix_of_declared_key(&self) -> bool {
        let primary = &self.table.schema().primary_key;
        primary.len() <= self.key_indexes.len()
            && primary.iter().zip(&self.key_indexes).all(|(a, b)| a == b)
    }
}

impl RowSink for MergeStatement {
    fn table(&self) -> &TableSchema {
        self.table.schema()
    }

    fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn set_rows(&mut self, rows: Vec<Row>) {
        self.rows = rows;
    }

    fn rows(&self) -> &[Row] {
        &self.rows
    }
}

impl std::fmt::Debug for MergeStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeStatement")
            .field("table", &self.table.schema().name)
            .field("columns", &self.columns)
            .field("key_columns", &self.key_columns)
            .field("rows", &self.rows.len())
            .finish()
    }
}
