//! In-memory relational backend for testing.

use crate::backend::StoreBackend;
use crate::error::{StoreError, StoreResult};
use crate::statement::{Insert, Predicate, Select, Statement, Update};
use crate::value::{Row, SqlValue};
use std::collections::BTreeMap;

/// One in-memory table.
#[derive(Debug, Clone, Default)]
struct Table {
    /// Primary key column, if the table has one. Link tables do not.
    key_column: Option<String>,
    /// Next value of the key sequence.
    next_key: i64,
    /// Rows in insertion order.
    rows: Vec<Row>,
}

/// An in-memory relational backend.
///
/// Suitable for unit tests, integration tests, and ephemeral sessions.
/// It enforces primary-key uniqueness, supports transactions by
/// snapshotting table state on `begin`, and can inject write failures
/// mid-transaction for atomicity tests.
///
/// # Example
///
/// ```rust
/// use relmap_store::{Insert, MemoryStore, Select, SqlValue, Statement, StoreBackend};
///
/// let mut store = MemoryStore::new();
/// store.define_table("person", Some("id"));
/// store
///     .execute(&Statement::Insert(Insert {
///         table: "person".into(),
///         columns: vec![("id".into(), SqlValue::Integer(1))],
///     }))
///     .unwrap();
/// assert_eq!(store.select(&Select::all("person")).unwrap().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, Table>,
    /// Pre-transaction snapshot, present while a transaction is open.
    snapshot: Option<BTreeMap<String, Table>>,
    /// Fail the (n+1)-th write of every transaction, when set.
    fail_after_writes: Option<usize>,
    txn_writes: usize,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a table and its primary key column.
    ///
    /// Pass `None` for tables without a key of their own (link tables).
    /// Tables touched without a declaration are created keyless.
    pub fn define_table(&mut self, name: impl Into<String>, key_column: Option<&str>) {
        let table = self.tables.entry(name.into()).or_default();
        table.key_column = key_column.map(str::to_owned);
    }

    /// Makes every transaction fail on its (n+1)-th write until
    /// [`MemoryStore::clear_failpoint`] is called.
    pub fn fail_after_writes(&mut self, writes: usize) {
        self.fail_after_writes = Some(writes);
    }

    /// Removes the injected failure.
    pub fn clear_failpoint(&mut self) {
        self.fail_after_writes = None;
    }

    /// Number of rows currently in `table`.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.tables.get(table).map_or(0, |t| t.rows.len())
    }

    fn table_mut(&mut self, name: &str) -> &mut Table {
        self.tables.entry(name.to_owned()).or_default()
    }

    fn check_failpoint(&mut self) -> StoreResult<()> {
        if self.snapshot.is_some() {
            if let Some(limit) = self.fail_after_writes {
                if self.txn_writes >= limit {
                    return Err(StoreError::unavailable("injected write failure"));
                }
            }
            self.txn_writes += 1;
        }
        Ok(())
    }

    fn apply_insert(&mut self, insert: &Insert) -> StoreResult<()> {
        let table = self.table_mut(&insert.table);
        if let Some(key_column) = table.key_column.clone() {
            let key = insert
                .columns
                .iter()
                .find(|(c, _)| *c == key_column)
                .map(|(_, v)| v);
            match key {
                Some(key) if !key.is_null() => {
                    if table
                        .rows
                        .iter()
                        .any(|row| row.get(&key_column) == Some(key))
                    {
                        return Err(StoreError::constraint(format!(
                            "duplicate key {key} in table {}",
                            insert.table
                        )));
                    }
                }
                _ => {
                    return Err(StoreError::constraint(format!(
                        "null primary key in table {}",
                        insert.table
                    )));
                }
            }
        }
        table.rows.push(Row::from(insert.columns.clone()));
        Ok(())
    }

    fn apply_update(&mut self, update: &Update) -> StoreResult<()> {
        let table = self.table_mut(&update.table);
        let row = table
            .rows
            .iter_mut()
            .find(|row| row.get(&update.key_column) == Some(&update.key));
        match row {
            Some(row) => {
                for (column, value) in &update.columns {
                    row.set(column.clone(), value.clone());
                }
                Ok(())
            }
            None => Err(StoreError::constraint(format!(
                "no row with key {} in table {}",
                update.key, update.table
            ))),
        }
    }
}

fn matches(row: &Row, filter: &[Predicate]) -> bool {
    filter.iter().all(|predicate| match predicate {
        Predicate::Eq(column, value) => {
            !value.is_null() && row.get(column) == Some(value)
        }
        Predicate::In(column, values) => row
            .get(column)
            .is_some_and(|v| !v.is_null() && values.contains(v)),
    })
}

impl StoreBackend for MemoryStore {
    fn begin(&mut self) -> StoreResult<()> {
        if self.snapshot.is_some() {
            return Err(StoreError::unavailable("store transaction already open"));
        }
        self.snapshot = Some(self.tables.clone());
        self.txn_writes = 0;
        Ok(())
    }

    fn commit(&mut self) -> StoreResult<()> {
        if self.snapshot.take().is_none() {
            return Err(StoreError::unavailable("no open store transaction"));
        }
        Ok(())
    }

    fn rollback(&mut self) -> StoreResult<()> {
        if let Some(snapshot) = self.snapshot.take() {
            // Key sequences are deliberately not restored: reserved
            // keys stay consumed across rollbacks.
            let sequences: Vec<(String, i64)> = self
                .tables
                .iter()
                .map(|(name, table)| (name.clone(), table.next_key))
                .collect();
            self.tables = snapshot;
            for (name, next_key) in sequences {
                if let Some(table) = self.tables.get_mut(&name) {
                    table.next_key = table.next_key.max(next_key);
                }
            }
        }
        Ok(())
    }

    fn reserve_key(&mut self, table: &str) -> StoreResult<i64> {
        let table = self.table_mut(table);
        table.next_key += 1;
        Ok(table.next_key)
    }

    fn execute(&mut self, statement: &Statement) -> StoreResult<()> {
        self.check_failpoint()?;
        match statement {
            Statement::Insert(insert) => self.apply_insert(insert),
            Statement::Update(update) => self.apply_update(update),
        }
    }

    fn select(&mut self, select: &Select) -> StoreResult<Vec<Row>> {
        let Some(table) = self.tables.get(&select.table) else {
            return Ok(Vec::new());
        };
        let rows = table
            .rows
            .iter()
            .filter(|row| matches(row, &select.filter))
            .map(|row| {
                if select.columns.is_empty() {
                    row.clone()
                } else {
                    let mut projected = Row::new();
                    for column in &select.columns {
                        projected.push(
                            column.clone(),
                            row.get(column).cloned().unwrap_or(SqlValue::Null),
                        );
                    }
                    projected
                }
            })
            .collect();
        Ok(rows)
    }
}
