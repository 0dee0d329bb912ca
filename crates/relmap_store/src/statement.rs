//! Statement shapes issued by the engine.

use crate::value::SqlValue;

/// A filter predicate over one column.
///
/// The engine compiles its predicate trees down to conjunctions of
/// these; backends never see anything beyond equality and membership.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Column equals value. Null never matches.
    Eq(String, SqlValue),
    /// Column is a member of the value set.
    In(String, Vec<SqlValue>),
}

/// An insert of one row.
#[derive(Debug, Clone)]
pub struct Insert {
    /// Target table.
    pub table: String,
    /// Column values in engine order.
    pub columns: Vec<(String, SqlValue)>,
}

/// An update of one row, addressed by its key column.
#[derive(Debug, Clone)]
pub struct Update {
    /// Target table.
    pub table: String,
    /// Name of the key column used to address the row.
    pub key_column: String,
    /// Key value of the row to update.
    pub key: SqlValue,
    /// Columns to overwrite.
    pub columns: Vec<(String, SqlValue)>,
}

/// A write statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Insert a row.
    Insert(Insert),
    /// Update a row.
    Update(Update),
}

impl Statement {
    /// The table the statement targets.
    #[must_use]
    pub fn table(&self) -> &str {
        match self {
            Self::Insert(i) => &i.table,
            Self::Update(u) => &u.table,
        }
    }
}

/// A read query: one table, a conjunction of predicates.
///
/// An empty `columns` list selects every column of the table. Backends
/// return matching rows in insertion order.
#[derive(Debug, Clone)]
pub struct Select {
    /// Table to read.
    pub table: String,
    /// Columns to return; empty means all.
    pub columns: Vec<String>,
    /// Conjunction of filters; empty matches every row.
    pub filter: Vec<Predicate>,
}

impl Select {
    /// Creates a select of every column of `table` with no filter.
    #[must_use]
    pub fn all(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            filter: Vec::new(),
        }
    }

    /// Adds a predicate to the conjunction.
    #[must_use]
    pub fn and(mut self, predicate: Predicate) -> Self {
        self.filter.push(predicate);
        self
    }
}
