//! Scalar values and rows exchanged with the store.

use chrono::NaiveDateTime;
use std::fmt;

/// A scalar value in a store column.
///
/// This is a closed set: the engine maps every entity field to one of
/// these shapes and backends never see anything richer.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    /// Absent value.
    Null,
    /// Boolean.
    Boolean(bool),
    /// Signed 64-bit integer (also used for keys).
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// UTF-8 text.
    Text(String),
    /// Date and time with second precision, no time zone.
    Timestamp(NaiveDateTime),
}

impl SqlValue {
    /// Returns `true` for [`SqlValue::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Returns the integer value, if this is an integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the text value, if this is text.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the boolean value, if this is a boolean.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the timestamp value, if this is a timestamp.
    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        match self {
            Self::Timestamp(t) => Some(*t),
            _ => None,
        }
    }

    /// Name of the value's shape, for diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Text(_) => "text",
            Self::Timestamp(_) => "timestamp",
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Real(r) => write!(f, "{r}"),
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Timestamp(t) => write!(f, "'{t}'"),
        }
    }
}

/// One result row: an ordered mapping from column name to scalar value.
///
/// Column order is the order the store produced; lookups are by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    values: Vec<(String, SqlValue)>,
}

impl Row {
    /// Creates an empty row.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column to the row.
    pub fn push(&mut self, column: impl Into<String>, value: SqlValue) {
        self.values.push((column.into(), value));
    }

    /// Sets a column, replacing an existing value of the same name.
    pub fn set(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.values.iter_mut().find(|(c, _)| *c == column) {
            Some(slot) => slot.1 = value,
            None => self.values.push((column, value)),
        }
    }

    /// Looks up a column by name.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v)
    }

    /// Iterates columns in row order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.values.iter().map(|(c, v)| (c.as_str(), v))
    }

    /// Number of columns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if the row has no columns.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl From<Vec<(String, SqlValue)>> for Row {
    fn from(values: Vec<(String, SqlValue)>) -> Self {
        Self { values }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_preserves_column_order() {
        let mut row = Row::new();
        row.push("b", SqlValue::Integer(2));
        row.push("a", SqlValue::Integer(1));

        let columns: Vec<_> = row.iter().map(|(c, _)| c).collect();
        assert_eq!(columns, vec!["b", "a"]);
    }

    #[test]
    fn row_lookup_by_name() {
        let mut row = Row::new();
        row.push("title", SqlValue::Text("x".into()));

        assert_eq!(row.get("title").and_then(SqlValue::as_str), Some("x"));
        assert!(row.get("missing").is_none());
    }

    #[test]
    fn row_set_replaces_existing() {
        let mut row = Row::new();
        row.push("n", SqlValue::Integer(1));
        row.set("n", SqlValue::Integer(2));

        assert_eq!(row.len(), 1);
        assert_eq!(row.get("n").and_then(SqlValue::as_i64), Some(2));
    }

    #[test]
    fn value_accessors() {
        assert_eq!(SqlValue::Integer(7).as_i64(), Some(7));
        assert_eq!(SqlValue::Text("a".into()).as_i64(), None);
        assert!(SqlValue::Null.is_null());
        assert_eq!(SqlValue::Boolean(true).as_bool(), Some(true));
    }
}
