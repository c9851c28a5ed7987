//! Row values

use serde::{Deserialize, Serialize};

/// A single column value. Displays as a SQL literal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// 64-bit integer.
    Int(i64),
    /// Text.
    Text(String),
}

impl SqlValue {
    /// Whether this is NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Int(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "'{}'", s.replace('\'', "''")),
        }
    }
}

/// A full table row, one value per schema column.
pub type Row = Vec<SqlValue>;

/// The primary-key projection of a row.
pub type RowKey = Vec<SqlValue>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_as_sql_literals() {
        assert_eq!(SqlValue::Null.to_string(), "NULL");
        assert_eq!(SqlValue::Int(-7).to_string(), "-7");
        assert_eq!(SqlValue::Text("a'b".into()).to_string(), "'a''b'");
    }

    #[test]
    fn test_ordering_groups_by_kind() {
        assert!(SqlValue::Null < SqlValue::Int(i64::MIN));
        assert!(SqlValue::Int(i64::MAX) < SqlValue::Text(String::new()));
    }
}
