// # SQL Value Model
//
// The small relational value model carried between backends and the wire
// protocol: typed cell values, rows, and materialized query results.

use serde::{Deserialize, Serialize};

/// A single SQL cell value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Double(f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlValue {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl std::fmt::Display for SqlValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(v) => write!(f, "{}", v),
            SqlValue::Int(v) => write!(f, "{}", v),
            SqlValue::Double(v) => write!(f, "{}", v),
            SqlValue::Text(v) => write!(f, "{}", v),
            SqlValue::Bytes(v) => write!(f, "0x{}", hex::encode(v)),
        }
    }
}

/// One result row.
pub type Row = Vec<SqlValue>;

/// Fully materialized query result as produced by a backend driver.
/// Paging toward the client happens above this, in the session's
/// open-result-set bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

impl QueryResult {
    pub fn single(column: &str, value: SqlValue) -> Self {
        Self {
            columns: vec![column.to_string()],
            rows: vec![vec![value]],
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }
}

/// Outcome of a generic `execute`, mirroring the dual result shape of a
/// statement that may return rows or an update count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExecuteOutcome {
    Rows(QueryResult),
    UpdateCount(u64),
}
