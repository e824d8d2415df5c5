//! In-memory table model.
//!
//! A [`Table`] is a named rectangle: ordered unique column names plus rows
//! stored as `Vec<Value>` aligned with those columns. Tables are immutable
//! once built; every other component only reads them.
//!
//! A [`TableSet`] keeps tables in insertion order, which is the scan order
//! used by the column resolver.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::TableError;

/// Named tables in insertion order.
pub type TableSet = IndexMap<String, Table>;

/// A scalar cell value.
///
/// Serialises untagged, so a JSON round trip keeps the variant: `1` stays
/// [`Value::Int`], `1.0` stays [`Value::Float`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Infer a scalar from raw text (CSV cells, query parameters).
    ///
    /// Empty text is `Null`; integers, finite floats and `true`/`false`
    /// (case-insensitive) are parsed; everything else stays text.
    pub fn infer(raw: &str) -> Value {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Value::Null;
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Int(i);
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if f.is_finite() {
                return Value::Float(f);
            }
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::Text(raw.to_string()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

/// A named rectangular table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    /// Build a table, checking that column names are unique and that every
    /// row has exactly one value per column.
    pub fn new(
        name: impl Into<String>,
        columns: Vec<String>,
        rows: Vec<Vec<Value>>,
    ) -> Result<Self, TableError> {
        let name = name.into();
        let mut seen = HashSet::new();
        for col in &columns {
            if !seen.insert(col.as_str()) {
                return Err(TableError::DuplicateColumn {
                    table: name,
                    column: col.clone(),
                });
            }
        }
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(TableError::RowWidth {
                    table: name,
                    row: i,
                    expected: columns.len(),
                    found: row.len(),
                });
            }
        }
        Ok(Self {
            name,
            columns,
            rows,
        })
    }

    /// Assemble a table whose shape the caller already guarantees.
    pub(crate) fn from_parts(name: String, columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self {
            name,
            columns,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn has_columns<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required
            .iter()
            .all(|c| self.column_index(c.as_ref()).is_some())
    }

    /// Value at `(row, column)`, if both exist.
    pub fn value(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row).map(|r| &r[idx])
    }

    /// Keep only `columns`, in the given order. Unknown columns are skipped
    /// and repeated names are collapsed to their first occurrence.
    pub fn select<S: AsRef<str>>(&self, columns: &[S]) -> Table {
        let mut names: Vec<String> = Vec::with_capacity(columns.len());
        let mut indices: Vec<usize> = Vec::with_capacity(columns.len());
        for col in columns {
            let col = col.as_ref();
            if names.iter().any(|n| n == col) {
                continue;
            }
            if let Some(idx) = self.column_index(col) {
                names.push(col.to_string());
                indices.push(idx);
            }
        }
        let rows = self
            .rows
            .iter()
            .map(|r| indices.iter().map(|&i| r[i].clone()).collect())
            .collect();
        Table {
            name: self.name.clone(),
            columns: names,
            rows,
        }
    }

    /// Row as a column→value map, in column order.
    pub fn record(&self, row: usize) -> Option<IndexMap<String, Value>> {
        self.rows.get(row).map(|r| {
            self.columns
                .iter()
                .cloned()
                .zip(r.iter().cloned())
                .collect()
        })
    }

    /// Derived metadata with up to `preview_rows` preview records.
    pub fn info(&self, preview_rows: usize) -> TableInfo {
        let preview = (0..self.rows.len().min(preview_rows))
            .filter_map(|i| self.record(i))
            .collect();
        TableInfo {
            table_name: self.name.clone(),
            columns: self.columns.clone(),
            total_rows: self.rows.len(),
            total_columns: self.columns.len(),
            preview,
        }
    }
}

/// Per-table metadata kept alongside a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub table_name: String,
    pub columns: Vec<String>,
    pub total_rows: usize,
    pub total_columns: usize,
    pub preview: Vec<IndexMap<String, Value>>,
}
