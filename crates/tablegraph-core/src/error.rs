//! Error types for the core pipeline.
//!
//! Every domain error exposes [`kind`](ProjectionError::kind), which maps it
//! onto the shared [`ErrorKind`] taxonomy. The boundary layers (CLI, HTTP)
//! only look at the kind and the message, so the core never depends on a
//! transport.

use thiserror::Error;

use crate::driver::ConnectionState;

/// Coarse error category shared by every layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A session, table, or required column is absent.
    NotFound,
    /// A session outlived its timeout.
    Expired,
    /// Input was rejected as malformed.
    InvalidFormat,
    /// Zero rows, rules, or tables where at least one is required.
    EmptyInput,
    /// Durable storage is unavailable or corrupted.
    Persistence,
    /// The graph store is unreachable or not ready.
    Connection,
    /// One batch failed part-way through a bulk write.
    BatchWrite,
}

impl ErrorKind {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Expired => "expired",
            ErrorKind::InvalidFormat => "invalid_format",
            ErrorKind::EmptyInput => "empty_input",
            ErrorKind::Persistence => "persistence_error",
            ErrorKind::Connection => "connection_error",
            ErrorKind::BatchWrite => "batch_write_error",
        }
    }
}

/// Errors raised while building a [`Table`](crate::table::Table).
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TableError {
    #[error("table '{table}' has duplicate column '{column}'")]
    DuplicateColumn { table: String, column: String },

    #[error("table '{table}' row {row} has {found} values, expected {expected}")]
    RowWidth {
        table: String,
        row: usize,
        expected: usize,
        found: usize,
    },
}

impl TableError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::InvalidFormat
    }
}

/// Errors raised by column resolution and graph projection.
///
/// Any of these aborts the whole projection; no partial edge list is ever
/// returned alongside them.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProjectionError {
    #[error("no table contains all of the columns {columns:?} (absent from every table: {missing:?})")]
    ColumnsNotFound {
        /// The full requested column set.
        columns: Vec<String>,
        /// Columns that no table has at all.
        missing: Vec<String>,
    },

    #[error("tables '{left}' and '{right}' share no columns to join on")]
    NoSharedColumns { left: String, right: String },

    #[error("projection needs at least one {0}")]
    EmptyInput(&'static str),

    #[error("rule {index}: {reason}")]
    InvalidRule { index: usize, reason: String },
}

impl ProjectionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProjectionError::ColumnsNotFound { .. } | ProjectionError::NoSharedColumns { .. } => {
                ErrorKind::NotFound
            }
            ProjectionError::EmptyInput(_) => ErrorKind::EmptyInput,
            ProjectionError::InvalidRule { .. } => ErrorKind::InvalidFormat,
        }
    }
}

/// Errors reported by a [`GraphStore`](crate::store::GraphStore) backend.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("graph store unreachable: {0}")]
    Connection(String),

    #[error("graph store query failed: {0}")]
    Query(String),

    #[error("operation not supported by this graph store: {0}")]
    Unsupported(&'static str),
}

impl StoreError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StoreError::Connection(_) => ErrorKind::Connection,
            StoreError::Query(_) => ErrorKind::Persistence,
            StoreError::Unsupported(_) => ErrorKind::InvalidFormat,
        }
    }
}

/// Errors raised by the [`GraphWriter`](crate::writer::GraphWriter) and the
/// [`GraphDriver`](crate::driver::GraphDriver) lifecycle.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum WriteError {
    #[error("graph store connection is {0}, not ready")]
    NotReady(ConnectionState),

    #[error("graph store connectivity check failed: {0}")]
    Connectivity(StoreError),

    #[error("nothing to write: edge list is empty")]
    EmptyInput,

    #[error("batch size must be greater than zero")]
    InvalidBatchSize,

    #[error(
        "batch {index} ({size} edges) failed after {committed_batches} committed batches \
         ({committed_edges} edges): {source}"
    )]
    BatchFailed {
        /// 1-based index of the failing batch.
        index: usize,
        size: usize,
        committed_batches: usize,
        committed_edges: usize,
        source: StoreError,
    },

    #[error(transparent)]
    Store(StoreError),
}

impl WriteError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            WriteError::NotReady(_) | WriteError::Connectivity(_) => ErrorKind::Connection,
            WriteError::EmptyInput => ErrorKind::EmptyInput,
            WriteError::InvalidBatchSize => ErrorKind::InvalidFormat,
            WriteError::BatchFailed { .. } => ErrorKind::BatchWrite,
            WriteError::Store(e) => e.kind(),
        }
    }
}

impl From<StoreError> for WriteError {
    fn from(e: StoreError) -> Self {
        WriteError::Store(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_not_found_message_names_columns() {
        let err = ProjectionError::ColumnsNotFound {
            columns: vec!["name".to_string(), "salary".to_string()],
            missing: vec!["salary".to_string()],
        };
        let msg = err.to_string();
        assert!(msg.contains("salary"));
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.kind().code(), "not_found");
    }

    #[test]
    fn test_batch_failed_carries_counts() {
        let err = WriteError::BatchFailed {
            index: 2,
            size: 1000,
            committed_batches: 1,
            committed_edges: 1000,
            source: StoreError::Query("disk full".to_string()),
        };
        assert_eq!(err.kind(), ErrorKind::BatchWrite);
        let msg = err.to_string();
        assert!(msg.contains("batch 2"));
        assert!(msg.contains("1000 edges"));
        assert!(msg.contains("disk full"));
    }

    #[test]
    fn test_not_ready_is_connection_error() {
        let err = WriteError::NotReady(ConnectionState::Closed);
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.to_string().contains("closed"));
    }
}
