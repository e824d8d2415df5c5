//! Relational source: load tables from an SQLite database into a session.
//!
//! A [`DatabaseSource`] picks one of three modes:
//!
//! - `query` set: run it and store the result as table `query_result`.
//! - `table_name` set: load that table (`SELECT * ... LIMIT n` when a limit is given).
//! - neither: load every user table, skipping any that fail to read.
//!
//! The database is opened read-only. Session ids are derived from the
//! source description, so reloading the same source replaces the session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use tablegraph_core::fingerprint::Fingerprint;
use tablegraph_core::{ErrorKind, Table, TableError, TableSet};

use crate::db;

pub const QUERY_TABLE_NAME: &str = "query_result";

#[derive(Error, Debug)]
pub enum SqlSourceError {
    #[error("cannot open database {path}: {reason}")]
    Connection { path: String, reason: String },

    #[error("query failed: {0}")]
    Query(#[source] sqlx::Error),

    #[error("table '{0}' not found in database")]
    TableNotFound(String),

    #[error("database contains no readable tables")]
    NoTables,

    #[error(transparent)]
    Table(#[from] TableError),
}

impl SqlSourceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SqlSourceError::Connection { .. } => ErrorKind::Connection,
            SqlSourceError::Query(_) | SqlSourceError::Table(_) => ErrorKind::InvalidFormat,
            SqlSourceError::TableNotFound(_) => ErrorKind::NotFound,
            SqlSourceError::NoTables => ErrorKind::EmptyInput,
        }
    }
}

/// Where and what to load.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DatabaseSource {
    /// SQLite database file.
    #[serde(alias = "database")]
    pub path: PathBuf,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub table_name: Option<String>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl DatabaseSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            query: None,
            table_name: None,
            limit: None,
        }
    }

    pub fn session_id(&self) -> String {
        let limit = self.limit.map(|n| n.to_string()).unwrap_or_default();
        Fingerprint::new()
            .text("database")
            .text(&self.path.display().to_string())
            .text(self.query.as_deref().unwrap_or(""))
            .text(self.table_name.as_deref().unwrap_or(""))
            .text(&limit)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct LoadedDatabase {
    pub session_id: String,
    pub tables: TableSet,
}

/// Result of a connection probe.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub success: bool,
    pub tables: Vec<String>,
}

pub async fn open(source: &DatabaseSource) -> Result<SqlitePool, SqlSourceError> {
    if !source.path.is_file() {
        return Err(SqlSourceError::Connection {
            path: source.path.display().to_string(),
            reason: "file does not exist".to_string(),
        });
    }
    db::connect_read_only(&source.path)
        .await
        .map_err(|e| SqlSourceError::Connection {
            path: source.path.display().to_string(),
            reason: e.to_string(),
        })
}

pub async fn test_connection(source: &DatabaseSource) -> Result<ConnectionReport, SqlSourceError> {
    let pool = open(source).await?;
    let tables = list_tables(&pool).await;
    pool.close().await;
    Ok(ConnectionReport {
        success: true,
        tables: tables?,
    })
}

pub async fn list_tables(pool: &SqlitePool) -> Result<Vec<String>, SqlSourceError> {
    let rows = sqlx::query(
        "SELECT name FROM sqlite_master \
         WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await
    .map_err(SqlSourceError::Query)?;

    rows.iter()
        .map(|r| r.try_get::<String, _>("name").map_err(SqlSourceError::Query))
        .collect()
}

pub async fn table_columns(pool: &SqlitePool, table: &str) -> Result<Vec<String>, SqlSourceError> {
    let rows = sqlx::query(&format!("PRAGMA table_info({})", quote_ident(table)))
        .fetch_all(pool)
        .await
        .map_err(SqlSourceError::Query)?;
    if rows.is_empty() {
        return Err(SqlSourceError::TableNotFound(table.to_string()));
    }
    rows.iter()
        .map(|r| r.try_get::<String, _>("name").map_err(SqlSourceError::Query))
        .collect()
}

/// Run `sql` and collect the result into a table.
///
/// A query returning no rows yields a table with no columns.
pub async fn run_query(pool: &SqlitePool, name: &str, sql: &str) -> Result<Table, SqlSourceError> {
    let rows = sqlx::query(sql)
        .fetch_all(pool)
        .await
        .map_err(SqlSourceError::Query)?;

    let columns = rows.first().map(db::column_names).unwrap_or_default();
    let mut values = Vec::with_capacity(rows.len());
    for row in &rows {
        values.push(db::decode_row(row).map_err(SqlSourceError::Query)?);
    }
    Ok(Table::new(name, columns, values)?)
}

async fn load_table(
    pool: &SqlitePool,
    table: &str,
    limit: Option<usize>,
) -> Result<Table, SqlSourceError> {
    let mut sql = format!("SELECT * FROM {}", quote_ident(table));
    if let Some(n) = limit {
        sql.push_str(&format!(" LIMIT {}", n));
    }
    run_query(pool, table, &sql).await
}

/// Load the tables `source` describes.
pub async fn load(source: &DatabaseSource) -> Result<LoadedDatabase, SqlSourceError> {
    let pool = open(source).await?;
    let result = load_from_pool(&pool, source).await;
    pool.close().await;
    let tables = result?;

    Ok(LoadedDatabase {
        session_id: source.session_id(),
        tables,
    })
}

async fn load_from_pool(
    pool: &SqlitePool,
    source: &DatabaseSource,
) -> Result<TableSet, SqlSourceError> {
    let mut tables = TableSet::new();

    if let Some(query) = &source.query {
        let table = run_query(pool, QUERY_TABLE_NAME, query).await?;
        tracing::info!(rows = table.row_count(), "query loaded");
        tables.insert(QUERY_TABLE_NAME.to_string(), table);
        return Ok(tables);
    }

    let available = list_tables(pool).await?;

    if let Some(name) = &source.table_name {
        if !available.iter().any(|t| t == name) {
            return Err(SqlSourceError::TableNotFound(name.clone()));
        }
        let table = load_table(pool, name, source.limit).await?;
        tracing::info!(table = %name, rows = table.row_count(), "table loaded");
        tables.insert(name.clone(), table);
        return Ok(tables);
    }

    for name in &available {
        match load_table(pool, name, source.limit).await {
            Ok(table) => {
                tracing::info!(table = %name, rows = table.row_count(), "table loaded");
                tables.insert(name.clone(), table);
            }
            Err(e) => {
                tracing::warn!(table = %name, error = %e, "skipping unreadable table");
            }
        }
    }

    if tables.is_empty() {
        return Err(SqlSourceError::NoTables);
    }
    Ok(tables)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}
