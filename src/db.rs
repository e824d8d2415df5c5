use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;

use tablegraph_core::Value;

/// Open (creating if needed) a read-write pool in WAL mode.
pub async fn connect(db_path: &Path) -> Result<SqlitePool> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Open an existing database without write access.
pub async fn connect_read_only(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .read_only(true)
        .create_if_missing(false);

    SqlitePoolOptions::new()
        .max_connections(2)
        .connect_with(options)
        .await
}

pub fn column_names(row: &SqliteRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every cell of `row` by its runtime storage class.
///
/// Blobs become lossy UTF-8 text; non-finite reals become null.
pub fn decode_row(row: &SqliteRow) -> Result<Vec<Value>, sqlx::Error> {
    let mut out = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        let kind = {
            let raw = row.try_get_raw(i)?;
            if raw.is_null() {
                None
            } else {
                Some(raw.type_info().name().to_ascii_uppercase())
            }
        };
        let value = match kind.as_deref() {
            None => Value::Null,
            Some("INTEGER") | Some("INT8") | Some("BIGINT") => {
                Value::Int(row.try_get_unchecked::<i64, _>(i)?)
            }
            Some("BOOLEAN") => Value::Bool(row.try_get_unchecked::<bool, _>(i)?),
            Some("REAL") | Some("FLOAT") | Some("DOUBLE") | Some("NUMERIC") => {
                let x = row.try_get_unchecked::<f64, _>(i)?;
                if x.is_finite() {
                    Value::Float(x)
                } else {
                    Value::Null
                }
            }
            Some("BLOB") => {
                let bytes = row.try_get_unchecked::<Vec<u8>, _>(i)?;
                Value::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            Some(_) => Value::Text(row.try_get_unchecked::<String, _>(i)?),
        };
        out.push(value);
    }
    Ok(out)
}
