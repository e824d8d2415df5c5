//! Idempotent schema setup.
//!
//! | Table | Holds |
//! |-------|-------|
//! | `sessions` | one durable record per session: created_at (ms), source kind, table payload JSON, metadata JSON |
//! | `graph_nodes` | merged nodes, keyed by `(label, id)` |
//! | `graph_relationships` | merged relationships, keyed by `(rel_type, source, target)` |

use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(&config.db.path).await?;
    apply_session_schema(&pool).await?;
    pool.close().await;

    let graph = db::connect(config.graph_path()).await?;
    apply_graph_schema(&graph).await?;
    graph.close().await;
    Ok(())
}

pub async fn apply_session_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sessions (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            source_kind TEXT NOT NULL,
            payload_json TEXT NOT NULL,
            metadata_json TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_created_at ON sessions(created_at)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn apply_graph_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_nodes (
            label TEXT NOT NULL,
            id TEXT NOT NULL,
            properties_json TEXT NOT NULL,
            PRIMARY KEY (label, id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS graph_relationships (
            rel_type TEXT NOT NULL,
            source_label TEXT NOT NULL,
            source_id TEXT NOT NULL,
            target_label TEXT NOT NULL,
            target_id TEXT NOT NULL,
            rel_id TEXT NOT NULL,
            properties_json TEXT NOT NULL,
            PRIMARY KEY (rel_type, source_label, source_id, target_label, target_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_graph_rel_target ON graph_relationships(target_label, target_id)",
    )
    .execute(pool)
    .await?;
    Ok(())
}
