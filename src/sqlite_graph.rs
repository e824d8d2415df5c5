//! SQLite-backed [`GraphStore`].
//!
//! Nodes live in `graph_nodes`, relationships in `graph_relationships`
//! (see [`crate::migrate`]). Each batch is one transaction, so a failed
//! batch leaves nothing behind.
//!
//! `run_query` accepts read-only SQL (`SELECT` / `WITH`) with `?` positional
//! parameters against those two tables. It runs on a second pool opened with
//! `PRAGMA query_only`, so a `WITH ... DELETE` is refused by SQLite itself.

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use tablegraph_core::{GraphStats, GraphStore, ProjectedEdge, Record, StoreError, Value};

use crate::db;

pub struct SqliteGraphStore {
    pool: SqlitePool,
    reader: SqlitePool,
}

impl SqliteGraphStore {
    /// Wrap a pool whose schema was created by
    /// [`apply_graph_schema`](crate::migrate::apply_graph_schema).
    ///
    /// A lazily connected query-only pool over the same database is opened
    /// alongside it for [`run_query`](GraphStore::run_query).
    pub fn new(pool: SqlitePool) -> Self {
        let options = (*pool.connect_options())
            .clone()
            .pragma("query_only", "ON");
        let reader = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_lazy_with(options);
        Self { pool, reader }
    }
}

fn query_err(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
            StoreError::Connection(e.to_string())
        }
        other => StoreError::Query(other.to_string()),
    }
}

fn to_json(props: &indexmap::IndexMap<String, Value>) -> Result<String, StoreError> {
    serde_json::to_string(props).map_err(|e| StoreError::Query(e.to_string()))
}

/// Fast-fail check before the query reaches the query-only pool.
fn is_read_only(sql: &str) -> bool {
    let trimmed = sql.trim().trim_end_matches(';').trim_end();
    if trimmed.contains(';') {
        return false;
    }
    let head = trimmed
        .split_whitespace()
        .next()
        .unwrap_or("")
        .to_ascii_uppercase();
    head == "SELECT" || head == "WITH"
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn verify_connectivity(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(())
    }

    async fn merge_batch(&self, batch: &[ProjectedEdge]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;

        for edge in batch {
            for node in [&edge.source, &edge.target] {
                sqlx::query(
                    "INSERT INTO graph_nodes (label, id, properties_json) VALUES (?, ?, ?) \
                     ON CONFLICT(label, id) DO NOTHING",
                )
                .bind(&node.label)
                .bind(&node.id)
                .bind(to_json(&node.properties)?)
                .execute(&mut *tx)
                .await
                .map_err(query_err)?;
            }

            sqlx::query(
                "INSERT INTO graph_relationships \
                 (rel_type, source_label, source_id, target_label, target_id, rel_id, properties_json) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(rel_type, source_label, source_id, target_label, target_id) \
                 DO UPDATE SET rel_id = excluded.rel_id, properties_json = excluded.properties_json",
            )
            .bind(&edge.relationship.label)
            .bind(&edge.source.label)
            .bind(&edge.source.id)
            .bind(&edge.target.label)
            .bind(&edge.target.id)
            .bind(&edge.relationship.id)
            .bind(to_json(&edge.relationship.properties)?)
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        }

        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn run_query(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, StoreError> {
        if !is_read_only(query) {
            return Err(StoreError::Query(
                "only single SELECT or WITH statements are allowed".to_string(),
            ));
        }

        let mut q = sqlx::query(query);
        for p in params {
            q = match p {
                Value::Null => q.bind(None::<String>),
                Value::Bool(b) => q.bind(*b),
                Value::Int(i) => q.bind(*i),
                Value::Float(x) => q.bind(*x),
                Value::Text(s) => q.bind(s.clone()),
            };
        }

        let rows = q.fetch_all(&self.reader).await.map_err(query_err)?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let values = db::decode_row(row).map_err(query_err)?;
            out.push(db::column_names(row).into_iter().zip(values).collect());
        }
        Ok(out)
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(query_err)?;
        sqlx::query("DELETE FROM graph_relationships")
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        sqlx::query("DELETE FROM graph_nodes")
            .execute(&mut *tx)
            .await
            .map_err(query_err)?;
        tx.commit().await.map_err(query_err)?;
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let mut stats = GraphStats::default();

        let labels = sqlx::query("SELECT label, COUNT(*) AS n FROM graph_nodes GROUP BY label")
            .fetch_all(&self.pool)
            .await
            .map_err(query_err)?;
        for row in &labels {
            let label: String = row.try_get("label").map_err(query_err)?;
            let n: i64 = row.try_get("n").map_err(query_err)?;
            stats.total_nodes += n as u64;
            stats.node_labels.insert(label, n as u64);
        }

        let types = sqlx::query(
            "SELECT rel_type, COUNT(*) AS n FROM graph_relationships GROUP BY rel_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(query_err)?;
        for row in &types {
            let rel_type: String = row.try_get("rel_type").map_err(query_err)?;
            let n: i64 = row.try_get("n").map_err(query_err)?;
            stats.total_relationships += n as u64;
            stats.relationship_types.insert(rel_type, n as u64);
        }

        Ok(stats)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.reader.close().await;
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;
    use tablegraph_core::GraphElementRecord;
    use tempfile::TempDir;

    async fn store(tmp: &TempDir) -> SqliteGraphStore {
        let pool = db::connect(&tmp.path().join("graph.sqlite")).await.unwrap();
        crate::migrate::apply_graph_schema(&pool).await.unwrap();
        SqliteGraphStore::new(pool)
    }

    fn record(label: &str, pairs: &[(&str, Value)]) -> GraphElementRecord {
        let props: IndexMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        GraphElementRecord::new(label, props)
    }

    fn edge(person: &str, city: &str, since: i64) -> ProjectedEdge {
        ProjectedEdge {
            source: record("Person", &[("name", person.into())]),
            target: record("City", &[("name", city.into())]),
            relationship: record("LIVES_IN", &[("since", Value::Int(since))]),
        }
    }

    #[tokio::test]
    async fn test_merge_twice_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        let batch = vec![edge("John", "NYC", 2020), edge("Jane", "NYC", 2021)];
        store.merge_batch(&batch).await.unwrap();
        store.merge_batch(&batch).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_relationships, 2);
        assert_eq!(stats.node_labels["Person"], 2);
        assert_eq!(stats.relationship_types["LIVES_IN"], 2);
    }

    #[tokio::test]
    async fn test_relationship_overwrite_and_query() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store.merge_batch(&[edge("John", "NYC", 2020)]).await.unwrap();
        store.merge_batch(&[edge("John", "NYC", 2024)]).await.unwrap();

        let rows = store
            .run_query(
                "SELECT properties_json FROM graph_relationships WHERE rel_type = ?",
                &[Value::from("LIVES_IN")],
            )
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["properties_json"], Value::from(r#"{"since":2024}"#));
    }

    #[tokio::test]
    async fn test_rejects_writes_through_query() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store.merge_batch(&[edge("John", "NYC", 2020)]).await.unwrap();
        for sql in [
            "DELETE FROM graph_nodes",
            "SELECT 1; DELETE FROM graph_nodes",
            "WITH x AS (SELECT 1) DELETE FROM graph_nodes",
            "WITH x AS (SELECT 1) INSERT INTO graph_nodes (label, id, properties_json) \
             SELECT 'Evil', 'e1', '{}' FROM x",
        ] {
            assert!(matches!(
                store.run_query(sql, &[]).await,
                Err(StoreError::Query(_))
            ));
        }
        assert_eq!(store.run_query("SELECT 1 AS one;", &[]).await.unwrap().len(), 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 2);
        assert!(!stats.node_labels.contains_key("Evil"));
    }

    #[tokio::test]
    async fn test_clear_and_close() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp).await;
        store.verify_connectivity().await.unwrap();
        store.merge_batch(&[edge("John", "NYC", 2020)]).await.unwrap();
        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), GraphStats::default());

        store.close().await.unwrap();
        assert!(matches!(
            store.verify_connectivity().await,
            Err(StoreError::Connection(_))
        ));
    }
}
