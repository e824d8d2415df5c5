//! In-memory [`GraphStore`] for tests and dry runs.
//!
//! Nodes and relationships live in `IndexMap`s behind a `std::sync::RwLock`,
//! so iteration follows first-write order. `run_query` is not supported.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use indexmap::IndexMap;

use crate::error::StoreError;
use crate::projection::ProjectedEdge;
use crate::table::Value;

use super::{GraphStats, GraphStore, Record};

type NodeKey = (String, String);
/// (type, source label, source id, target label, target id)
type RelKey = (String, String, String, String, String);

/// A stored relationship.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRelationship {
    pub id: String,
    pub properties: IndexMap<String, Value>,
}

#[derive(Default)]
struct Graph {
    nodes: IndexMap<NodeKey, IndexMap<String, Value>>,
    relationships: IndexMap<RelKey, StoredRelationship>,
}

/// In-memory graph store.
#[derive(Default)]
pub struct InMemoryGraphStore {
    graph: RwLock<Graph>,
}

impl InMemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Graph> {
        self.graph.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Graph> {
        self.graph.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Properties of the node `(label, id)`, if present.
    pub fn node(&self, label: &str, id: &str) -> Option<IndexMap<String, Value>> {
        self.read()
            .nodes
            .get(&(label.to_string(), id.to_string()))
            .cloned()
    }

    /// Every relationship of type `rel_type`, in first-write order.
    pub fn relationships(&self, rel_type: &str) -> Vec<StoredRelationship> {
        self.read()
            .relationships
            .iter()
            .filter(|(k, _)| k.0 == rel_type)
            .map(|(_, r)| r.clone())
            .collect()
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn verify_connectivity(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn merge_batch(&self, batch: &[ProjectedEdge]) -> Result<(), StoreError> {
        let mut graph = self.write();
        for edge in batch {
            for node in [&edge.source, &edge.target] {
                graph
                    .nodes
                    .entry((node.label.clone(), node.id.clone()))
                    .or_insert_with(|| node.properties.clone());
            }
            let key = (
                edge.relationship.label.clone(),
                edge.source.label.clone(),
                edge.source.id.clone(),
                edge.target.label.clone(),
                edge.target.id.clone(),
            );
            graph.relationships.insert(
                key,
                StoredRelationship {
                    id: edge.relationship.id.clone(),
                    properties: edge.relationship.properties.clone(),
                },
            );
        }
        Ok(())
    }

    async fn run_query(&self, _query: &str, _params: &[Value]) -> Result<Vec<Record>, StoreError> {
        Err(StoreError::Unsupported("run_query"))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let mut graph = self.write();
        graph.nodes.clear();
        graph.relationships.clear();
        Ok(())
    }

    async fn stats(&self) -> Result<GraphStats, StoreError> {
        let graph = self.read();
        let mut stats = GraphStats {
            total_nodes: graph.nodes.len() as u64,
            total_relationships: graph.relationships.len() as u64,
            ..GraphStats::default()
        };
        for (label, _) in graph.nodes.keys() {
            *stats.node_labels.entry(label.clone()).or_insert(0) += 1;
        }
        for key in graph.relationships.keys() {
            *stats.relationship_types.entry(key.0.clone()).or_insert(0) += 1;
        }
        Ok(stats)
    }

    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projection::GraphElementRecord;

    fn record(label: &str, pairs: &[(&str, Value)]) -> GraphElementRecord {
        GraphElementRecord::new(
            label,
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn edge(person: &str, city: &str, since: i64) -> ProjectedEdge {
        ProjectedEdge {
            source: record("Person", &[("name", Value::from(person))]),
            target: record("City", &[("city", Value::from(city))]),
            relationship: record("LIVES_IN", &[("since", Value::Int(since))]),
        }
    }

    #[tokio::test]
    async fn test_merge_is_idempotent() {
        let store = InMemoryGraphStore::new();
        let batch = vec![edge("John", "NYC", 2020), edge("Jane", "NYC", 2021)];
        store.merge_batch(&batch).await.unwrap();
        store.merge_batch(&batch).await.unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.total_nodes, 3);
        assert_eq!(stats.total_relationships, 2);
        assert_eq!(stats.node_labels["Person"], 2);
        assert_eq!(stats.node_labels["City"], 1);
        assert_eq!(stats.relationship_types["LIVES_IN"], 2);
    }

    #[tokio::test]
    async fn test_relationship_properties_are_overwritten() {
        let store = InMemoryGraphStore::new();
        store.merge_batch(&[edge("John", "NYC", 2020)]).await.unwrap();
        store.merge_batch(&[edge("John", "NYC", 2024)]).await.unwrap();

        let rels = store.relationships("LIVES_IN");
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].properties["since"], Value::Int(2024));
    }

    #[tokio::test]
    async fn test_clear_and_query() {
        let store = InMemoryGraphStore::new();
        let e = edge("John", "NYC", 2020);
        store.merge_batch(&[e.clone()]).await.unwrap();
        assert!(store.node("Person", &e.source.id).is_some());

        store.clear().await.unwrap();
        assert_eq!(store.stats().await.unwrap(), GraphStats::default());
        assert_eq!(
            store.run_query("MATCH (n) RETURN n", &[]).await.unwrap_err(),
            StoreError::Unsupported("run_query")
        );
    }
}
