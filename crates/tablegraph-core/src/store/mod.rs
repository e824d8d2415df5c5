//! Graph store abstraction.
//!
//! The [`GraphStore`] trait is the seam between the bulk writer and a
//! concrete graph backend. The core ships [`memory::InMemoryGraphStore`];
//! the root crate adds a SQLite-backed store.
//!
//! # Merge semantics
//!
//! | Element | Identity | On conflict |
//! |---------|----------|-------------|
//! | node | `(label, id)` | keep, properties unchanged |
//! | relationship | `(type, source node, target node)` | overwrite properties and id |
//!
//! Matching on the content-derived node id is what makes repeated writes
//! of the same rows idempotent.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::projection::ProjectedEdge;
use crate::table::Value;

/// One row returned by [`GraphStore::run_query`].
pub type Record = IndexMap<String, Value>;

/// Node and relationship counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphStats {
    pub total_nodes: u64,
    pub total_relationships: u64,
    /// Node count per label.
    pub node_labels: BTreeMap<String, u64>,
    /// Relationship count per type.
    pub relationship_types: BTreeMap<String, u64>,
}

/// Abstract graph backend.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// request through a [`GraphDriver`](crate::driver::GraphDriver).
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Cheap round trip proving the backend is reachable.
    async fn verify_connectivity(&self) -> Result<(), StoreError>;

    /// Merge every edge of `batch` as one unit: all of it or none of it.
    async fn merge_batch(&self, batch: &[ProjectedEdge]) -> Result<(), StoreError>;

    /// Ad hoc read access with positional parameters.
    async fn run_query(&self, query: &str, params: &[Value]) -> Result<Vec<Record>, StoreError>;

    /// Delete every node and relationship.
    async fn clear(&self) -> Result<(), StoreError>;

    async fn stats(&self) -> Result<GraphStats, StoreError>;

    /// Release backend resources. Called once by the driver.
    async fn close(&self) -> Result<(), StoreError>;
}
