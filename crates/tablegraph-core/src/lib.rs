//! # tablegraph Core
//!
//! Runtime-free logic for tablegraph: the table model, content fingerprints,
//! column resolution and joins, the graph projection engine, the graph store
//! abstraction, and the batched bulk writer.
//!
//! This crate contains no tokio, sqlx, filesystem I/O, or other native-only
//! dependencies. The root `tablegraph` crate supplies the SQLite-backed
//! stores, ingestion, the session cache, and the CLI/HTTP surfaces.
//!
//! ## Pipeline
//!
//! ```text
//! TableSet ──▶ resolve ──▶ projection ──▶ Vec<ProjectedEdge> ──▶ writer ──▶ GraphStore
//!              (columns,     (records +                          (batches,
//!               joins)        fingerprints)                       merges)
//! ```

pub mod driver;
pub mod error;
pub mod fingerprint;
pub mod projection;
pub mod resolve;
pub mod store;
pub mod table;
pub mod writer;

pub use driver::{ConnectionState, GraphDriver};
pub use error::{ErrorKind, ProjectionError, StoreError, TableError, WriteError};
pub use projection::{
    project, project_with, GraphElementRecord, GraphElementSpec, ProjectedEdge, ProjectionRule,
};
pub use resolve::JoinKind;
pub use store::{GraphStats, GraphStore, Record};
pub use table::{Table, TableInfo, TableSet, Value};
pub use writer::{CancelToken, GraphWriter, WriteResult, DEFAULT_BATCH_SIZE};
