//! # tablegraph
//!
//! Session-scoped tabular data cache, tabular-to-graph projection, and a
//! batched graph writer.
//!
//! Uploaded files or SQLite queries become named tables stored under a
//! content-derived session id. Projection rules map the columns of those
//! tables onto source nodes, target nodes and relationships; the resulting
//! edges are merged into a graph store in batches.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐   ┌─────────────┐
//! │ Files / SQL │──▶│ SessionCache │──▶│  Projection  │──▶│ GraphWriter │
//! │  (ingest)   │   │ memory+SQLite│   │ resolve+join │   │   batches   │
//! └─────────────┘   └──────────────┘   └──────────────┘   └──────┬──────┘
//!                                                                ▼
//!                      ┌──────────┐   ┌──────────┐      ┌──────────────┐
//!                      │   CLI    │   │   HTTP   │      │ SQLite graph │
//!                      │ (tgraph) │   │  (axum)  │      │    store     │
//!                      └──────────┘   └──────────┘      └──────────────┘
//! ```
//!
//! The runtime-free pieces (table model, fingerprints, resolver, projection,
//! graph store trait, writer) live in `tablegraph-core`.
//!
//! ## Quick Start
//!
//! ```bash
//! tgraph init
//! tgraph ingest files people.csv
//! tgraph build <session-id> --rules rules.json
//! tgraph graph stats
//! tgraph serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | SQLite pools and row decoding |
//! | [`migrate`] | Schema migrations |
//! | [`session`] | Durable session store and expiring cache |
//! | [`ingest`] | File decoding |
//! | [`sql_source`] | SQLite tables and queries as a source |
//! | [`sqlite_graph`] | SQLite-backed graph store |
//! | [`context`] | Service operations shared by CLI and server |
//! | [`commands`] | CLI command implementations |
//! | [`server`] | HTTP server |

pub mod commands;
pub mod config;
pub mod context;
pub mod db;
pub mod ingest;
pub mod migrate;
pub mod server;
pub mod session;
pub mod sql_source;
pub mod sqlite_graph;

pub use tablegraph_core as core;
