//! Application context shared by the CLI and the HTTP server.
//!
//! [`AppContext`] owns the session cache and the graph writer and exposes
//! the service operations both front ends call: ingest files or a database
//! into a session, validate projection rules, and build a graph from a
//! session.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use tablegraph_core::{
    project_with, ErrorKind, GraphDriver, GraphWriter, JoinKind, ProjectedEdge, ProjectionError,
    ProjectionRule, StoreError, WriteError, WriteResult,
};

use crate::config::Config;
use crate::db;
use crate::ingest::{self, IngestError, UploadedFile};
use crate::migrate;
use crate::session::{SessionCache, SessionError, SessionInfo, SessionStore, SourceKind};
use crate::sql_source::{self, DatabaseSource, SqlSourceError};
use crate::sqlite_graph::SqliteGraphStore;

/// Edges returned in a build report for inspection.
pub const SAMPLE_EDGES: usize = 5;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error(transparent)]
    Source(#[from] SqlSourceError),

    #[error(transparent)]
    Projection(#[from] ProjectionError),

    #[error(transparent)]
    Write(#[from] WriteError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Session(e) => e.kind(),
            ServiceError::Ingest(e) => e.kind(),
            ServiceError::Source(e) => e.kind(),
            ServiceError::Projection(e) => e.kind(),
            ServiceError::Write(e) => e.kind(),
            ServiceError::Store(e) => e.kind(),
        }
    }
}

/// Parameters of a graph build.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildRequest {
    #[serde(alias = "configs")]
    pub rules: Vec<ProjectionRule>,
    /// Keep only the first `limit` projected edges.
    #[serde(default)]
    pub limit: Option<usize>,
    /// Overrides `[graph].batch_size`.
    #[serde(default)]
    pub batch_size: Option<usize>,
    /// Project only; nothing is written.
    #[serde(default)]
    pub dry_run: bool,
    /// Overrides `[graph].join`.
    #[serde(default)]
    pub join: Option<JoinKind>,
}

impl BuildRequest {
    pub fn new(rules: Vec<ProjectionRule>) -> Self {
        Self {
            rules,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
    pub session_id: String,
    /// Edges produced by the projection, before `limit`.
    pub edges_projected: usize,
    /// `None` for a dry run.
    pub write: Option<WriteResult>,
    pub sample: Vec<ProjectedEdge>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ValidationReport {
    pub success: bool,
    pub errors: Vec<String>,
}

pub struct AppContext {
    pub config: Arc<Config>,
    pub sessions: Arc<SessionCache>,
    pub graph: GraphWriter,
}

impl AppContext {
    /// Open both databases, apply the schemas, and connect the graph store.
    pub async fn open(config: Config) -> anyhow::Result<Self> {
        let pool = db::connect(&config.db.path).await?;
        migrate::apply_session_schema(&pool).await?;

        let graph_pool = db::connect(config.graph_path()).await?;
        migrate::apply_graph_schema(&graph_pool).await?;

        let sessions = SessionCache::new(
            SessionStore::new(pool),
            Duration::from_secs(config.sessions.timeout_secs),
            config.sessions.preview_rows,
        );
        let driver = Arc::new(GraphDriver::new(Arc::new(SqliteGraphStore::new(graph_pool))));
        driver.connect().await?;

        Ok(Self::from_parts(config, sessions, GraphWriter::new(driver)))
    }

    pub fn from_parts(config: Config, sessions: SessionCache, graph: GraphWriter) -> Self {
        Self {
            config: Arc::new(config),
            sessions: Arc::new(sessions),
            graph,
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.graph.driver().close().await {
            tracing::warn!(error = %e, "graph store close failed");
        }
        self.sessions.store().pool().close().await;
    }

    /// Decode uploaded files into a new (or replaced) session.
    pub async fn ingest_files(&self, files: &[UploadedFile]) -> Result<SessionInfo, ServiceError> {
        let ingested = ingest::ingest_files(files, &self.config.ingest)?;
        let id = self
            .sessions
            .create(&ingested.session_id, ingested.tables, SourceKind::File)
            .await?;
        Ok(self.sessions.require(&id).await?.summary(self.sessions.timeout()))
    }

    /// Load tables from a database into a new (or replaced) session.
    pub async fn ingest_database(&self, source: &DatabaseSource) -> Result<SessionInfo, ServiceError> {
        let loaded = sql_source::load(source).await?;
        let id = self
            .sessions
            .create(&loaded.session_id, loaded.tables, SourceKind::Database)
            .await?;
        Ok(self.sessions.require(&id).await?.summary(self.sessions.timeout()))
    }

    /// Project a session's tables and write the edges.
    ///
    /// An unknown or expired session fails before the rules are looked at.
    /// A projection that yields no edges writes nothing and reports an empty
    /// [`WriteResult`].
    pub async fn build_graph(
        &self,
        session_id: &str,
        request: &BuildRequest,
    ) -> Result<BuildReport, ServiceError> {
        let session = self.sessions.require(session_id).await?;
        let join = request.join.unwrap_or_else(|| self.config.join_kind());

        let mut edges = project_with(&request.rules, &session.tables, join)?;
        let projected = edges.len();
        if let Some(limit) = request.limit {
            edges.truncate(limit);
        }
        tracing::info!(
            session_id,
            rules = request.rules.len(),
            projected,
            kept = edges.len(),
            "projection complete"
        );

        let sample = edges.iter().take(SAMPLE_EDGES).cloned().collect();
        let write = if request.dry_run {
            None
        } else if edges.is_empty() {
            tracing::warn!(session_id, "projection produced no edges, nothing written");
            Some(WriteResult::default())
        } else {
            let batch_size = request.batch_size.unwrap_or(self.config.graph.batch_size);
            Some(self.graph.write(&edges, batch_size).await?)
        };

        Ok(BuildReport {
            session_id: session_id.to_string(),
            edges_projected: projected,
            write,
            sample,
        })
    }

    /// Check labels and column lists without touching data. With a session,
    /// also check that every spec's columns resolve to a table.
    pub async fn validate_rules(
        &self,
        rules: &[ProjectionRule],
        session_id: Option<&str>,
    ) -> Result<ValidationReport, ServiceError> {
        let mut errors = structural_errors(rules);

        if let Some(id) = session_id {
            let session = self.sessions.require(id).await?;
            for (i, rule) in rules.iter().enumerate() {
                for (role, spec) in [
                    ("source", &rule.source),
                    ("target", &rule.target),
                    ("relationship", &rule.relationship),
                ] {
                    if spec.columns.is_empty() {
                        continue;
                    }
                    if let Err(e) = tablegraph_core::resolve::find_table(&session.tables, &spec.columns) {
                        errors.push(format!("Config {}: {} {}", i, role, e));
                    }
                }
            }
        }

        Ok(ValidationReport {
            success: errors.is_empty(),
            errors,
        })
    }
}

fn structural_errors(rules: &[ProjectionRule]) -> Vec<String> {
    if rules.is_empty() {
        return vec!["Graph configuration list is empty".to_string()];
    }
    let mut errors = Vec::new();
    for (i, rule) in rules.iter().enumerate() {
        if rule.source.label.trim().is_empty() {
            errors.push(format!("Config {}: Missing source label", i));
        }
        if rule.target.label.trim().is_empty() {
            errors.push(format!("Config {}: Missing target label", i));
        }
        if rule.relationship.label.trim().is_empty() {
            errors.push(format!("Config {}: Missing relationship label", i));
        }
        if rule.source.columns.is_empty() {
            errors.push(format!("Config {}: Source has no properties", i));
        }
        if rule.target.columns.is_empty() {
            errors.push(format!("Config {}: Target has no properties", i));
        }
    }
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use tablegraph_core::GraphElementSpec;

    #[test]
    fn test_structural_errors_list_every_problem() {
        let rule = ProjectionRule {
            source: GraphElementSpec::new("", ["name"]),
            target: GraphElementSpec::new("City", Vec::<String>::new()),
            relationship: GraphElementSpec::new(" ", Vec::<String>::new()),
        };
        assert_eq!(
            structural_errors(&[rule]),
            vec![
                "Config 0: Missing source label",
                "Config 0: Missing relationship label",
                "Config 0: Target has no properties",
            ]
        );
        assert_eq!(structural_errors(&[]).len(), 1);
    }

    #[test]
    fn test_build_request_accepts_bare_fields() {
        let req: BuildRequest = serde_json::from_str(
            r#"{"configs": [{"source": {"label": "P", "properties": ["a"]},
                             "target": {"label": "C", "properties": ["b"]},
                             "rels": {"label": "R"}}],
                "limit": 3, "join": "right"}"#,
        )
        .unwrap();
        assert_eq!(req.rules.len(), 1);
        assert_eq!(req.limit, Some(3));
        assert_eq!(req.join, Some(JoinKind::Right));
        assert!(!req.dry_run);
    }
}
