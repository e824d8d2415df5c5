//! CLI command implementations.
//!
//! Each `run_*` function opens an [`AppContext`], performs one service
//! operation and prints a human-readable summary to stdout. Logs go to
//! stderr, so stdout stays parseable for `graph query` and `--json`.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use tablegraph_core::{JoinKind, ProjectionRule, Value};

use crate::config::Config;
use crate::context::{AppContext, BuildRequest};
use crate::ingest::UploadedFile;
use crate::session::SessionInfo;
use crate::sql_source::DatabaseSource;

/// Read projection rules from a JSON file holding either a list of rules
/// or an object with a `rules` list.
pub fn load_rules(path: &Path) -> Result<Vec<ProjectionRule>> {
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum RulesFile {
        Rules(Vec<ProjectionRule>),
        Wrapped {
            #[serde(alias = "configs")]
            rules: Vec<ProjectionRule>,
        },
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read rules file: {}", path.display()))?;
    let parsed: RulesFile = serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse rules file: {}", path.display()))?;
    Ok(match parsed {
        RulesFile::Rules(rules) | RulesFile::Wrapped { rules } => rules,
    })
}

fn print_session(info: &SessionInfo) {
    println!("Session: {}", info.session_id);
    println!("  source:  {}", info.source_kind);
    println!("  created: {}", info.created_at.to_rfc3339());
    println!("  expires: {}", info.expires_at.to_rfc3339());
    for (name, t) in &info.tables {
        println!(
            "  table {:<24} {:>8} rows  {:>3} columns  [{}]",
            name,
            t.total_rows,
            t.total_columns,
            t.columns.join(", ")
        );
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn run_ingest_files(config: &Config, paths: &[PathBuf], json: bool) -> Result<()> {
    let files = paths
        .iter()
        .map(|p| UploadedFile::read(p))
        .collect::<Result<Vec<_>, _>>()?;

    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.ingest_files(&files).await;
    ctx.close().await;
    let info = result?;

    if json {
        return print_json(&info);
    }
    println!("Ingested {} file(s).", files.len());
    print_session(&info);
    Ok(())
}

pub async fn run_ingest_db(config: &Config, source: &DatabaseSource, json: bool) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.ingest_database(source).await;
    ctx.close().await;
    let info = result?;

    if json {
        return print_json(&info);
    }
    println!("Loaded {} table(s) from {}.", info.tables.len(), source.path.display());
    print_session(&info);
    Ok(())
}

pub async fn run_sessions_list(config: &Config, json: bool) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.sessions.list().await;
    ctx.close().await;
    let sessions = result?;

    if json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No active sessions.");
        return Ok(());
    }
    for (id, info) in &sessions {
        println!(
            "{}  {:<8}  {} table(s)  expires {}",
            id,
            info.source_kind,
            info.tables.len(),
            info.expires_at.to_rfc3339()
        );
    }
    Ok(())
}

pub async fn run_sessions_show(config: &Config, id: &str, json: bool) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.sessions.require(id).await;
    ctx.close().await;
    let info = result?.summary(ctx.sessions.timeout());

    if json {
        return print_json(&info);
    }
    print_session(&info);
    Ok(())
}

pub async fn run_sessions_delete(config: &Config, id: &str) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let deleted = ctx.sessions.delete(id).await;
    ctx.close().await;

    if !deleted {
        anyhow::bail!("session not found: {}", id);
    }
    println!("Deleted session {}.", id);
    Ok(())
}

pub async fn run_sessions_cleanup(config: &Config) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.sessions.cleanup_expired().await;
    ctx.close().await;
    println!("Removed {} expired session(s).", result?);
    Ok(())
}

pub struct BuildArgs {
    pub session_id: String,
    pub rules: PathBuf,
    pub limit: Option<usize>,
    pub batch_size: Option<usize>,
    pub dry_run: bool,
    pub join: Option<JoinKind>,
    pub json: bool,
}

pub async fn run_build(config: &Config, args: BuildArgs) -> Result<()> {
    let request = BuildRequest {
        rules: load_rules(&args.rules)?,
        limit: args.limit,
        batch_size: args.batch_size,
        dry_run: args.dry_run,
        join: args.join,
    };

    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.build_graph(&args.session_id, &request).await;
    ctx.close().await;
    let report = result?;

    if args.json {
        return print_json(&report);
    }
    println!("Projected {} edge(s) from session {}.", report.edges_projected, report.session_id);
    match &report.write {
        Some(w) => println!(
            "Wrote {} edge(s) in {} batch(es) in {} ms{}.",
            w.edges_processed,
            w.batches,
            w.elapsed_ms,
            if w.cancelled { " (cancelled)" } else { "" }
        ),
        None => println!("Dry run: nothing written."),
    }
    for edge in &report.sample {
        println!(
            "  ({}:{}) -[{}]-> ({}:{})",
            edge.source.label,
            short_id(&edge.source.id),
            edge.relationship.label,
            edge.target.label,
            short_id(&edge.target.id)
        );
    }
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}

pub async fn run_validate(config: &Config, rules: &Path, session: Option<&str>) -> Result<()> {
    let rules = load_rules(rules)?;
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.validate_rules(&rules, session).await;
    ctx.close().await;
    let report = result?;

    if report.success {
        println!("Validated {} graph configuration(s).", rules.len());
        return Ok(());
    }
    for e in &report.errors {
        println!("{}", e);
    }
    anyhow::bail!("{} validation error(s)", report.errors.len())
}

pub async fn run_graph_stats(config: &Config, json: bool) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.graph.stats().await;
    ctx.close().await;
    let stats = result?;

    if json {
        return print_json(&stats);
    }
    println!("Nodes:         {}", stats.total_nodes);
    for (label, n) in &stats.node_labels {
        println!("  {:<24} {}", label, n);
    }
    println!("Relationships: {}", stats.total_relationships);
    for (rel_type, n) in &stats.relationship_types {
        println!("  {:<24} {}", rel_type, n);
    }
    Ok(())
}

/// Print each result row as one JSON object per line.
pub async fn run_graph_query(config: &Config, sql: &str, params: &[String]) -> Result<()> {
    let params: Vec<Value> = params.iter().map(|p| Value::infer(p)).collect();
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.graph.run_query(sql, &params).await;
    ctx.close().await;

    for record in result? {
        println!("{}", serde_json::to_string(&record)?);
    }
    Ok(())
}

pub async fn run_graph_clear(config: &Config) -> Result<()> {
    let ctx = AppContext::open(config.clone()).await?;
    let result = ctx.graph.clear().await;
    ctx.close().await;
    result?;
    println!("Graph cleared.");
    Ok(())
}
