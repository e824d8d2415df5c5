//! # tablegraph CLI (`tgraph`)
//!
//! Load tabular data into sessions, project it into a property graph and
//! bulk-write the graph.
//!
//! ## Usage
//!
//! ```bash
//! tgraph --config ./config/tablegraph.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tgraph init` | Create the SQLite databases and run schema migrations |
//! | `tgraph ingest files <paths>...` | Decode files into a session |
//! | `tgraph ingest db --path <file>` | Load tables from an SQLite database into a session |
//! | `tgraph sessions list\|show\|delete\|cleanup` | Inspect and manage sessions |
//! | `tgraph validate --rules <file>` | Check projection rules |
//! | `tgraph build <session> --rules <file>` | Project a session and write the graph |
//! | `tgraph graph stats\|query\|clear` | Inspect or reset the graph |
//! | `tgraph serve` | Start the HTTP server |
//!
//! ## Examples
//!
//! ```bash
//! tgraph init
//! tgraph ingest files people.csv offices.json
//! tgraph build 3f2a... --rules rules.json --batch-size 500
//! tgraph graph query "SELECT label, COUNT(*) AS n FROM graph_nodes GROUP BY label"
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use tablegraph::commands::{self, BuildArgs};
use tablegraph::config::{self, Config};
use tablegraph::migrate;
use tablegraph::server;
use tablegraph::sql_source::DatabaseSource;
use tablegraph_core::JoinKind;

const DEFAULT_CONFIG: &str = "./config/tablegraph.toml";

/// tablegraph: tabular data to property graphs.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. Without one, defaults are used and data lives under `./data`.
#[derive(Parser)]
#[command(
    name = "tgraph",
    about = "tablegraph: cache tabular data in sessions and project it into a property graph",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to
    /// `./config/tablegraph.toml` when that file exists.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `tablegraph=debug,sqlx=warn`.
    /// Overrides `[logging].level`; `RUST_LOG` overrides both.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load data into a session.
    Ingest {
        #[command(subcommand)]
        source: IngestSource,
    },

    /// Inspect and manage sessions.
    Sessions {
        #[command(subcommand)]
        action: SessionAction,
    },

    /// Check projection rules, optionally against a session's tables.
    Validate {
        /// JSON file with a list of rules.
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        session: Option<String>,
    },

    /// Project a session's tables and write the graph.
    Build {
        session_id: String,

        /// JSON file with a list of rules.
        #[arg(long)]
        rules: PathBuf,

        /// Keep only the first N projected edges.
        #[arg(long)]
        limit: Option<usize>,

        /// Edges per write batch. Overrides `[graph].batch_size`.
        #[arg(long)]
        batch_size: Option<usize>,

        /// Project only; write nothing.
        #[arg(long)]
        dry_run: bool,

        /// `inner` or `right`. Overrides `[graph].join`.
        #[arg(long, value_parser = parse_join)]
        join: Option<JoinKind>,

        #[arg(long)]
        json: bool,
    },

    /// Inspect or reset the graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum IngestSource {
    /// Decode CSV/TSV/DSV/TXT/JSON/JSONL files into one session.
    Files {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Load tables from an SQLite database.
    Db {
        /// SQLite database file.
        #[arg(long)]
        path: PathBuf,
        /// Run this query and store the result as `query_result`.
        #[arg(long, conflicts_with = "table")]
        query: Option<String>,
        /// Load only this table.
        #[arg(long)]
        table: Option<String>,
        /// Row limit per table.
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum SessionAction {
    List {
        #[arg(long)]
        json: bool,
    },
    Show {
        id: String,
        #[arg(long)]
        json: bool,
    },
    Delete {
        id: String,
    },
    /// Remove every expired session.
    Cleanup,
}

#[derive(Subcommand)]
enum GraphAction {
    Stats {
        #[arg(long)]
        json: bool,
    },
    /// Run a read-only SQL query over `graph_nodes` / `graph_relationships`.
    Query {
        sql: String,
        /// Positional `?` parameter; repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
    },
    /// Delete every node and relationship.
    Clear,
}

fn parse_join(s: &str) -> Result<JoinKind, String> {
    s.parse()
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path)?,
        None => {
            let default = PathBuf::from(DEFAULT_CONFIG);
            if default.exists() {
                config::load_config(&default)?
            } else {
                Config::minimal()
            }
        }
    };
    init_logging(cli.log_level.as_deref().unwrap_or(&cfg.logging.level));

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Ingest { source } => match source {
            IngestSource::Files { paths, json } => {
                commands::run_ingest_files(&cfg, &paths, json).await?;
            }
            IngestSource::Db {
                path,
                query,
                table,
                limit,
                json,
            } => {
                let source = DatabaseSource {
                    path,
                    query,
                    table_name: table,
                    limit,
                };
                commands::run_ingest_db(&cfg, &source, json).await?;
            }
        },
        Commands::Sessions { action } => match action {
            SessionAction::List { json } => commands::run_sessions_list(&cfg, json).await?,
            SessionAction::Show { id, json } => commands::run_sessions_show(&cfg, &id, json).await?,
            SessionAction::Delete { id } => commands::run_sessions_delete(&cfg, &id).await?,
            SessionAction::Cleanup => commands::run_sessions_cleanup(&cfg).await?,
        },
        Commands::Validate { rules, session } => {
            commands::run_validate(&cfg, &rules, session.as_deref()).await?;
        }
        Commands::Build {
            session_id,
            rules,
            limit,
            batch_size,
            dry_run,
            join,
            json,
        } => {
            commands::run_build(
                &cfg,
                BuildArgs {
                    session_id,
                    rules,
                    limit,
                    batch_size,
                    dry_run,
                    join,
                    json,
                },
            )
            .await?;
        }
        Commands::Graph { action } => match action {
            GraphAction::Stats { json } => commands::run_graph_stats(&cfg, json).await?,
            GraphAction::Query { sql, params } => {
                commands::run_graph_query(&cfg, &sql, &params).await?;
            }
            GraphAction::Clear => commands::run_graph_clear(&cfg).await?,
        },
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
    }

    Ok(())
}
