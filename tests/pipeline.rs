use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use tempfile::TempDir;

use tablegraph::config::Config;
use tablegraph::context::{AppContext, BuildRequest};
use tablegraph::db;
use tablegraph::ingest::UploadedFile;
use tablegraph::migrate;
use tablegraph::session::{ManualClock, SessionCache, SessionStore};
use tablegraph::sqlite_graph::SqliteGraphStore;
use tablegraph_core::{
    ErrorKind, GraphDriver, GraphElementSpec, GraphWriter, ProjectionRule,
};

async fn context_with_clock(tmp: &TempDir, clock: Arc<ManualClock>) -> AppContext {
    let config = Config::with_db_path(tmp.path().join("tablegraph.sqlite"));

    let pool = db::connect(&config.db.path).await.unwrap();
    migrate::apply_session_schema(&pool).await.unwrap();
    let graph_pool = db::connect(config.graph_path()).await.unwrap();
    migrate::apply_graph_schema(&graph_pool).await.unwrap();

    let sessions = SessionCache::new(SessionStore::new(pool), Duration::from_secs(60), 5)
        .with_clock(clock);
    let driver = Arc::new(GraphDriver::new(Arc::new(SqliteGraphStore::new(graph_pool))));
    driver.connect().await.unwrap();

    AppContext::from_parts(config, sessions, GraphWriter::new(driver))
}

fn lives_in() -> Vec<ProjectionRule> {
    vec![ProjectionRule {
        source: GraphElementSpec::new("Person", ["name"]),
        target: GraphElementSpec::new("City", ["city"]),
        relationship: GraphElementSpec::new("LIVES_IN", ["since"]),
    }]
}

fn people_csv() -> UploadedFile {
    UploadedFile::new(
        "people.csv",
        "name;city;since\nJohn;NYC;2020\nJane;LA;2021\nBob;NYC;2019\n",
    )
}

#[tokio::test]
async fn test_build_is_idempotent_and_batched() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let ctx = context_with_clock(&tmp, clock).await;

    let info = ctx.ingest_files(&[people_csv()]).await.unwrap();
    assert_eq!(info.tables["people"].total_rows, 3);

    let mut request = BuildRequest::new(lives_in());
    request.batch_size = Some(2);
    let first = ctx.build_graph(&info.session_id, &request).await.unwrap();
    let write = first.write.unwrap();
    assert_eq!(write.edges_processed, 3);
    assert_eq!(write.batches, 2);

    ctx.build_graph(&info.session_id, &request).await.unwrap();
    let stats = ctx.graph.stats().await.unwrap();
    assert_eq!(stats.total_nodes, 5);
    assert_eq!(stats.total_relationships, 3);

    ctx.close().await;
}

#[tokio::test]
async fn test_expired_session_cannot_build() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let ctx = context_with_clock(&tmp, clock.clone()).await;

    let info = ctx.ingest_files(&[people_csv()]).await.unwrap();
    clock.advance(chrono::Duration::seconds(59));
    assert!(ctx.sessions.get(&info.session_id).await.unwrap().is_some());

    clock.advance(chrono::Duration::seconds(1));
    let err = ctx
        .build_graph(&info.session_id, &BuildRequest::new(lives_in()))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Expired);
    assert!(ctx.sessions.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_sessions_survive_restart() {
    let tmp = TempDir::new().unwrap();
    let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();

    let ctx = context_with_clock(&tmp, Arc::new(ManualClock::new(start))).await;
    let info = ctx.ingest_files(&[people_csv()]).await.unwrap();
    ctx.close().await;

    let reopened = context_with_clock(&tmp, Arc::new(ManualClock::new(start))).await;
    let session = reopened.sessions.require(&info.session_id).await.unwrap();
    assert_eq!(session.tables["people"].row_count(), 3);
    assert_eq!(session.tables["people"].columns(), &["name", "city", "since"]);
}

#[tokio::test]
async fn test_failed_projection_writes_nothing() {
    let tmp = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()));
    let ctx = context_with_clock(&tmp, clock).await;
    let info = ctx.ingest_files(&[people_csv()]).await.unwrap();

    let mut rules = lives_in();
    rules.push(ProjectionRule {
        source: GraphElementSpec::new("Person", ["name"]),
        target: GraphElementSpec::new("Country", ["country"]),
        relationship: GraphElementSpec::new("IN", Vec::<String>::new()),
    });
    let err = ctx
        .build_graph(&info.session_id, &BuildRequest::new(rules))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(ctx.graph.stats().await.unwrap().total_nodes, 0);
}
