//! HTTP API.
//!
//! Thin JSON layer over [`AppContext`]. Every handler delegates to a
//! service operation and maps [`ServiceError`] onto a status code.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/files/upload` | Decode base64 file contents into a session |
//! | `GET`    | `/files/formats` | Supported extensions and size limit |
//! | `POST`   | `/databases/test` | Open an SQLite source and list its tables |
//! | `POST`   | `/databases/upload` | Load an SQLite source into a session |
//! | `GET`    | `/sessions` | Live sessions, oldest first |
//! | `GET`    | `/sessions/{id}` | One session's metadata |
//! | `DELETE` | `/sessions/{id}` | Drop a session |
//! | `POST`   | `/sessions/cleanup` | Remove expired sessions |
//! | `POST`   | `/graph/validate` | Check projection rules |
//! | `POST`   | `/graph/build/{session_id}` | Project a session and write the graph (`?limit=n`) |
//! | `GET`    | `/graph/stats` | Node and relationship counts |
//! | `POST`   | `/graph/query` | Read-only SQL over the graph tables |
//! | `POST`   | `/graph/clear` | Delete the whole graph |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "session not found: 3f2a..." } }
//! ```
//!
//! | Kind | Status |
//! |------|--------|
//! | `not_found` | 404 |
//! | `expired` | 410 |
//! | `invalid_format`, `empty_input` | 400 |
//! | `file_too_large` | 413 |
//! | `connection_error` | 503 |
//! | `persistence_error`, `batch_write_error` | 500 |

use axum::{
    extract::{DefaultBodyLimit, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

use tablegraph_core::{ErrorKind, GraphStats, ProjectionRule, Record, Value};

use crate::config::Config;
use crate::context::{AppContext, BuildReport, BuildRequest, ServiceError, ValidationReport};
use crate::ingest::{self, FormatsInfo, IngestError, UploadedFile};
use crate::session::SessionInfo;
use crate::sql_source::{self, ConnectionReport, DatabaseSource};

type AppState = Arc<AppContext>;

/// Open the context, bind `[server].bind` and serve until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let ctx = Arc::new(AppContext::open(config.clone()).await?);

    let listener = TcpListener::bind(&bind_addr).await?;
    println!("tablegraph server listening on http://{}", bind_addr);

    axum::serve(listener, router(ctx.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    ctx.close().await;
    Ok(())
}

/// Serve on an already bound listener. Used by tests.
pub async fn serve(listener: TcpListener, ctx: Arc<AppContext>) -> anyhow::Result<()> {
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}

pub fn router(ctx: Arc<AppContext>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    // Base64 inflates uploads by a third; leave room for several files.
    let body_limit = usize::try_from(ctx.config.ingest.max_upload_bytes.saturating_mul(2))
        .unwrap_or(usize::MAX);

    Router::new()
        .route("/health", get(handle_health))
        .route("/files/upload", post(handle_upload_files))
        .route("/files/formats", get(handle_formats))
        .route("/databases/test", post(handle_test_database))
        .route("/databases/upload", post(handle_upload_database))
        .route("/sessions", get(handle_list_sessions))
        .route("/sessions/cleanup", post(handle_cleanup_sessions))
        .route(
            "/sessions/{id}",
            get(handle_get_session).delete(handle_delete_session),
        )
        .route("/graph/validate", post(handle_validate))
        .route("/graph/build/{session_id}", post(handle_build))
        .route("/graph/stats", get(handle_graph_stats))
        .route("/graph/query", post(handle_graph_query))
        .route("/graph/clear", post(handle_graph_clear))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .with_state(ctx)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: ErrorKind::NotFound.code().to_string(),
        message: message.into(),
    }
}

fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Expired => StatusCode::GONE,
        ErrorKind::InvalidFormat | ErrorKind::EmptyInput => StatusCode::BAD_REQUEST,
        ErrorKind::Connection => StatusCode::SERVICE_UNAVAILABLE,
        ErrorKind::Persistence | ErrorKind::BatchWrite => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        if let ServiceError::Ingest(IngestError::FileTooLarge { .. }) = &err {
            return AppError {
                status: StatusCode::PAYLOAD_TOO_LARGE,
                code: "file_too_large".to_string(),
                message: err.to_string(),
            };
        }
        let kind = err.kind();
        let status = status_for(kind);
        if status.is_server_error() {
            tracing::error!(error = %err, "request failed");
        }
        AppError {
            status,
            code: kind.code().to_string(),
            message: err.to_string(),
        }
    }
}

fn service<E: Into<ServiceError>>(err: E) -> AppError {
    AppError::from(err.into())
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    graph: String,
}

async fn handle_health(State(ctx): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        graph: ctx.graph.driver().state().to_string(),
    })
}

// ============ Files ============

#[derive(Deserialize)]
struct UploadRequest {
    files: Vec<UploadEntry>,
}

#[derive(Deserialize)]
struct UploadEntry {
    name: String,
    /// Base64-encoded file bytes.
    content: String,
}

#[derive(Serialize)]
struct UploadResponse {
    success: bool,
    files_processed: usize,
    #[serde(flatten)]
    session: SessionInfo,
}

async fn handle_upload_files(
    State(ctx): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<UploadResponse>, AppError> {
    let mut files = Vec::with_capacity(req.files.len());
    for entry in req.files {
        let content = STANDARD
            .decode(entry.content.as_bytes())
            .map_err(|e| bad_request(format!("{}: content is not valid base64: {}", entry.name, e)))?;
        files.push(UploadedFile::new(entry.name, content));
    }

    let session = ctx.ingest_files(&files).await?;
    Ok(Json(UploadResponse {
        success: true,
        files_processed: files.len(),
        session,
    }))
}

async fn handle_formats(State(ctx): State<AppState>) -> Json<FormatsInfo> {
    Json(ingest::supported_formats(&ctx.config.ingest))
}

// ============ Databases ============

async fn handle_test_database(
    Json(source): Json<DatabaseSource>,
) -> Result<Json<ConnectionReport>, AppError> {
    let report = sql_source::test_connection(&source).await.map_err(service)?;
    Ok(Json(report))
}

#[derive(Serialize)]
struct DatabaseUploadResponse {
    success: bool,
    #[serde(flatten)]
    session: SessionInfo,
}

async fn handle_upload_database(
    State(ctx): State<AppState>,
    Json(source): Json<DatabaseSource>,
) -> Result<Json<DatabaseUploadResponse>, AppError> {
    let session = ctx.ingest_database(&source).await?;
    Ok(Json(DatabaseUploadResponse {
        success: true,
        session,
    }))
}

// ============ Sessions ============

#[derive(Serialize)]
struct SessionListResponse {
    total: usize,
    sessions: IndexMap<String, SessionInfo>,
}

async fn handle_list_sessions(
    State(ctx): State<AppState>,
) -> Result<Json<SessionListResponse>, AppError> {
    let sessions = ctx.sessions.list().await.map_err(service)?;
    Ok(Json(SessionListResponse {
        total: sessions.len(),
        sessions,
    }))
}

async fn handle_get_session(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionInfo>, AppError> {
    let session = ctx.sessions.require(&id).await.map_err(service)?;
    Ok(Json(session.summary(ctx.sessions.timeout())))
}

async fn handle_delete_session(
    State(ctx): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    if !ctx.sessions.delete(&id).await {
        return Err(not_found(format!("session not found: {}", id)));
    }
    Ok(Json(serde_json::json!({ "success": true, "session_id": id })))
}

async fn handle_cleanup_sessions(
    State(ctx): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = ctx.sessions.cleanup_expired().await.map_err(service)?;
    Ok(Json(serde_json::json!({ "success": true, "removed": removed })))
}

// ============ Graph ============

/// Either a bare list of rules or a full request object.
#[derive(Deserialize)]
#[serde(untagged)]
enum RulesBody<T> {
    Rules(Vec<ProjectionRule>),
    Request(T),
}

#[derive(Deserialize)]
struct ValidateRequest {
    #[serde(alias = "configs")]
    rules: Vec<ProjectionRule>,
    #[serde(default)]
    session_id: Option<String>,
}

async fn handle_validate(
    State(ctx): State<AppState>,
    Json(body): Json<RulesBody<ValidateRequest>>,
) -> Result<Json<ValidationReport>, AppError> {
    let (rules, session_id) = match body {
        RulesBody::Rules(rules) => (rules, None),
        RulesBody::Request(req) => (req.rules, req.session_id),
    };
    let report = ctx.validate_rules(&rules, session_id.as_deref()).await?;
    Ok(Json(report))
}

#[derive(Deserialize)]
struct BuildParams {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct BuildResponse {
    success: bool,
    #[serde(flatten)]
    report: BuildReport,
}

async fn handle_build(
    State(ctx): State<AppState>,
    Path(session_id): Path<String>,
    Query(params): Query<BuildParams>,
    Json(body): Json<RulesBody<BuildRequest>>,
) -> Result<Json<BuildResponse>, AppError> {
    let mut request = match body {
        RulesBody::Rules(rules) => BuildRequest::new(rules),
        RulesBody::Request(req) => req,
    };
    if params.limit.is_some() {
        request.limit = params.limit;
    }
    let report = ctx.build_graph(&session_id, &request).await?;
    Ok(Json(BuildResponse {
        success: true,
        report,
    }))
}

async fn handle_graph_stats(State(ctx): State<AppState>) -> Result<Json<GraphStats>, AppError> {
    let stats = ctx.graph.stats().await.map_err(service)?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
    #[serde(default)]
    params: Vec<Value>,
}

#[derive(Serialize)]
struct QueryResponse {
    records: Vec<Record>,
}

async fn handle_graph_query(
    State(ctx): State<AppState>,
    Json(req): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    let records = ctx
        .graph
        .run_query(&req.query, &req.params)
        .await
        .map_err(service)?;
    Ok(Json(QueryResponse { records }))
}

async fn handle_graph_clear(
    State(ctx): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    ctx.graph.clear().await.map_err(service)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Expired), StatusCode::GONE);
        assert_eq!(status_for(ErrorKind::EmptyInput), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::Connection), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(status_for(ErrorKind::BatchWrite), StatusCode::INTERNAL_SERVER_ERROR);

        let too_big = AppError::from(ServiceError::Ingest(IngestError::FileTooLarge {
            filename: "a.csv".into(),
            size: 10,
            max: 5,
        }));
        assert_eq!(too_big.status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(too_big.code, "file_too_large");
    }

    #[test]
    fn test_rules_body_accepts_both_shapes() {
        let bare: RulesBody<BuildRequest> = serde_json::from_str(
            r#"[{"source": {"label": "P", "columns": ["a"]},
                 "target": {"label": "C", "columns": ["b"]},
                 "relationship": {"label": "R", "columns": []}}]"#,
        )
        .unwrap();
        assert!(matches!(bare, RulesBody::Rules(ref r) if r.len() == 1));

        let full: RulesBody<BuildRequest> =
            serde_json::from_str(r#"{"rules": [], "dry_run": true}"#).unwrap();
        assert!(matches!(full, RulesBody::Request(ref r) if r.dry_run));
    }
}
