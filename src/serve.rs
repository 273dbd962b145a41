//! Purpose: Provide the HTTP/JSON server that exposes tables over REST-ish routes.
//! Exports: `ServeConfig`, `serve`, `validate_config`, `init_tracing`.
//! Role: Axum-based transport; maps routes onto `Database`/`Table` operations.
//! Invariants: State is one explicit `Database` handle; there is no global registry.
//! Invariants: Error envelopes are `{"error":{"kind","message",...}}` with stable status codes.
//! Invariants: Loopback-only unless explicitly allowed.
use std::collections::BTreeMap;
use std::future::IntoFuture;
use std::io::IsTerminal;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use axum::extract::{DefaultBodyLimit, MatchedPath, Path as AxumPath, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::LatencyUnit;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, warn};
use tracing_subscriber::EnvFilter;

use sproutdb::api::{
    Database, Error, ErrorKind, QueryOptions, Record, Table, ValidationIssue, WhereClause,
    record_from_json,
};

pub const DEFAULT_MAX_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub bind: SocketAddr,
    pub allow_non_loopback: bool,
    pub max_body_bytes: u64,
}

struct AppState {
    db: Arc<Database>,
    metrics: Metrics,
    started: Instant,
}

#[derive(Default)]
struct Metrics {
    total: AtomicU64,
    errors: AtomicU64,
    total_response_micros: AtomicU64,
    by_method: Mutex<BTreeMap<String, u64>>,
    by_route: Mutex<BTreeMap<String, u64>>,
}

impl Metrics {
    fn record(&self, method: &str, route: &str, status: StatusCode, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if status.is_client_error() || status.is_server_error() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.total_response_micros.fetch_add(micros, Ordering::Relaxed);
        bump(&self.by_method, method);
        bump(&self.by_route, route);
    }

    fn snapshot(&self) -> Value {
        let total = self.total.load(Ordering::Relaxed);
        let micros = self.total_response_micros.load(Ordering::Relaxed);
        let avg_ms = if total == 0 {
            0.0
        } else {
            micros as f64 / total as f64 / 1000.0
        };
        json!({
            "requests": {
                "total": total,
                "by_method": counts(&self.by_method),
                "by_route": counts(&self.by_route),
                "errors": self.errors.load(Ordering::Relaxed),
            },
            "performance": {
                "avg_response_ms": avg_ms,
                "total_response_ms": micros as f64 / 1000.0,
            },
        })
    }
}

fn bump(map: &Mutex<BTreeMap<String, u64>>, key: &str) {
    let mut map = map.lock().unwrap_or_else(|poison| poison.into_inner());
    *map.entry(key.to_string()).or_default() += 1;
}

fn counts(map: &Mutex<BTreeMap<String, u64>>) -> Value {
    let map = map.lock().unwrap_or_else(|poison| poison.into_inner());
    map.iter()
        .map(|(key, count)| (key.clone(), json!(count)))
        .collect::<Map<String, Value>>()
        .into()
}

pub async fn serve(config: ServeConfig, db: Database) -> Result<(), Error> {
    validate_config(&config)?;

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let state = Arc::new(AppState {
        db: Arc::new(db),
        metrics: Metrics::default(),
        started: Instant::now(),
    });
    let app = router(state.clone(), max_body_bytes);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("failed to bind server")
                .with_source(err)
        })?;
    let local_addr = listener.local_addr().map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message("failed to read bound address")
            .with_source(err)
    })?;
    info!(
        addr = %local_addr,
        tables = state.db.len(),
        records = state.db.total_records(),
        "sproutdb listening"
    );
    eprintln!("sproutdb listening on http://{local_addr}");

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            info!("shutdown requested");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

fn router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/tables", get(list_tables).post(create_table))
        .route("/tables/:table/insert", post(insert_record))
        .route("/tables/:table/find", post(find_records))
        .route("/tables/:table/all", get(all_records))
        .route("/tables/:table/delete", delete(delete_records))
        .route("/tables/:table/update", put(update_records))
        .route("/tables/:table/load", post(load_records))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            track_requests,
        ))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(
                    DefaultOnResponse::new()
                        .level(Level::INFO)
                        .latency_unit(LatencyUnit::Millis),
                ),
        )
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn is_loopback(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(addr) => addr.is_loopback(),
        IpAddr::V6(addr) => addr.is_loopback(),
    }
}

pub fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if !is_loopback(config.bind.ip()) && !config.allow_non_loopback {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("non-loopback bind requires explicit opt-in")
            .with_hint("Re-run with --allow-non-loopback or use a loopback address."));
    }

    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    Ok(())
}

/// Installs the stderr subscriber; `RUST_LOG` overrides `default_directive`.
pub(crate) fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_ansi(std::io::stderr().is_terminal())
        .with_writer(std::io::stderr)
        .try_init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

async fn track_requests(State(state): State<Arc<AppState>>, request: Request, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let response = next.run(request).await;
    state
        .metrics
        .record(&method, &route, response.status(), started.elapsed());
    response
}

#[derive(Debug, Default, Deserialize)]
struct CreateTableRequest {
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeleteRequest {
    #[serde(rename = "where")]
    where_clause: Option<WhereClause>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateRequest {
    #[serde(rename = "where")]
    where_clause: Option<WhereClause>,
    update: Record,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct LoadRequest {
    records: Vec<Record>,
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    issues: Vec<ValidationIssue>,
}

async fn health(State(state): State<Arc<AppState>>) -> Response {
    json_response(
        StatusCode::OK,
        json!({
            "status": "healthy",
            "timestamp": now_rfc3339(),
            "uptime_ms": uptime_ms(&state),
            "version": env!("CARGO_PKG_VERSION"),
            "database": {
                "tables": state.db.len(),
                "total_records": state.db.total_records(),
            },
        }),
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    let mut payload = state.metrics.snapshot();
    let record_counts = state
        .db
        .tables()
        .into_iter()
        .map(|(name, table)| (name, json!(table.len())))
        .collect::<Map<String, Value>>();
    if let Value::Object(map) = &mut payload {
        map.insert("uptime_ms".to_string(), json!(uptime_ms(&state)));
        map.insert(
            "database".to_string(),
            json!({
                "tables": state.db.table_names(),
                "table_count": state.db.len(),
                "record_counts": record_counts,
            }),
        );
    }
    json_response(StatusCode::OK, payload)
}

async fn list_tables(State(state): State<Arc<AppState>>) -> Response {
    json_response(StatusCode::OK, json!(state.db.table_names()))
}

async fn create_table(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let request: CreateTableRequest = match parse_optional_body(&body) {
        Ok(request) => request,
        Err(err) => return error_response(err),
    };
    let Some(name) = request.name.filter(|name| !name.trim().is_empty()) else {
        return error_response(
            Error::new(ErrorKind::Usage).with_message("table name is required"),
        );
    };
    match state.db.create_table(&name) {
        Ok(_) => json_response(
            StatusCode::CREATED,
            json!({ "success": true, "message": format!("Table '{name}' created") }),
        ),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => error_response(
            Error::new(ErrorKind::AlreadyExists).with_message("table already exists"),
        ),
        Err(err) => error_response(err),
    }
}

async fn insert_record(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = lookup(&state, &table).and_then(|table| {
        let record = record_from_json(parse_body::<Value>(&body)?)?;
        table.insert(record)
    });
    match result {
        Ok(()) => success(json!({})),
        Err(err) => error_response(err),
    }
}

async fn find_records(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = lookup(&state, &table).and_then(|table| {
        let options: QueryOptions = parse_optional_body(&body)?;
        Ok(table.find(&options))
    });
    match result {
        Ok(records) => json_response(StatusCode::OK, json!(records)),
        Err(err) => error_response(err),
    }
}

async fn all_records(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
) -> Response {
    match lookup(&state, &table) {
        Ok(table) => json_response(StatusCode::OK, json!(*table.snapshot())),
        Err(err) => error_response(err),
    }
}

async fn delete_records(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = lookup(&state, &table).and_then(|table| {
        let request: DeleteRequest = parse_optional_body(&body)?;
        Ok(table.delete(request.where_clause.as_ref()))
    });
    match result {
        Ok(deleted) => success(json!({ "deleted": deleted })),
        Err(err) => error_response(err),
    }
}

async fn update_records(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = lookup(&state, &table).and_then(|table| {
        let request: UpdateRequest = parse_body(&body)?;
        table.update(request.where_clause.as_ref(), &request.update)
    });
    match result {
        Ok(updated) => success(json!({ "updated": updated })),
        Err(err) => error_response(err),
    }
}

async fn load_records(
    State(state): State<Arc<AppState>>,
    AxumPath(table): AxumPath<String>,
    body: Bytes,
) -> Response {
    let result = lookup(&state, &table).and_then(|table| {
        let request: LoadRequest = parse_body(&body)?;
        let count = request.records.len();
        table.load(request.records)?;
        Ok(count)
    });
    match result {
        Ok(loaded) => success(json!({ "loaded": loaded })),
        Err(err) => error_response(err),
    }
}

fn lookup(state: &AppState, table: &str) -> Result<Arc<Table>, Error> {
    state
        .db
        .table(table)
        .map_err(|_| Error::new(ErrorKind::NotFound).with_message("table not found"))
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, Error> {
    serde_json::from_slice(body).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message(format!("invalid request body: {err}"))
            .with_source(err)
    })
}

/// Like `parse_body`, but an empty body yields `T::default()`.
fn parse_optional_body<T: DeserializeOwned + Default>(body: &Bytes) -> Result<T, Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    parse_body(body)
}

fn now_rfc3339() -> Option<String> {
    use time::format_description::well_known::Rfc3339;
    time::OffsetDateTime::now_utc().format(&Rfc3339).ok()
}

fn uptime_ms(state: &AppState) -> u64 {
    u64::try_from(state.started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn success(extra: Value) -> Response {
    let mut body = Map::new();
    body.insert("success".to_string(), Value::Bool(true));
    if let Value::Object(extra) = extra {
        body.extend(extra);
    }
    json_response(StatusCode::OK, Value::Object(body))
}

fn json_response(status: StatusCode, payload: Value) -> Response {
    (status, Json(payload)).into_response()
}

fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::AlreadyExists => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::UNPROCESSABLE_ENTITY,
        ErrorKind::Io | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        warn!(error = %err, "request failed");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
            issues: err.issues().to_vec(),
        },
    };
    (status, Json(body)).into_response()
}
