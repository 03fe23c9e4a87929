//! `cw_web` - Management API for Cableward
//!
//! This crate provides:
//! - The axum JSON API over the store and engine
//! - Error translation from the storage taxonomy to HTTP statuses
//! - 202-style asynchronous triggers for discovery and rule evaluation
//! - Static dashboard serving
//!
//! The engine reports trigger outcomes only through activity events; the
//! handlers here never block a request on SNMP work.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::{Path as UrlPath, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use cw_config::WebConfig;
use cw_engine::{Engine, EngineError, Matcher};
use cw_store::{
    ActivityEvent, Cmts, EventType, JobStatus, Rule, Store, StoreError,
};

/// Web server errors
#[derive(Error, Debug)]
pub enum WebError {
    #[error("Server error: {0}")]
    Server(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            WebError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            WebError::Store(err) => (store_status(err), err.to_string()),
            WebError::Engine(EngineError::Store(err)) => (store_status(err), err.to_string()),
            WebError::Engine(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            WebError::Server(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

fn store_status(err: &StoreError) -> StatusCode {
    match err {
        StoreError::Validation { .. } => StatusCode::BAD_REQUEST,
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::Conflict(_) => StatusCode::CONFLICT,
        StoreError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Shared application state
pub struct AppState {
    pub store: Store,
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}

impl AppState {
    #[must_use]
    pub fn new(store: Store, engine: Arc<Engine>) -> Self {
        Self {
            store,
            engine,
            start_time: Instant::now(),
        }
    }
}

pub struct WebServer {
    state: Arc<AppState>,
    config: WebConfig,
    cancel: CancellationToken,
}

impl WebServer {
    #[must_use]
    pub fn new(store: Store, engine: Arc<Engine>, config: WebConfig, cancel: CancellationToken) -> Self {
        Self {
            state: Arc::new(AppState::new(store, engine)),
            config,
            cancel,
        }
    }

    #[must_use]
    pub fn router(&self) -> Router {
        let mut router = create_router(Arc::clone(&self.state))
            .layer(TimeoutLayer::new(self.config.request_timeout()));
        if let Some(cors) = build_cors_layer(&self.config) {
            router = router.layer(cors);
        }
        if let Some(dir) = resolve_static_dir(&self.config) {
            router = router
                .fallback_service(ServeDir::new(dir).append_index_html_on_directories(true));
        }
        router
    }

    /// Bind and serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns [`WebError::Server`] when binding or serving fails.
    pub async fn run(&self) -> Result<(), WebError> {
        let addr = format!("{}:{}", self.config.bind_address, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|err| WebError::Server(err.to_string()))?;
        info!(%addr, "Starting management API");

        let cancel = self.cancel.clone();
        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .map_err(|err| WebError::Server(err.to_string()))?;
        Ok(())
    }
}

fn build_cors_layer(config: &WebConfig) -> Option<CorsLayer> {
    if !config.cors_enabled {
        return None;
    }

    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins.iter().any(|origin| origin.trim() == "*") {
        return Some(layer.allow_origin(Any));
    }

    let mut origins = Vec::new();
    for origin in &config.cors_origins {
        match origin.parse() {
            Ok(value) => origins.push(value),
            Err(_) => warn!(origin = %origin, "Invalid CORS origin; skipping"),
        }
    }

    if origins.is_empty() {
        Some(layer.allow_origin(Any))
    } else {
        Some(layer.allow_origin(AllowOrigin::list(origins)))
    }
}

fn resolve_static_dir(config: &WebConfig) -> Option<String> {
    let dir = config.static_dir.as_ref()?;
    if Path::new(dir).is_dir() {
        return Some(dir.to_string_lossy().to_string());
    }
    warn!(dir = %dir.display(), "Static dashboard directory does not exist; skipping");
    None
}

/// Create the router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health and aggregates
        .route("/api/health", get(health_handler))
        .route("/api/metrics", get(metrics_handler))
        .route("/api/dashboard", get(dashboard_handler))
        // CMTS
        .route("/api/cmts", get(list_cmts_handler).post(create_cmts_handler))
        .route(
            "/api/cmts/{id}",
            get(get_cmts_handler)
                .put(update_cmts_handler)
                .delete(delete_cmts_handler),
        )
        // Modems
        .route("/api/modems", get(list_modems_handler))
        // Rules
        .route("/api/rules", get(list_rules_handler).post(create_rule_handler))
        .route(
            "/api/rules/{id}",
            get(get_rule_handler)
                .put(update_rule_handler)
                .delete(delete_rule_handler),
        )
        // Jobs
        .route("/api/jobs", get(list_jobs_handler))
        .route("/api/jobs/{id}/retry", post(retry_job_handler))
        // Engine triggers
        .route("/api/discover", post(discover_all_handler))
        .route("/api/discover/{id}", post(discover_one_handler))
        .route("/api/evaluate", post(evaluate_handler))
        // Settings
        .route("/api/settings", get(list_settings_handler))
        .route(
            "/api/settings/{key}",
            get(get_setting_handler).put(set_setting_handler),
        )
        // Activity
        .route("/api/activity", get(activity_handler))
        // Middleware
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Health, metrics, dashboard
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub db: String,
    pub total_cmts: i64,
    pub uptime_secs: u64,
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    let uptime_secs = state.start_time.elapsed().as_secs();

    if !state.store.is_healthy() {
        let body = HealthResponse {
            status: "unhealthy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            db: "disconnected".to_string(),
            total_cmts: 0,
            uptime_secs,
        };
        return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
    }

    let body = HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        db: "connected".to_string(),
        total_cmts: state.store.count_cmts().unwrap_or(0),
        uptime_secs,
    };
    Json(body).into_response()
}

async fn metrics_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, WebError> {
    let jobs_by_status: serde_json::Map<String, serde_json::Value> = state
        .store
        .count_jobs_by_status()?
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count.into()))
        .collect();

    Ok(Json(serde_json::json!({
        "cmts": state.store.count_cmts()?,
        "modems": state.store.count_modems()?,
        "rules": state.store.count_rules()?,
        "jobs": state.store.count_jobs()?,
        "jobs_by_status": jobs_by_status,
        "queued_jobs": state.engine.queued_jobs(),
    })))
}

async fn dashboard_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, WebError> {
    let recent = state.store.list_activity(10, 0)?;
    Ok(Json(serde_json::json!({
        "summary": {
            "cmts": state.store.count_cmts()?,
            "modems": state.store.count_modems()?,
            "rules": state.store.count_rules()?,
            "jobs": state.store.count_jobs()?,
        },
        "recent_activity": recent,
    })))
}

// =============================================================================
// CMTS
// =============================================================================

#[derive(Debug, Serialize)]
struct IdResponse {
    id: i64,
}

async fn list_cmts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Cmts>>, WebError> {
    Ok(Json(state.store.list_cmts()?))
}

async fn get_cmts_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<Json<Cmts>, WebError> {
    Ok(Json(state.store.get_cmts(id)?))
}

async fn create_cmts_handler(
    State(state): State<Arc<AppState>>,
    Json(cmts): Json<Cmts>,
) -> Result<(StatusCode, Json<IdResponse>), WebError> {
    let id = state.store.create_cmts(&cmts)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::CmtsAdded,
        "cmts",
        id,
        format!("Added CMTS {}", cmts.name),
    ));
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn update_cmts_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
    Json(mut cmts): Json<Cmts>,
) -> Result<Json<Cmts>, WebError> {
    cmts.id = id;
    state.store.update_cmts(&cmts)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::CmtsUpdated,
        "cmts",
        id,
        format!("Updated CMTS {}", cmts.name),
    ));
    Ok(Json(state.store.get_cmts(id)?))
}

async fn delete_cmts_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<StatusCode, WebError> {
    let cmts = state.store.get_cmts(id)?;
    state.store.delete_cmts(id)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::CmtsDeleted,
        "cmts",
        id,
        format!("Deleted CMTS {}", cmts.name),
    ));
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Modems
// =============================================================================

#[derive(Debug, Deserialize)]
struct ModemQuery {
    cmts_id: Option<i64>,
}

async fn list_modems_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ModemQuery>,
) -> Result<Json<Vec<cw_store::Modem>>, WebError> {
    Ok(Json(state.store.list_modems(query.cmts_id)?))
}

// =============================================================================
// Rules
// =============================================================================

async fn list_rules_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Rule>>, WebError> {
    Ok(Json(state.store.list_rules()?))
}

async fn get_rule_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<Json<Rule>, WebError> {
    Ok(Json(state.store.get_rule(id)?))
}

async fn create_rule_handler(
    State(state): State<Arc<AppState>>,
    Json(rule): Json<Rule>,
) -> Result<(StatusCode, Json<IdResponse>), WebError> {
    // Criteria compile dry-run before anything touches the store.
    Matcher::new().validate_criteria(rule.match_type, &rule.match_criteria)?;

    let id = state.store.create_rule(&rule)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::RuleCreated,
        "rule",
        id,
        format!("Created rule {}", rule.name),
    ));
    Ok((StatusCode::CREATED, Json(IdResponse { id })))
}

async fn update_rule_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
    Json(mut rule): Json<Rule>,
) -> Result<Json<Rule>, WebError> {
    Matcher::new().validate_criteria(rule.match_type, &rule.match_criteria)?;

    rule.id = id;
    state.store.update_rule(&rule)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::RuleUpdated,
        "rule",
        id,
        format!("Updated rule {}", rule.name),
    ));
    Ok(Json(state.store.get_rule(id)?))
}

async fn delete_rule_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<StatusCode, WebError> {
    let rule = state.store.get_rule(id)?;
    state.store.delete_rule(id)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::RuleDeleted,
        "rule",
        id,
        format!("Deleted rule {}", rule.name),
    ));
    Ok(StatusCode::NO_CONTENT)
}

// =============================================================================
// Jobs
// =============================================================================

#[derive(Debug, Deserialize)]
struct JobQuery {
    status: Option<String>,
    limit: Option<usize>,
}

async fn list_jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobQuery>,
) -> Result<Json<Vec<cw_store::Job>>, WebError> {
    let status = match query.status.as_deref() {
        Some(raw) => Some(
            raw.parse::<JobStatus>()
                .map_err(WebError::BadRequest)?,
        ),
        None => None,
    };
    Ok(Json(state.store.list_jobs(status, query.limit)?))
}

async fn retry_job_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<Json<serde_json::Value>, WebError> {
    state.store.reset_job_for_retry(id)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::SystemEvent,
        "job",
        id,
        format!("Job {id} manually reset for retry"),
    ));
    Ok(Json(serde_json::json!({ "status": "ok" })))
}

// =============================================================================
// Engine triggers (202: outcomes arrive through activity events)
// =============================================================================

async fn discover_all_handler(
    State(state): State<Arc<AppState>>,
) -> Result<(StatusCode, Json<serde_json::Value>), WebError> {
    let launched = state.engine.discover_all()?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "launched": launched })),
    ))
}

async fn discover_one_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(id): UrlPath<i64>,
) -> Result<(StatusCode, Json<serde_json::Value>), WebError> {
    // Fail fast on unknown ids; the discovery itself runs detached.
    state.store.get_cmts(id)?;

    let engine = Arc::clone(&state.engine);
    tokio::spawn(async move {
        if let Err(err) = engine.discover(id).await {
            warn!(cmts_id = id, error = %err, "Triggered discovery failed");
        }
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "launched": 1 })),
    ))
}

async fn evaluate_handler(
    State(state): State<Arc<AppState>>,
) -> (StatusCode, Json<serde_json::Value>) {
    let engine = Arc::clone(&state.engine);
    tokio::task::spawn_blocking(move || {
        if let Err(err) = engine.evaluate_rules() {
            warn!(error = %err, "Triggered rule evaluation failed");
        }
    });

    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "status": "accepted" })),
    )
}

// =============================================================================
// Settings & activity
// =============================================================================

async fn list_settings_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, WebError> {
    let settings = state.store.list_settings()?;
    Ok(Json(serde_json::to_value(settings).unwrap_or_default()))
}

async fn get_setting_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(key): UrlPath<String>,
) -> Result<Json<serde_json::Value>, WebError> {
    let value = state.store.get_setting(&key)?;
    Ok(Json(serde_json::json!({ "key": key, "value": value })))
}

#[derive(Debug, Deserialize)]
struct SettingBody {
    value: String,
}

async fn set_setting_handler(
    State(state): State<Arc<AppState>>,
    UrlPath(key): UrlPath<String>,
    Json(body): Json<SettingBody>,
) -> Result<Json<serde_json::Value>, WebError> {
    state.store.set_setting(&key, &body.value)?;
    state.store.log_activity_best_effort(&ActivityEvent::new(
        EventType::SystemEvent,
        "setting",
        0,
        format!("Setting {key} changed to {}", body.value),
    ));
    Ok(Json(serde_json::json!({ "key": key, "value": body.value })))
}

#[derive(Debug, Deserialize)]
struct PaginationParams {
    #[serde(default = "default_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

fn default_limit() -> usize {
    50
}

async fn activity_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<Vec<ActivityEvent>>, WebError> {
    Ok(Json(state.store.list_activity(params.limit, params.offset)?))
}
