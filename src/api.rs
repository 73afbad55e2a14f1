use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::{ConfigField, MonitorConfig};
use crate::engine::StatusResolver;
use crate::errors::{ConfigError, ResolveError};
use crate::models::{MonitorEntry, StatusOutcome};
use crate::monitor::PeriodicMonitor;
use crate::notify::WebhookNotifier;

#[derive(Clone)]
pub struct AppState {
    pub resolver: Arc<StatusResolver>,
    pub monitor: Arc<PeriodicMonitor>,
    pub config: Arc<RwLock<MonitorConfig>>,
    pub config_path: PathBuf,
}

impl AppState {
    /// Pushes a configuration into the resolver and monitor. The scanner is
    /// stopped and only comes back when both enable flags are set.
    async fn apply(&self, config: &MonitorConfig) {
        self.resolver.reconfigure(config).await;
        self.monitor.replace_targets(config.scan_targets()).await;
        match WebhookNotifier::from_config(config) {
            Some(notifier) => self.monitor.bind(Arc::new(notifier)).await,
            None => self.monitor.unbind().await,
        }

        self.monitor.stop(false).await;
        if scanner_enabled(config) {
            self.monitor.start(config.ping_interval_seconds).await;
        }
    }
}

fn scanner_enabled(config: &MonitorConfig) -> bool {
    config.enable && config.scanner_enable
}

#[derive(Debug)]
pub enum ApiError {
    Resolve(ResolveError),
    Config(ConfigError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error, message) = match self {
            ApiError::Resolve(e @ ResolveError::Address(_)) => (StatusCode::BAD_REQUEST, "address", e.to_string()),
            ApiError::Resolve(e @ ResolveError::Connectivity { .. }) => (StatusCode::BAD_GATEWAY, "connectivity", e.to_string()),
            ApiError::Config(e @ ConfigError::Io(_)) => (StatusCode::INTERNAL_SERVER_ERROR, "config", e.to_string()),
            ApiError::Config(e @ ConfigError::UnknownField(_)) => (StatusCode::NOT_FOUND, "config", e.to_string()),
            ApiError::Config(e) => (StatusCode::BAD_REQUEST, "config", e.to_string()),
        };
        (status, Json(ErrorBody { error, message })).into_response()
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        ApiError::Resolve(e)
    }
}

impl From<ConfigError> for ApiError {
    fn from(e: ConfigError) -> Self {
        ApiError::Config(e)
    }
}

#[derive(Deserialize)]
pub struct StatusQuery {
    #[serde(default)]
    address: String,
    group: Option<i64>,
}

pub async fn get_status(State(state): State<AppState>, Query(query): Query<StatusQuery>) -> Result<Json<StatusOutcome>, ApiError> {
    let outcome = state.resolver.resolve_for_group(&query.address, query.group).await?;
    Ok(Json(outcome))
}

#[derive(Serialize)]
pub struct MonitorView {
    running: bool,
    bound: bool,
    entries: Vec<MonitorEntry>,
}

pub async fn get_monitor(State(state): State<AppState>) -> Json<MonitorView> {
    Json(MonitorView {
        running: state.monitor.is_running().await,
        bound: state.monitor.is_bound().await,
        entries: state.monitor.snapshot().await,
    })
}

#[derive(Serialize)]
pub struct Toggle {
    ok: bool,
}

pub async fn start_monitor(State(state): State<AppState>) -> Json<Toggle> {
    let (enabled, interval) = {
        let config = state.config.read().await;
        (scanner_enabled(&config), config.ping_interval_seconds)
    };
    if !enabled {
        warn!("Refusing to start the monitor: enable and scanner_enable must both be true");
        return Json(Toggle { ok: false });
    }
    Json(Toggle {
        ok: state.monitor.start(interval).await,
    })
}

#[derive(Deserialize)]
pub struct StopQuery {
    #[serde(default)]
    release: bool,
}

pub async fn stop_monitor(State(state): State<AppState>, Query(query): Query<StopQuery>) -> Json<Toggle> {
    Json(Toggle {
        ok: state.monitor.stop(query.release).await,
    })
}

pub async fn reload(State(state): State<AppState>) -> Result<Json<MonitorView>, ApiError> {
    let fresh = MonitorConfig::load(&state.config_path)?;
    info!("Reloaded configuration from {}", state.config_path.display());
    state.apply(&fresh).await;
    *state.config.write().await = fresh;
    Ok(get_monitor(State(state)).await)
}

#[derive(Deserialize)]
pub struct FieldQuery {
    group: Option<i64>,
    value: Option<String>,
}

#[derive(Serialize)]
pub struct FieldValue {
    field: &'static str,
    group: Option<i64>,
    value: String,
}

pub async fn get_field(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FieldQuery>,
) -> Result<Json<FieldValue>, ApiError> {
    let field: ConfigField = name.parse()?;
    let value = state.config.read().await.get(field, query.group)?;
    Ok(Json(FieldValue {
        field: field.name(),
        group: query.group,
        value,
    }))
}

/// Changes one setting in memory and applies it. Not written back to disk.
pub async fn set_field(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<FieldQuery>,
) -> Result<Json<FieldValue>, ApiError> {
    let field: ConfigField = name.parse()?;
    let value = query.value.unwrap_or_default();
    let updated = {
        let mut config = state.config.write().await;
        config.set(field, &value, query.group)?;
        config.clone()
    };
    info!("Config {} set to {:?}", field, value);
    state.apply(&updated).await;
    Ok(Json(FieldValue {
        field: field.name(),
        group: query.group,
        value: updated.get(field, query.group)?,
    }))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/status", get(get_status))
        .route("/api/monitor", get(get_monitor))
        .route("/api/monitor/start", post(start_monitor))
        .route("/api/monitor/stop", post(stop_monitor))
        .route("/api/monitor/reload", post(reload))
        .route("/api/config/{field}", get(get_field).post(set_field))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn start_server(port: u16, state: AppState) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Control API: http://localhost:{}", addr.port());
    axum::serve(listener, app).await?;
    Ok(())
}
