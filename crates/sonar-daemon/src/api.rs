//! REST API handlers

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use sonar_control::{ActionKind, Command};
use sonar_core::{keys, ParamList, ParamValue, Schema, StoreError, TrackType};
use sonar_proxy::ProxyMode;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::state::AppState;

/// API error response
#[derive(Serialize)]
struct ApiError {
    error: String,
}

impl ApiError {
    fn new(msg: impl Into<String>) -> Self {
        Self { error: msg.into() }
    }
}

/// Schema of the re-exported device
pub async fn get_schema(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(Schema::clone(&state.proxy.schema()))
}

#[derive(Deserialize)]
pub struct ParamsQuery {
    /// Only keys starting with this path
    prefix: Option<String>,
}

/// Current parameter values
pub async fn get_params(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ParamsQuery>,
) -> impl IntoResponse {
    let prefix = query.prefix.unwrap_or_default();
    let values: BTreeMap<String, ParamValue> = state
        .proxy
        .store()
        .snapshot()
        .into_iter()
        .filter(|(key, _)| key.starts_with(&prefix))
        .collect();
    Json(values)
}

#[derive(Serialize)]
struct SetResponse {
    applied: usize,
}

/// Atomic multi-key write on the re-exported device
pub async fn set_params(
    State(state): State<Arc<AppState>>,
    Json(body): Json<BTreeMap<String, ParamValue>>,
) -> impl IntoResponse {
    let params: ParamList = body.into_iter().collect();
    let applied = params.len();
    debug!(keys = applied, "Parameter set requested");

    let store = state.proxy.downstream();
    let result = tokio::task::spawn_blocking(move || store.set(&params)).await;

    match result {
        Ok(Ok(())) => Json(SetResponse { applied }).into_response(),
        Ok(Err(e)) => {
            let status = match e {
                StoreError::Rejected => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            };
            (status, Json(ApiError::new(e.to_string()))).into_response()
        }
        Err(e) => {
            warn!(error = %e, "Set task failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiError::new("Set task failed")),
            )
                .into_response()
        }
    }
}

/// Client liveness ping
pub async fn post_alive(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let params = ParamList::new().with(keys::ALIVE, true);
    match state.proxy.downstream().set(&params) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => (StatusCode::CONFLICT, Json(ApiError::new(e.to_string()))).into_response(),
    }
}

#[derive(Serialize)]
struct AcceptedResponse {
    action: ActionKind,
}

/// Start request body
#[derive(Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    project: String,
    track: String,
    #[serde(default = "default_track_type")]
    track_type: TrackType,
}

fn default_track_type() -> TrackType {
    TrackType::Survey
}

pub async fn sonar_start(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRequest>,
) -> impl IntoResponse {
    submit(
        &state,
        Command::SonarStart {
            project: req.project,
            track: req.track,
            track_type: req.track_type,
        },
    )
}

pub async fn sonar_stop(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, Command::SonarStop)
}

pub async fn sonar_ping(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    submit(&state, Command::SonarPing)
}

/// Run any typed command on the re-exported device
pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Json(command): Json<Command>,
) -> impl IntoResponse {
    submit(&state, command)
}

/// Hand a command to the executor; completion arrives over `/ws`
fn submit(state: &AppState, command: Command) -> axum::response::Response {
    let action = command.kind();
    if state.executor.request(command) {
        info!(action = ?action, "Command accepted");
        (StatusCode::ACCEPTED, Json(AcceptedResponse { action })).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(ApiError::new("Another command is in progress")),
        )
            .into_response()
    }
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    model: Option<String>,
    serial: Option<String>,
    mode: ProxyMode,
    sources: Vec<String>,
    running: bool,
    track: Option<String>,
    pings: u64,
    busy: bool,
    operations: usize,
}

/// Daemon and device status
pub async fn get_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let store = state.proxy.store();
    let text = |key: &str| {
        store
            .value(key)
            .and_then(|v| v.as_str().map(str::to_string))
    };
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        model: text(keys::INFO_MODEL),
        serial: text(keys::INFO_SERIAL),
        mode: state.proxy.config().mode,
        sources: state.client.sources(),
        running: state.device.is_running(),
        track: state.device.track(),
        pings: state.device.pings(),
        busy: state.executor.is_busy(),
        operations: state.proxy.router().operations().len(),
    })
}
