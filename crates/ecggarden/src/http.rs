//! HTTP control surface.
//!
//! A thin layer over [`Supervisor`]'s control operations plus read-only
//! queries against the record store. It never touches worker handles.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use ecgstore::{ContentHash, RecordStore, StorageError};
use serde_json::json;

use crate::error::SupervisorError;
use crate::key::SessionKey;
use crate::supervisor::Supervisor;

/// Artifact records returned per session by `/images/{key}`.
const IMAGE_LIST_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub supervisor: Arc<Supervisor>,
    pub store: RecordStore,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/capture/start/{key}", post(start_capture))
        .route("/capture/stop/{key}", post(stop_capture))
        .route("/capture/status/{key}", get(capture_status))
        .route("/capture/sessions", get(list_sessions))
        .route("/capture/cleanup", post(cleanup))
        .route("/images/{key}", get(list_images))
        .route("/image/{id}", get(get_image))
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": message.to_string() }))).into_response()
}

fn supervisor_error(e: SupervisorError) -> Response {
    let status = match &e {
        SupervisorError::AlreadyRunning(_) => StatusCode::CONFLICT,
        SupervisorError::NotFound(_) => StatusCode::NOT_FOUND,
        SupervisorError::LaunchFailed { .. } | SupervisorError::StopFailed { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    error_response(status, e)
}

fn parse_key(raw: &str) -> Result<SessionKey, Response> {
    raw.parse()
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e))
}

/// Run a store query on the blocking pool.
async fn query<T, F>(store: &RecordStore, op: F) -> Result<T, Response>
where
    F: FnOnce(&RecordStore) -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    let store = store.clone();
    match tokio::task::spawn_blocking(move || op(&store)).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Record store query failed");
            Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e))
        }
        Err(e) => Err(error_response(StatusCode::INTERNAL_SERVER_ERROR, e)),
    }
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "timestamp": Utc::now(),
        "service": "ecggarden",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn start_capture(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let key = match parse_key(&raw) {
        Ok(key) => key,
        Err(response) => return response,
    };

    match state.supervisor.start(&key).await {
        Ok(started) => Json(json!({
            "message": format!("Capture started for session {key}"),
            "session": started.key,
            "status": "running",
            "created_at": started.created_at,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn stop_capture(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let key = match parse_key(&raw) {
        Ok(key) => key,
        Err(response) => return response,
    };

    match state.supervisor.stop(&key).await {
        Ok(stopped) => Json(json!({
            "message": format!("Capture stopped for session {key}"),
            "session": stopped.key,
            "status": "stopped",
            "tier": stopped.tier,
            "sample_count": stopped.sample_count,
            "flush_count": stopped.flush_count,
        }))
        .into_response(),
        Err(e) => supervisor_error(e),
    }
}

async fn capture_status(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let key = match parse_key(&raw) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let is_running = state.supervisor.is_running(&key).await;
    let live = state.supervisor.session(&key);
    let lookup = key.to_string();
    let record = match query(&state.store, move |store| store.session(&lookup)).await {
        Ok(record) => record,
        Err(response) => return response,
    };

    Json(json!({
        "session": key,
        "is_running": is_running,
        "live": live,
        "session_info": record,
        "timestamp": Utc::now(),
    }))
    .into_response()
}

async fn list_sessions(State(state): State<AppState>) -> Response {
    let sessions = state.supervisor.sessions().await;
    Json(json!({
        "count": sessions.len(),
        "sessions": sessions,
    }))
    .into_response()
}

async fn cleanup(State(state): State<AppState>) -> Response {
    let cleaned = state.supervisor.cleanup_all().await;
    Json(json!({
        "message": format!("Cleaned up {cleaned} sessions"),
        "sessions_cleaned": cleaned,
    }))
    .into_response()
}

async fn list_images(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let key = match parse_key(&raw) {
        Ok(key) => key,
        Err(response) => return response,
    };

    let lookup = key.to_string();
    match query(&state.store, move |store| {
        store.latest_artifacts(&lookup, IMAGE_LIST_LIMIT)
    })
    .await
    {
        Ok(images) => Json(json!({
            "session": key,
            "count": images.len(),
            "images": images,
        }))
        .into_response(),
        Err(response) => response,
    }
}

async fn get_image(State(state): State<AppState>, Path(raw): Path<String>) -> Response {
    let id: ContentHash = match raw.parse() {
        Ok(id) => id,
        Err(e) => return error_response(StatusCode::BAD_REQUEST, e),
    };

    match query(&state.store, move |store| store.artifact(&id)).await {
        Ok(Some(stored)) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, stored.mime_type)],
            stored.data,
        )
            .into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("image {raw} not found")),
        Err(response) => response,
    }
}
