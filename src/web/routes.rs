//! HTTP route handlers.
//!
//! Read-only status endpoints plus the client package download route. The
//! fleet itself is driven by the relay, not by this surface.

use std::sync::Arc;

use axum::{
    extract::{Extension, Json},
    http::{header, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use tracing::{info, warn};

use crate::AppState;

/// JSON error response helper
fn err_response(status: StatusCode, msg: &str) -> impl IntoResponse {
    (status, Json(serde_json::json!({ "error": msg })))
}

/// Build the API router with all endpoints.
pub fn api_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/sessions", get(get_sessions))
        .route("/download", get(download))
        .route("/logs/dir", get(get_log_dir))
        .layer(Extension(state))
}

async fn get_status(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let sessions = state.pool.session_info().await;
    let alive = sessions.iter().filter(|s| s.alive).count();

    Json(serde_json::json!({
        "relayState": state.channel_status.state(),
        "lastHeartbeatSentAt": state.channel_status.last_heartbeat_sent_at(),
        "sessionsAlive": alive,
        "sessionsTotal": sessions.len(),
        "activeWorkers": state.supervisor.active_count(),
    }))
}

async fn get_sessions(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    Json(state.pool.session_info().await)
}

async fn download(Extension(state): Extension<Arc<AppState>>) -> impl IntoResponse {
    let path = {
        let config = state.config.read().await;
        config.download_file.clone()
    };

    let Some(path) = path else {
        return err_response(StatusCode::NOT_FOUND, "No download file configured").into_response();
    };

    match tokio::fs::read(&path).await {
        Ok(bytes) => {
            info!("Serving download: {}", path);
            let filename = std::path::Path::new(&path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "download".to_string());

            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/octet-stream".to_string()),
                    (
                        header::CONTENT_DISPOSITION,
                        format!("attachment; filename=\"{}\"", filename),
                    ),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => {
            warn!("Download file unreadable: {}: {}", path, e);
            err_response(StatusCode::INTERNAL_SERVER_ERROR, "File could not be downloaded")
                .into_response()
        }
    }
}

async fn get_log_dir() -> impl IntoResponse {
    match crate::log_dir() {
        Some(p) => Json(serde_json::json!({ "path": p.to_string_lossy() })).into_response(),
        None => err_response(StatusCode::INTERNAL_SERVER_ERROR, "Could not determine log directory")
            .into_response(),
    }
}
