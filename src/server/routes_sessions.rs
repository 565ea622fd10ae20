//! Session management endpoints.
//!
//! Creation returns immediately with the id and the path a playback device
//! should fetch; the producer is already running by the time the response
//! is sent. The readiness endpoint wraps the engine's prewarm wait so an
//! orchestrator can hold off pointing a picky player at the stream until
//! enough bytes exist.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{AppContext, AppError};

/// Create the session management router.
pub fn session_routes() -> Router<AppContext> {
    Router::new()
        .route("/sessions/merge", post(create_merge))
        .route("/sessions/remux", post(create_remux))
        .route("/sessions/:id", get(get_session))
        .route("/sessions/:id/ready", get(session_ready))
}

#[derive(Debug, Deserialize)]
pub struct CreateMergeRequest {
    /// URL of the video-only elementary stream.
    pub video_url: String,
    /// URL of the audio-only elementary stream.
    pub audio_url: String,
    /// Vertical resolution of the chosen variant, for status reporting.
    #[serde(default)]
    pub height_hint: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRemuxRequest {
    /// URL of the media playlist to repackage.
    pub playlist_url: String,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub id: String,
    /// Path a playback device fetches to receive the stream.
    pub stream_path: String,
}

impl CreateSessionResponse {
    fn for_id(id: String) -> Self {
        Self {
            stream_path: format!("/stream/{id}"),
            id,
        }
    }
}

/// POST /api/sessions/merge -- start a video+audio merge session.
async fn create_merge(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateMergeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = ctx
        .registry
        .create_merge_session(req.video_url, req.audio_url, req.height_hint)?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse::for_id(id))))
}

/// POST /api/sessions/remux -- start a playlist remux session.
async fn create_remux(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateRemuxRequest>,
) -> Result<impl IntoResponse, AppError> {
    let id = ctx.registry.create_remux_session(req.playlist_url)?;
    Ok((StatusCode::CREATED, Json(CreateSessionResponse::for_id(id))))
}

/// GET /api/sessions/:id -- point-in-time session status.
async fn get_session(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let snapshot = ctx.registry.get_session(&id)?;
    Ok(Json(snapshot))
}

#[derive(Debug, Deserialize)]
pub struct ReadyQuery {
    /// Seconds to wait before reporting not-ready; defaults from config.
    pub timeout_secs: Option<u64>,
    /// Byte threshold; defaults from config.
    pub min_bytes: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct ReadyResponse {
    pub ready: bool,
}

/// GET /api/sessions/:id/ready -- block until the stream has buffered
/// enough to hand to a player, or the timeout lapses.
async fn session_ready(
    State(ctx): State<AppContext>,
    Path(id): Path<String>,
    Query(query): Query<ReadyQuery>,
) -> Result<impl IntoResponse, AppError> {
    let stream = &ctx.config.stream;
    let timeout = Duration::from_secs(query.timeout_secs.unwrap_or(stream.prewarm_timeout_secs));
    let min_bytes = query.min_bytes.unwrap_or(stream.prewarm_min_bytes);

    let ready = ctx.registry.await_ready(&id, timeout, min_bytes).await?;
    Ok(Json(ReadyResponse { ready }))
}
