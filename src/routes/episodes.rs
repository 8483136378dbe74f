use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::middleware::RequestId;
use crate::models::WatchRecord;
use crate::services::feed::EpisodeDetailView;
use crate::services::EngagementDelta;

use super::{ok, ApiResponse, AppState};

fn require_user(user_id: &Option<String>) -> AppResult<&str> {
    match user_id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => Ok(id),
        _ => Err(AppError::Validation("userId is required".into())),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetailQuery {
    user_id: Option<String>,
    quality: Option<String>,
}

/// Episode details with the chosen stream URL
pub async fn detail(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Query(params): Query<DetailQuery>,
) -> AppResult<Json<ApiResponse<EpisodeDetailView>>> {
    let view = state
        .feed
        .episode_detail(
            &episode_id,
            params.user_id.as_deref(),
            params.quality.as_deref(),
        )
        .await?;
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartBody {
    user_id: Option<String>,
    watched_via: Option<String>,
}

/// Begins or resumes playback
pub async fn start(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Path(episode_id): Path<String>,
    Json(body): Json<StartBody>,
) -> AppResult<Json<ApiResponse<WatchRecord>>> {
    let user_id = require_user(&body.user_id)?;
    let record = state
        .progress
        .start_watching(
            user_id,
            &episode_id,
            body.watched_via.as_deref().unwrap_or("feed"),
        )
        .await?;

    tracing::info!(
        request_id = %request_id,
        user_id,
        episode_id = %episode_id,
        "playback started"
    );
    Ok(ok(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressBody {
    user_id: Option<String>,
    current_position: f64,
    session_duration: Option<u64>,
    #[serde(default)]
    pause_count: u64,
    #[serde(default)]
    seek_count: u64,
    #[serde(default)]
    buffering_time: u64,
}

/// Applies a progress update
pub async fn progress(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Json(body): Json<ProgressBody>,
) -> AppResult<Json<ApiResponse<WatchRecord>>> {
    let user_id = require_user(&body.user_id)?;
    let record = state
        .progress
        .update_progress(
            user_id,
            &episode_id,
            body.current_position,
            body.session_duration,
            EngagementDelta {
                pauses: body.pause_count,
                seeks: body.seek_count,
                buffering_ms: body.buffering_time,
            },
        )
        .await?;
    Ok(ok(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteBody {
    user_id: Option<String>,
    final_position: Option<f64>,
}

/// Marks the episode finished
pub async fn complete(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Json(body): Json<CompleteBody>,
) -> AppResult<Json<ApiResponse<WatchRecord>>> {
    let user_id = require_user(&body.user_id)?;
    let record = state
        .progress
        .mark_completed(user_id, &episode_id, body.final_position)
        .await?;
    Ok(ok(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeBody {
    user_id: Option<String>,
}

/// Toggles the like flag
pub async fn like(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Json(body): Json<LikeBody>,
) -> AppResult<Json<ApiResponse<WatchRecord>>> {
    let user_id = require_user(&body.user_id)?;
    let record = state.progress.toggle_like(user_id, &episode_id).await?;
    Ok(ok(record))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareBody {
    user_id: Option<String>,
    share_method: Option<String>,
}

/// Records a share
pub async fn share(
    State(state): State<AppState>,
    Path(episode_id): Path<String>,
    Json(body): Json<ShareBody>,
) -> AppResult<Json<ApiResponse<WatchRecord>>> {
    let user_id = require_user(&body.user_id)?;
    let record = state
        .progress
        .share(
            user_id,
            &episode_id,
            body.share_method.as_deref().unwrap_or("link"),
        )
        .await?;
    Ok(ok(record))
}
