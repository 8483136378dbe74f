use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::models::PrefetchBlock;
use crate::services::feed::{EpisodeListing, TitleDetailView};

use super::{ok, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleDetailQuery {
    user_id: Option<String>,
}

/// Title details plus the caller's progress overlay
pub async fn title_detail(
    State(state): State<AppState>,
    Path(title_id): Path<String>,
    Query(params): Query<TitleDetailQuery>,
) -> AppResult<Json<ApiResponse<TitleDetailView>>> {
    let view = state
        .feed
        .title_detail(&title_id, params.user_id.as_deref())
        .await?;
    Ok(ok(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodesQuery {
    season_number: Option<u32>,
    page: Option<usize>,
    limit: Option<usize>,
    user_id: Option<String>,
}

pub async fn episodes(
    State(state): State<AppState>,
    Path(title_id): Path<String>,
    Query(params): Query<EpisodesQuery>,
) -> AppResult<Json<ApiResponse<EpisodeListing>>> {
    let listing = state
        .feed
        .list_episodes(
            &title_id,
            params.season_number,
            params.page.unwrap_or(1),
            params.limit.unwrap_or(50),
            params.user_id.as_deref(),
        )
        .await?;
    Ok(ok(listing))
}

#[derive(Debug, Deserialize)]
pub struct SimilarQuery {
    limit: Option<usize>,
}

pub async fn similar(
    State(state): State<AppState>,
    Path(title_id): Path<String>,
    Query(params): Query<SimilarQuery>,
) -> AppResult<Json<ApiResponse<Vec<crate::models::TitleSummary>>>> {
    let titles = state
        .feed
        .get_similar(&title_id, params.limit.unwrap_or(10))
        .await?;
    Ok(ok(titles))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SmartPrefetchQuery {
    user_id: String,
    season_number: Option<u32>,
    episode_number: Option<u32>,
}

/// Binge-aware prefetch plan for the next episodes of a title
pub async fn smart_prefetch(
    State(state): State<AppState>,
    Path(title_id): Path<String>,
    Query(params): Query<SmartPrefetchQuery>,
) -> AppResult<Json<ApiResponse<PrefetchBlock>>> {
    if params.user_id.trim().is_empty() {
        return Err(AppError::Validation("userId is required".into()));
    }
    let current = (
        params.season_number.unwrap_or(1),
        params.episode_number.unwrap_or(0),
    );
    let block = state
        .feed
        .smart_prefetch(&params.user_id, &title_id, current)
        .await?;
    Ok(ok(block))
}
