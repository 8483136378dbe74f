use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::AppResult;
use crate::models::{WatchRecord, WatchStatus};

use super::{ok, ApiResponse, AppState};

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    status: Option<WatchStatus>,
    page: Option<usize>,
    limit: Option<usize>,
}

/// Paginated watch history, optionally filtered by status
pub async fn list(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ListQuery>,
) -> AppResult<Json<ApiResponse<Vec<WatchRecord>>>> {
    let limit = params.limit.unwrap_or(20).clamp(1, 100);
    let page = params.page.unwrap_or(1).max(1);
    let records = state
        .progress
        .list_history(&user_id, params.status, (page - 1) * limit, limit)
        .await?;
    Ok(ok(records))
}

#[derive(Debug, Deserialize)]
pub struct RateBody {
    rating: u8,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingView {
    pub average_rating: f64,
    pub total_ratings: u64,
}

/// Rates a title; requires a prior watch
pub async fn rate(
    State(state): State<AppState>,
    Path((user_id, title_id)): Path<(String, String)>,
    Json(body): Json<RateBody>,
) -> AppResult<Json<ApiResponse<RatingView>>> {
    let (average_rating, total_ratings) = state
        .progress
        .set_rating(&user_id, &title_id, body.rating)
        .await?;
    Ok(ok(RatingView {
        average_rating,
        total_ratings,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearBody {
    title_id: Option<String>,
    #[serde(alias = "older_than_days")]
    older_than_days: Option<i64>,
}

/// Clears watch history, optionally scoped to a title or an age
pub async fn clear(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    body: Option<Json<ClearBody>>,
) -> AppResult<Json<ApiResponse<serde_json::Value>>> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let removed = state
        .progress
        .clear_history(&user_id, body.title_id.as_deref(), body.older_than_days)
        .await?;
    Ok(ok(json!({ "removed": removed })))
}
