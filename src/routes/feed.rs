use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::RequestId;
use crate::models::{Card, FeedPage, TitleType, UserPreferences};
use crate::services::feed::{ContinueWatchingItem, SearchResults};
use crate::services::{FeedParams, SearchParams};

use super::{ok, ApiResponse, AppState};

const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RandomFeedQuery {
    user_id: Option<String>,
    limit: Option<usize>,
    offset: Option<usize>,
    genre: Option<String>,
    language: Option<String>,
    #[serde(default)]
    exclude_watched: bool,
}

/// Handler for the infinite personalized feed
pub async fn random(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<RandomFeedQuery>,
) -> AppResult<Json<ApiResponse<FeedPage>>> {
    let page = state
        .feed
        .get_feed(FeedParams {
            user_id: params.user_id,
            limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: params.offset.unwrap_or(0),
            genre: params.genre,
            language: params.language,
            exclude_watched: params.exclude_watched,
            preferences: None,
        })
        .await?;

    tracing::info!(
        request_id = %request_id,
        cards = page.cards.len(),
        "feed page served"
    );
    Ok(ok(page))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonalizedFeedBody {
    user_id: Option<String>,
    preferences: Option<UserPreferences>,
    limit: Option<usize>,
    offset: Option<usize>,
    #[serde(default)]
    exclude_watched: bool,
}

/// Same feed, preferences carried in the body
pub async fn personalized(
    State(state): State<AppState>,
    Json(body): Json<PersonalizedFeedBody>,
) -> AppResult<Json<ApiResponse<FeedPage>>> {
    let page = state
        .feed
        .get_feed(FeedParams {
            user_id: body.user_id,
            limit: body.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            offset: body.offset.unwrap_or(0),
            genre: None,
            language: None,
            exclude_watched: body.exclude_watched,
            preferences: body.preferences,
        })
        .await?;
    Ok(ok(page))
}

#[derive(Debug, Deserialize)]
pub struct TrendingQuery {
    limit: Option<usize>,
    /// Lookback window in days
    timeframe: Option<i64>,
}

pub async fn trending(
    State(state): State<AppState>,
    Query(params): Query<TrendingQuery>,
) -> AppResult<Json<ApiResponse<Vec<Card>>>> {
    let cards = state
        .feed
        .get_trending(params.limit.unwrap_or(DEFAULT_PAGE_SIZE), params.timeframe)
        .await?;
    Ok(ok(cards))
}

#[derive(Debug, Deserialize)]
pub struct PopularQuery {
    limit: Option<usize>,
    language: Option<String>,
}

pub async fn popular_by_genre(
    State(state): State<AppState>,
    Path(genre): Path<String>,
    Query(params): Query<PopularQuery>,
) -> AppResult<Json<ApiResponse<Vec<crate::models::TitleSummary>>>> {
    let titles = state
        .feed
        .get_popular_by_genre(
            &genre,
            params.language.as_deref(),
            params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
        )
        .await?;
    Ok(ok(titles))
}

#[derive(Debug, Deserialize)]
pub struct ContinueQuery {
    limit: Option<usize>,
}

pub async fn continue_watching(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(params): Query<ContinueQuery>,
) -> AppResult<Json<ApiResponse<Vec<ContinueWatchingItem>>>> {
    let items = state
        .feed
        .get_continue_watching(&user_id, params.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .await?;
    Ok(ok(items))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    q: String,
    genre: Option<String>,
    language: Option<String>,
    #[serde(rename = "type")]
    title_type: Option<TitleType>,
    page: Option<usize>,
    limit: Option<usize>,
    user_id: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(params): Query<SearchQuery>,
) -> AppResult<Json<ApiResponse<SearchResults>>> {
    tracing::info!(request_id = %request_id, q = %params.q, "search request");

    let results = state
        .feed
        .search(SearchParams {
            q: params.q,
            genre: params.genre,
            language: params.language,
            title_type: params.title_type,
            page: params.page.unwrap_or(1),
            limit: params.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            user_id: params.user_id,
        })
        .await?;
    Ok(ok(results))
}

#[derive(Debug, Deserialize)]
pub struct RailQuery {
    limit: Option<usize>,
}

pub async fn featured(
    State(state): State<AppState>,
    Query(params): Query<RailQuery>,
) -> AppResult<Json<ApiResponse<Vec<crate::models::TitleSummary>>>> {
    let titles = state
        .feed
        .get_featured(params.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .await?;
    Ok(ok(titles))
}

pub async fn editors_picks(
    State(state): State<AppState>,
    Query(params): Query<RailQuery>,
) -> AppResult<Json<ApiResponse<Vec<crate::models::TitleSummary>>>> {
    let titles = state
        .feed
        .get_editors_picks(params.limit.unwrap_or(DEFAULT_PAGE_SIZE))
        .await?;
    Ok(ok(titles))
}
