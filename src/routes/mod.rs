use axum::{
    http::StatusCode,
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::Level;

use crate::middleware::request_id_middleware;
use crate::services::{FeedService, ProgressService};

pub mod content;
pub mod episodes;
pub mod feed;
pub mod watchlist;

/// Shared application state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub feed: Arc<FeedService>,
    pub progress: Arc<ProgressService>,
}

/// Success envelope: `{ success, data, message? }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Wraps a payload in the success envelope
pub fn ok<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse {
        success: true,
        data,
        message: None,
    })
}

/// Creates the application router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api", api_routes())
        .fallback(handler_404)
        .layer(axum::middleware::from_fn(request_id_middleware))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

fn api_routes() -> Router<AppState> {
    Router::new()
        // Feed surface
        .route("/feed/random", get(feed::random))
        .route("/feed/personalized", post(feed::personalized))
        .route("/feed/trending", get(feed::trending))
        .route("/feed/popular/:genre", get(feed::popular_by_genre))
        .route("/feed/continue/:user_id", get(feed::continue_watching))
        .route("/feed/search", get(feed::search))
        .route("/feed/featured", get(feed::featured))
        .route("/feed/editors-picks", get(feed::editors_picks))
        // Content surface
        .route("/content/:title_id", get(content::title_detail))
        .route("/content/:title_id/episodes", get(content::episodes))
        .route("/content/:title_id/similar", get(content::similar))
        .route("/content/:title_id/prefetch", get(content::smart_prefetch))
        // Playback surface
        .route("/episodes/:episode_id", get(episodes::detail))
        .route("/episodes/:episode_id/start", post(episodes::start))
        .route("/episodes/:episode_id/progress", put(episodes::progress))
        .route("/episodes/:episode_id/complete", post(episodes::complete))
        .route("/episodes/:episode_id/like", post(episodes::like))
        .route("/episodes/:episode_id/share", post(episodes::share))
        // Watchlist surface
        .route("/watchlist/:user_id", get(watchlist::list))
        .route("/watchlist/:user_id/:title_id/rate", post(watchlist::rate))
        .route("/watchlist/:user_id/clear", delete(watchlist::clear))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// 404 handler for unknown routes
async fn handler_404() -> (StatusCode, Json<Value>) {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "error": "not_found",
            "message": "Route not found",
        })),
    )
}
