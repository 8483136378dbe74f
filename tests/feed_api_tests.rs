use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;
use chrono::Utc;
use serde_json::json;

use reelfeed_api::config::{CacheTtls, ScoringWeights};
use reelfeed_api::db::Cache;
use reelfeed_api::models::{
    Episode, FeedSettings, QualityVariant, Title, TitleAnalytics, TitleStatus, TitleType, User,
};
use reelfeed_api::routes::{create_router, AppState};
use reelfeed_api::services::analytics::{AnalyticsHandle, RecordingSink};
use reelfeed_api::services::{
    FeedOptions, FeedService, PrefetchConfig, PrefetchPlanner, ProgressService,
};
use reelfeed_api::store::{CatalogStore, MemoryStore};

struct TestApp {
    server: TestServer,
    store: Arc<MemoryStore>,
    sink: Arc<RecordingSink>,
    // Held so the background workers outlive the test
    _cache_writer: reelfeed_api::db::CacheWriterHandle,
    _analytics_worker: reelfeed_api::services::AnalyticsWorkerHandle,
}

/// Full in-process application over the memory store and memory cache
///
/// Jitter is disabled so score assertions are deterministic; the shuffle
/// still runs.
fn test_app() -> TestApp {
    let store = Arc::new(MemoryStore::new());
    let (cache, cache_writer) = Cache::in_memory();
    let sink = Arc::new(RecordingSink::default());
    let (analytics, analytics_worker) = AnalyticsHandle::spawn(sink.clone());

    let prefetch = PrefetchPlanner::new(
        store.clone(),
        store.clone(),
        cache.clone(),
        PrefetchConfig::default(),
    );

    let options = FeedOptions {
        weights: ScoringWeights {
            jitter: 0.0,
            ..Default::default()
        },
        ttls: CacheTtls::default(),
        pool_deadline: Duration::from_millis(2000),
        ..Default::default()
    };

    let feed = Arc::new(FeedService::new(
        store.clone(),
        store.clone(),
        store.clone(),
        cache.clone(),
        prefetch,
        analytics.clone(),
        options,
    ));
    let progress = Arc::new(ProgressService::new(
        store.clone(),
        store.clone(),
        cache,
        analytics,
        80.0,
        5.0,
        80.0,
    ));

    let server = TestServer::new(create_router(AppState { feed, progress })).unwrap();
    TestApp {
        server,
        store,
        sink,
        _cache_writer: cache_writer,
        _analytics_worker: analytics_worker,
    }
}

fn title(id: &str, popularity: f64, genres: &[&str]) -> Title {
    Title {
        id: id.into(),
        title: format!("Title {id}"),
        description: String::new(),
        genres: genres.iter().map(|s| s.to_string()).collect(),
        languages: vec!["en".into()],
        title_type: TitleType::Series,
        category: "originals".into(),
        age_rating: "16+".into(),
        tags: Vec::new(),
        cast: Vec::new(),
        director: String::new(),
        published_at: Some(Utc::now()),
        status: TitleStatus::Published,
        is_premium: false,
        analytics: TitleAnalytics {
            popularity_score: popularity,
            ..Default::default()
        },
        feed: FeedSettings::default(),
        episode_ids: Vec::new(),
    }
}

fn episode(id: &str, title_id: &str, number: u32, duration: u32) -> Episode {
    Episode {
        id: id.into(),
        title_id: title_id.into(),
        season_number: 1,
        episode_number: number,
        title: format!("Episode {number}"),
        duration,
        thumbnail_url: String::new(),
        video_url: format!("https://cdn.example/{id}/master.m3u8"),
        quality_variants: vec![
            QualityVariant {
                resolution: "480p".into(),
                url: format!("https://cdn.example/{id}/480.m3u8"),
                file_size: 0,
                bitrate: 800,
            },
            QualityVariant {
                resolution: "720p".into(),
                url: format!("https://cdn.example/{id}/720.m3u8"),
                file_size: 0,
                bitrate: 2000,
            },
        ],
        status: TitleStatus::Published,
        streaming_options: Default::default(),
        analytics: Default::default(),
    }
}

/// Seeds a catalog of four titles with one episode each
async fn seed_basic_catalog(store: &MemoryStore) {
    for (id, popularity) in [("t1", 100.0), ("t2", 50.0), ("t3", 30.0), ("t4", 10.0)] {
        let genres: &[&str] = if id == "t1" { &["drama"] } else { &["comedy"] };
        store.insert_title(title(id, popularity, genres)).await;
        store
            .insert_episode(episode(&format!("{id}-e1"), id, 1, 100))
            .await;
    }
}

#[tokio::test]
async fn test_health_check() {
    let app = test_app();
    let response = app.server.get("/health").await;
    response.assert_status_ok();
}

#[tokio::test]
async fn test_unknown_route_envelope() {
    let app = test_app();
    let response = app.server.get("/api/nope").await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "not_found");
}

#[tokio::test]
async fn test_feed_dedup_sources_and_scores() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app.server.get("/api/feed/random?limit=4").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["success"], true);

    let cards = body["data"]["cards"].as_array().unwrap();
    assert_eq!(cards.len(), 4);

    // No duplicate titles, every card tagged with a valid pool source
    let mut ids: Vec<&str> = cards
        .iter()
        .map(|c| c["title"]["id"].as_str().unwrap())
        .collect();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), 4);

    for card in cards {
        let source = card["_feedSource"].as_str().unwrap();
        assert!(["personalized", "trending", "popular", "fresh"].contains(&source));
    }

    // With jitter disabled, the most popular title scores strictly highest
    let score_of = |id: &str| {
        cards
            .iter()
            .find(|c| c["title"]["id"] == id)
            .unwrap()["_algorithmScore"]
            .as_f64()
            .unwrap()
    };
    let top = score_of("t1");
    for other in ["t2", "t3", "t4"] {
        assert!(top > score_of(other));
    }
}

#[tokio::test]
async fn test_feed_cards_carry_first_episode_and_prefetch() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    // A second episode so t1 has something to prefetch
    app.store.insert_episode(episode("t1-e2", "t1", 2, 100)).await;

    let response = app.server.get("/api/feed/random?limit=4").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let cards = body["data"]["cards"].as_array().unwrap();

    for card in cards {
        assert_eq!(card["firstEpisode"]["episodeNumber"], 1);
        // First seven cards always get a prefetch block
        assert!(card["_prefetch"].is_object());
    }

    let t1 = cards.iter().find(|c| c["title"]["id"] == "t1").unwrap();
    let episodes = t1["_prefetch"]["episodes"].as_array().unwrap();
    assert_eq!(episodes.len(), 1);
    assert_eq!(
        episodes[0]["prefetchUrl"].as_str().unwrap(),
        "https://cdn.example/t1-e2/480.m3u8"
    );
}

#[tokio::test]
async fn test_feed_emits_content_view() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    app.server.get("/api/feed/random?limit=4").await.assert_status_ok();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let events = app.sink.events();
    assert!(events
        .iter()
        .any(|e| matches!(e.event_type, reelfeed_api::services::analytics::EventType::ContentView)));
}

#[tokio::test]
async fn test_progress_completion_and_monotonicity() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    // 85 of 100 seconds crosses the completion threshold
    let response = app
        .server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 85.0 }))
        .await;
    response.assert_status_ok();
    let record: serde_json::Value = response.json();
    assert_eq!(record["data"]["percentageWatched"], 85.0);
    assert_eq!(record["data"]["isCompleted"], true);
    assert_eq!(record["data"]["status"], "completed");
    let completed_at = record["data"]["sessionInfo"]["completedAt"].clone();
    assert!(!completed_at.is_null());

    // A lower follow-up position neither rewinds nor re-stamps
    let response = app
        .server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 40.0 }))
        .await;
    response.assert_status_ok();
    let record: serde_json::Value = response.json();
    assert_eq!(record["data"]["currentPosition"], 85.0);
    assert_eq!(record["data"]["sessionInfo"]["completedAt"], completed_at);
}

#[tokio::test]
async fn test_progress_requires_user() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app
        .server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "currentPosition": 10.0 }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "validation");
}

#[tokio::test]
async fn test_progress_unknown_episode_is_404() {
    let app = test_app();
    let response = app
        .server
        .put("/api/episodes/ghost/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 10.0 }))
        .await;
    response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_rating_flow_matches_replacement_formula() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    app.store.set_title_rating("t1", 3.0, 4).await.unwrap();

    // Rating without a watch record is rejected
    let response = app
        .server
        .post("/api/watchlist/u1/t1/rate")
        .json(&json!({ "rating": 5 }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
    let body: serde_json::Value = response.json();
    assert_eq!(body["error"], "conflict");

    // Watch, then rate 5: (3.0 * 4 + 5) / 5 = 3.4
    app.server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 10.0 }))
        .await
        .assert_status_ok();

    let response = app
        .server
        .post("/api/watchlist/u1/t1/rate")
        .json(&json!({ "rating": 5 }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!((body["data"]["averageRating"].as_f64().unwrap() - 3.4).abs() < 1e-9);
    assert_eq!(body["data"]["totalRatings"], 5);

    // Replacing 5 with 1 shifts the mean by (1 - 5) / 5
    let response = app
        .server
        .post("/api/watchlist/u1/t1/rate")
        .json(&json!({ "rating": 1 }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert!((body["data"]["averageRating"].as_f64().unwrap() - 2.6).abs() < 1e-9);
    assert_eq!(body["data"]["totalRatings"], 5);
}

#[tokio::test]
async fn test_rating_out_of_range() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    let response = app
        .server
        .post("/api/watchlist/u1/t1/rate")
        .json(&json!({ "rating": 6 }))
        .await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_like_toggles_flag_and_counter() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    app.store
        .bump_episode_counters("t1-e1", 0, 10, 0, 0)
        .await
        .unwrap();

    let response = app
        .server
        .post("/api/episodes/t1-e1/like")
        .json(&json!({ "userId": "u1" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["liked"], true);
    let e = app.store.get_episode("t1-e1").await.unwrap().unwrap();
    assert_eq!(e.analytics.total_likes, 11);

    let response = app
        .server
        .post("/api/episodes/t1-e1/like")
        .json(&json!({ "userId": "u1" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["liked"], false);
    let e = app.store.get_episode("t1-e1").await.unwrap().unwrap();
    assert_eq!(e.analytics.total_likes, 10);
}

#[tokio::test]
async fn test_continue_watching_window() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    // 4%, 50% and 95% watched; only the middle one is continue-watching
    for (episode_id, position) in [("t1-e1", 4.0), ("t2-e1", 50.0), ("t3-e1", 95.0)] {
        app.server
            .put(&format!("/api/episodes/{episode_id}/progress"))
            .json(&json!({ "userId": "u1", "currentPosition": position }))
            .await
            .assert_status_ok();
    }

    let response = app.server.get("/api/feed/continue/u1?limit=10").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let items = body["data"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["episode"]["id"], "t2-e1");
    assert_eq!(items[0]["percentageWatched"], 50.0);
}

#[tokio::test]
async fn test_exclude_watched_removes_titles() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    for episode_id in ["t1-e1", "t2-e1"] {
        app.server
            .put(&format!("/api/episodes/{episode_id}/progress"))
            .json(&json!({ "userId": "u1", "currentPosition": 50.0 }))
            .await
            .assert_status_ok();
    }

    let response = app
        .server
        .get("/api/feed/random?userId=u1&limit=10&excludeWatched=true")
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let cards = body["data"]["cards"].as_array().unwrap();

    assert!(!cards.is_empty());
    for card in cards {
        let id = card["title"]["id"].as_str().unwrap();
        assert!(id != "t1" && id != "t2");
    }
}

#[tokio::test]
async fn test_search_validation_and_results() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app.server.get("/api/feed/search?q=x").await;
    response.assert_status(axum::http::StatusCode::BAD_REQUEST);

    let response = app.server.get("/api/feed/search?q=Title%20t1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let results = body["data"]["results"].as_array().unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0]["id"], "t1");
}

#[tokio::test]
async fn test_premium_episode_requires_premium_user() {
    let app = test_app();
    let mut premium = title("p1", 10.0, &["drama"]);
    premium.is_premium = true;
    app.store.insert_title(premium).await;
    app.store.insert_episode(episode("p1-e1", "p1", 1, 100)).await;

    let response = app.server.get("/api/episodes/p1-e1").await;
    response.assert_status(axum::http::StatusCode::PAYMENT_REQUIRED);

    // A premium subscriber gets through
    let mut user = User::anonymous("vip");
    user.is_premium = true;
    app.store.insert_user(user).await;

    let response = app.server.get("/api/episodes/p1-e1?userId=vip").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(
        body["data"]["streamUrl"].as_str().unwrap(),
        "https://cdn.example/p1-e1/720.m3u8"
    );
}

#[tokio::test]
async fn test_unpublished_title_is_forbidden() {
    let app = test_app();
    let mut draft = title("d1", 10.0, &["drama"]);
    draft.status = TitleStatus::Draft;
    app.store.insert_title(draft).await;

    let response = app.server.get("/api/content/d1").await;
    response.assert_status(axum::http::StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_episode_quality_selection() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app.server.get("/api/episodes/t1-e1?quality=480p").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(
        body["data"]["streamUrl"].as_str().unwrap(),
        "https://cdn.example/t1-e1/480.m3u8"
    );
}

#[tokio::test]
async fn test_title_detail_with_user_overlay() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    app.store.insert_episode(episode("t1-e2", "t1", 2, 100)).await;

    app.server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 30.0 }))
        .await
        .assert_status_ok();

    let response = app.server.get("/api/content/t1?userId=u1").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["firstEpisode"]["id"], "t1-e1");
    let progress = body["data"]["progress"].as_array().unwrap();
    assert_eq!(progress.len(), 1);
    assert_eq!(progress[0]["percentageWatched"], 30.0);
}

#[tokio::test]
async fn test_watchlist_listing_and_clear() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    for episode_id in ["t1-e1", "t2-e1"] {
        app.server
            .put(&format!("/api/episodes/{episode_id}/progress"))
            .json(&json!({ "userId": "u1", "currentPosition": 50.0 }))
            .await
            .assert_status_ok();
    }

    let response = app.server.get("/api/watchlist/u1?status=watching").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let response = app
        .server
        .delete("/api/watchlist/u1/clear")
        .json(&json!({ "titleId": "t1" }))
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"]["removed"], 1);

    let response = app.server.get("/api/watchlist/u1").await;
    let body: serde_json::Value = response.json();
    assert_eq!(body["data"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_mark_completed_is_idempotent_over_http() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app
        .server
        .post("/api/episodes/t1-e1/complete")
        .json(&json!({ "userId": "u1", "finalPosition": 95.0 }))
        .await;
    response.assert_status_ok();
    let first: serde_json::Value = response.json();
    let stamp = first["data"]["sessionInfo"]["completedAt"].clone();
    assert!(!stamp.is_null());

    let response = app
        .server
        .post("/api/episodes/t1-e1/complete")
        .json(&json!({ "userId": "u1" }))
        .await;
    response.assert_status_ok();
    let second: serde_json::Value = response.json();
    assert_eq!(second["data"]["sessionInfo"]["completedAt"], stamp);
}

#[tokio::test]
async fn test_similar_titles_by_shared_genre() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    // t2..t4 share the comedy genre; t1 is drama but same category
    let response = app.server.get("/api/content/t2/similar?limit=10").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    let results = body["data"].as_array().unwrap();
    assert!(results.iter().all(|t| t["id"] != "t2"));
    assert!(!results.is_empty());
}

#[tokio::test]
async fn test_trending_cards_tagged_trending() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;

    let response = app.server.get("/api/feed/trending?limit=5").await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    for card in body["data"].as_array().unwrap() {
        assert_eq!(card["_feedSource"], "trending");
    }
}

#[tokio::test]
async fn test_smart_prefetch_endpoint() {
    let app = test_app();
    seed_basic_catalog(&app.store).await;
    for n in 2..=8 {
        app.store
            .insert_episode(episode(&format!("t1-e{n}"), "t1", n, 100))
            .await;
    }
    app.server
        .put("/api/episodes/t1-e1/progress")
        .json(&json!({ "userId": "u1", "currentPosition": 50.0 }))
        .await
        .assert_status_ok();

    let response = app
        .server
        .get("/api/content/t1/prefetch?userId=u1&seasonNumber=1&episodeNumber=1")
        .await;
    response.assert_status_ok();
    let body: serde_json::Value = response.json();
    // Light viewer: two episodes planned ahead
    let episodes = body["data"]["episodes"].as_array().unwrap();
    assert_eq!(episodes.len(), 2);
    assert_eq!(episodes[0]["episodeId"], "t1-e2");
}
