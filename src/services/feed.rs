use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::cached;
use crate::config::{CacheTtls, ScoringWeights};
use crate::db::{Cache, CacheKey, CacheTag};
use crate::error::{AppError, AppResult};
use crate::models::{
    Card, Episode, EpisodeSummary, FeedPage, FeedSource, Title, TitleStatus, TitleSummary,
    TitleType, UserPreferences, WatchRecord,
};
use crate::services::analytics::{AnalyticsEvent, AnalyticsHandle, EventType};
use crate::services::pools::{self, PoolCounts, SourcedTitle};
use crate::services::prefetch::PrefetchPlanner;
use crate::services::ranking;
use crate::store::{CatalogStore, TitleOrder, TitleQuery, UserStore, WatchStore};

/// Inputs of one feed request
#[derive(Debug, Clone, Default)]
pub struct FeedParams {
    pub user_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
    pub genre: Option<String>,
    pub language: Option<String>,
    pub exclude_watched: bool,
    /// Request-supplied preferences; when present the feed is computed
    /// fresh and not cached, since the cache key cannot carry them
    pub preferences: Option<UserPreferences>,
}

#[derive(Debug, Clone, Default)]
pub struct SearchParams {
    pub q: String,
    pub genre: Option<String>,
    pub language: Option<String>,
    pub title_type: Option<TitleType>,
    pub page: usize,
    pub limit: usize,
    /// Only feeds the analytics emission
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResults {
    pub results: Vec<TitleSummary>,
    pub page: usize,
    pub limit: usize,
}

/// One continue-watching rail entry
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinueWatchingItem {
    pub title: TitleSummary,
    pub episode: EpisodeSummary,
    pub current_position: f64,
    pub percentage_watched: f64,
    pub last_watched_at: chrono::DateTime<Utc>,
}

/// Per-episode progress row in a title detail view
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeProgress {
    pub episode_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub current_position: f64,
    pub percentage_watched: f64,
    pub is_completed: bool,
}

impl From<&WatchRecord> for EpisodeProgress {
    fn from(w: &WatchRecord) -> Self {
        Self {
            episode_id: w.episode_id.clone(),
            season_number: w.season_number,
            episode_number: w.episode_number,
            current_position: w.current_position,
            percentage_watched: w.percentage_watched,
            is_completed: w.is_completed,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleDetailView {
    pub title: TitleSummary,
    pub first_episode: Option<EpisodeSummary>,
    /// Present only when a user id accompanied the request
    pub progress: Vec<EpisodeProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeDetailView {
    pub episode: EpisodeSummary,
    /// URL for the requested quality, falling back to the default policy
    pub stream_url: String,
    pub preload_enabled: bool,
    pub progress: Option<EpisodeProgress>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeListing {
    pub episodes: Vec<EpisodeSummary>,
    pub progress: Vec<EpisodeProgress>,
    pub page: usize,
    pub limit: usize,
}

/// Tunables the orchestrator reads from the configuration snapshot
#[derive(Debug, Clone)]
pub struct FeedOptions {
    pub weights: ScoringWeights,
    pub ttls: CacheTtls,
    pub feed_max_page: usize,
    pub search_max_page: usize,
    pub pool_deadline: StdDuration,
    pub continue_min: f64,
    pub continue_max: f64,
}

impl From<&crate::config::Config> for FeedOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            weights: config.scoring_weights(),
            ttls: config.cache_ttls(),
            feed_max_page: config.feed_max_page_size,
            search_max_page: config.search_max_page_size,
            pool_deadline: StdDuration::from_millis(config.pool_deadline_ms),
            continue_min: config.continue_watching_min,
            continue_max: config.continue_watching_max,
        }
    }
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            ttls: CacheTtls::default(),
            feed_max_page: 100,
            search_max_page: 100,
            pool_deadline: StdDuration::from_millis(2000),
            continue_min: 5.0,
            continue_max: 80.0,
        }
    }
}

/// Public entry point of the feed pipeline
///
/// Every read is cache-aside over [`Cache`]; every result is tagged so the
/// write side can invalidate exactly the affected slices.
pub struct FeedService {
    catalog: Arc<dyn CatalogStore>,
    users: Arc<dyn UserStore>,
    watch: Arc<dyn WatchStore>,
    cache: Cache,
    prefetch: PrefetchPlanner,
    analytics: AnalyticsHandle,
    weights: ScoringWeights,
    ttls: CacheTtls,
    feed_max_page: usize,
    search_max_page: usize,
    pool_deadline: StdDuration,
    continue_min: f64,
    continue_max: f64,
}

impl FeedService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        users: Arc<dyn UserStore>,
        watch: Arc<dyn WatchStore>,
        cache: Cache,
        prefetch: PrefetchPlanner,
        analytics: AnalyticsHandle,
        options: FeedOptions,
    ) -> Self {
        Self {
            catalog,
            users,
            watch,
            cache,
            prefetch,
            analytics,
            weights: options.weights,
            ttls: options.ttls,
            feed_max_page: options.feed_max_page,
            search_max_page: options.search_max_page,
            pool_deadline: options.pool_deadline,
            continue_min: options.continue_min,
            continue_max: options.continue_max,
        }
    }

    /// Builds cards for a title list: one batched first-episode lookup,
    /// titles without a resolvable first episode are dropped
    async fn cards_for(
        &self,
        titles: Vec<(Title, FeedSource, f64)>,
    ) -> AppResult<Vec<Card>> {
        let ids: Vec<String> = titles.iter().map(|(t, _, _)| t.id.clone()).collect();
        let firsts = self.catalog.first_episodes(&ids).await?;

        Ok(titles
            .into_iter()
            .filter_map(|(title, source, score)| match firsts.get(&title.id) {
                Some(first) => Some(Card {
                    title: TitleSummary::from(&title),
                    first_episode: EpisodeSummary::from(first),
                    feed_source: source,
                    algorithm_score: score,
                    prefetch: None,
                }),
                None => {
                    tracing::debug!(title_id = %title.id, "dropping card without first episode");
                    None
                }
            })
            .collect())
    }

    /// The personalized infinite feed
    ///
    /// Cache lookup, preference resolution, concurrent candidate pools under
    /// one deadline, rank/diversify/slice, first-episode attach, prefetch
    /// planning, tagged cache write, `content_view` emission.
    pub async fn get_feed(&self, params: FeedParams) -> AppResult<FeedPage> {
        let limit = params.limit.clamp(1, self.feed_max_page);
        let offset = params.offset;
        let user_id = params.user_id.as_deref();
        let explicit_prefs = params.preferences.is_some();

        let key = CacheKey::Feed {
            user_id: params.user_id.clone(),
            limit,
            offset,
            genre: params.genre.clone(),
            language: params.language.clone(),
            exclude_watched: params.exclude_watched,
        };

        if !explicit_prefs {
            if let Some(page) = self.cache.get::<FeedPage>(&key).await {
                tracing::debug!(key = %key, "feed served from cache");
                return Ok(page);
            }
        }

        // Resolve preferences: request body, then the stored profile,
        // then none; explicit genre/language overrides replace the lists.
        let mut preferences = match params.preferences {
            Some(p) => p,
            None => match user_id {
                Some(id) => self
                    .users
                    .get(id)
                    .await?
                    .map(|u| u.preferences)
                    .unwrap_or_default(),
                None => UserPreferences::default(),
            },
        };
        if let Some(genre) = &params.genre {
            preferences.preferred_genres = vec![genre.clone()];
        }
        if let Some(language) = &params.language {
            preferences.preferred_languages = vec![language.clone()];
        }

        let mut base = TitleQuery::published_in_feed();
        if params.exclude_watched {
            if let Some(id) = user_id {
                base.exclude_ids = self.watch.watched_title_ids(id).await?;
            }
        }

        let now = Utc::now();
        let needed = offset + limit;
        let counts = PoolCounts::for_page(needed);
        let candidates = tokio::time::timeout(
            self.pool_deadline,
            pools::gather_candidates(self.catalog.clone(), &base, &preferences, counts, now),
        )
        .await
        .map_err(|_| AppError::Timeout)??;

        // Pools overlap; when dedup leaves the window short, top up from the
        // popular pool so a small catalog still fills the page.
        let mut candidates = ranking::dedupe(candidates);
        if candidates.len() < needed {
            let mut fill = base.clone();
            fill.exclude_ids
                .extend(candidates.iter().map(|c| c.title.id.clone()));
            let extra = self
                .catalog
                .find_titles(&fill, TitleOrder::Popularity, needed - candidates.len())
                .await?;
            candidates.extend(extra.into_iter().map(|title| SourcedTitle {
                title,
                source: FeedSource::Popular,
            }));
        }

        let ranked = {
            let mut rng = rand::thread_rng();
            ranking::rank(candidates, &preferences, &self.weights, now, &mut rng)
        };
        let page_titles: Vec<(Title, FeedSource, f64)> =
            ranking::page_slice(ranked, offset, limit)
                .into_iter()
                .map(|s| (s.title, s.source, s.score))
                .collect();

        let mut cards = self.cards_for(page_titles).await?;
        self.prefetch.attach_plans(&mut cards, user_id).await;

        let has_more = cards.len() == limit;
        let page = FeedPage {
            cards,
            limit,
            offset,
            has_more,
        };

        if !explicit_prefs {
            // Authenticated feeds go staler faster than anonymous ones
            let ttl = if user_id.is_some() {
                self.ttls.medium / 2
            } else {
                self.ttls.medium
            };
            let mut tags = vec![CacheTag::Feed];
            if let Some(id) = user_id {
                tags.push(CacheTag::User(id.to_string()));
            }
            self.cache.set_with_tags(&key, &page, ttl, &tags);
        }

        self.analytics.track(
            AnalyticsEvent::of(EventType::ContentView)
                .user(user_id)
                .data(json!({
                    "limit": limit,
                    "offset": offset,
                    "cards": page.cards.len(),
                    "excludeWatched": params.exclude_watched,
                })),
        );

        Ok(page)
    }

    /// Titles trending inside the given window, as cards
    pub async fn get_trending(
        &self,
        limit: usize,
        timeframe_days: Option<i64>,
    ) -> AppResult<Vec<Card>> {
        let limit = limit.clamp(1, self.feed_max_page);
        let timeframe = timeframe_days.unwrap_or(pools::TRENDING_WINDOW_DAYS).max(1);
        let key = CacheKey::Trending {
            limit,
            timeframe_days: timeframe,
        };

        cached!(
            self.cache,
            key,
            self.ttls.medium,
            &[CacheTag::Feed],
            async {
                let mut query = TitleQuery::published_in_feed();
                query.published_after = Some(Utc::now() - Duration::days(timeframe));
                let titles = self
                    .catalog
                    .find_titles(&query, TitleOrder::TrendingScore, limit)
                    .await?;
                self.cards_for(
                    titles
                        .into_iter()
                        .map(|t| {
                            let score = t.analytics.trending_score;
                            (t, FeedSource::Trending, score)
                        })
                        .collect(),
                )
                .await
            }
        )
    }

    /// Editorially featured titles
    pub async fn get_featured(&self, limit: usize) -> AppResult<Vec<TitleSummary>> {
        let limit = limit.clamp(1, self.feed_max_page);
        cached!(
            self.cache,
            CacheKey::Featured,
            self.ttls.long,
            &[CacheTag::Feed],
            async {
                let mut query = TitleQuery::published();
                query.featured = Some(true);
                let titles = self
                    .catalog
                    .find_titles(&query, TitleOrder::Popularity, limit)
                    .await?;
                Ok::<Vec<TitleSummary>, AppError>(titles.iter().map(TitleSummary::from).collect::<Vec<_>>())
            }
        )
    }

    /// Editors' picks rail
    pub async fn get_editors_picks(&self, limit: usize) -> AppResult<Vec<TitleSummary>> {
        let limit = limit.clamp(1, self.feed_max_page);
        cached!(
            self.cache,
            CacheKey::EditorsPicks,
            self.ttls.long,
            &[CacheTag::Feed],
            async {
                let mut query = TitleQuery::published();
                query.editors_pick = Some(true);
                let titles = self
                    .catalog
                    .find_titles(&query, TitleOrder::Popularity, limit)
                    .await?;
                Ok::<Vec<TitleSummary>, AppError>(titles.iter().map(TitleSummary::from).collect::<Vec<_>>())
            }
        )
    }

    /// Most popular titles within one genre
    pub async fn get_popular_by_genre(
        &self,
        genre: &str,
        language: Option<&str>,
        limit: usize,
    ) -> AppResult<Vec<TitleSummary>> {
        if genre.trim().is_empty() {
            return Err(AppError::Validation("genre must not be empty".into()));
        }
        let limit = limit.clamp(1, self.feed_max_page);
        let key = CacheKey::PopularByGenre {
            genre: genre.to_string(),
            language: language.map(str::to_string),
            limit,
        };

        cached!(
            self.cache,
            key,
            self.ttls.medium,
            &[CacheTag::Feed],
            async {
                let mut query = TitleQuery::published_in_feed();
                query.genres_any = vec![genre.to_string()];
                if let Some(l) = language {
                    query.languages_any = vec![l.to_string()];
                }
                let titles = self
                    .catalog
                    .find_titles(&query, TitleOrder::Popularity, limit)
                    .await?;
                Ok::<Vec<TitleSummary>, AppError>(titles.iter().map(TitleSummary::from).collect::<Vec<_>>())
            }
        )
    }

    /// Partially watched episodes, most recent first, enriched for display
    pub async fn get_continue_watching(
        &self,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<ContinueWatchingItem>> {
        let limit = limit.clamp(1, self.feed_max_page);
        let key = CacheKey::ContinueWatching {
            user_id: user_id.to_string(),
        };

        if let Some(items) = self.cache.get::<Vec<ContinueWatchingItem>>(&key).await {
            return Ok(items);
        }

        let records = self
            .watch
            .continue_watching(user_id, self.continue_min, self.continue_max, limit)
            .await?;

        let episode_ids: Vec<String> = records.iter().map(|r| r.episode_id.clone()).collect();
        let title_ids: Vec<String> = records.iter().map(|r| r.title_id.clone()).collect();
        let episodes = self.catalog.episodes_by_ids(&episode_ids).await?;
        let titles = self.catalog.titles_by_ids(&title_ids).await?;

        let items: Vec<ContinueWatchingItem> = records
            .iter()
            .filter_map(|r| {
                let episode = episodes.get(&r.episode_id)?;
                let title = titles.get(&r.title_id)?;
                Some(ContinueWatchingItem {
                    title: TitleSummary::from(title),
                    episode: EpisodeSummary::from(episode),
                    current_position: r.current_position,
                    percentage_watched: r.percentage_watched,
                    last_watched_at: r.session_info.last_watched_at,
                })
            })
            .collect();

        self.cache.set_with_tags(
            &key,
            &items,
            self.ttls.short,
            &[CacheTag::User(user_id.to_string())],
        );
        Ok(items)
    }

    /// Titles related by category, genre, cast or director
    pub async fn get_similar(&self, title_id: &str, limit: usize) -> AppResult<Vec<TitleSummary>> {
        let limit = limit.clamp(1, self.feed_max_page);
        let key = CacheKey::Similar {
            title_id: title_id.to_string(),
            limit,
        };

        cached!(
            self.cache,
            key,
            self.ttls.medium,
            &[CacheTag::Title(title_id.to_string())],
            async {
                let source = self
                    .catalog
                    .get_title(title_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound(format!("Title {title_id}")))?;
                let titles = self.catalog.similar_titles(&source, limit).await?;
                Ok::<Vec<TitleSummary>, AppError>(titles.iter().map(TitleSummary::from).collect::<Vec<_>>())
            }
        )
    }

    /// Substring search over the published catalog
    pub async fn search(&self, params: SearchParams) -> AppResult<SearchResults> {
        let q = params.q.trim();
        if q.chars().count() < 2 {
            return Err(AppError::Validation(
                "search query must be at least 2 characters".into(),
            ));
        }
        let limit = params.limit.clamp(1, self.search_max_page);
        let page = params.page.max(1);
        let skip = (page - 1) * limit;

        let fingerprint = format!(
            "{}:{}:{}:{}:{}:{}",
            q,
            params.genre.as_deref().unwrap_or("-"),
            params.language.as_deref().unwrap_or("-"),
            params
                .title_type
                .map(|t| format!("{t:?}"))
                .unwrap_or_else(|| "-".into()),
            page,
            limit,
        );
        let key = CacheKey::Search { fingerprint };

        let results: AppResult<SearchResults> = cached!(
            self.cache,
            key,
            self.ttls.medium,
            &[CacheTag::Feed],
            async {
                let titles = self
                    .catalog
                    .search_titles(
                        q,
                        params.genre.as_deref(),
                        params.language.as_deref(),
                        params.title_type,
                        skip,
                        limit,
                    )
                    .await?;
                Ok::<SearchResults, AppError>(SearchResults {
                    results: titles.iter().map(TitleSummary::from).collect(),
                    page,
                    limit,
                })
            }
        );
        let results = results?;

        self.analytics.track(
            AnalyticsEvent::of(EventType::Search)
                .user(params.user_id.as_deref())
                .data(json!({ "q": q, "results": results.results.len(), "page": page })),
        );

        Ok(results)
    }

    /// Title details with the caller's progress overlay
    pub async fn title_detail(
        &self,
        title_id: &str,
        user_id: Option<&str>,
    ) -> AppResult<TitleDetailView> {
        let key = CacheKey::TitleDetail {
            title_id: title_id.to_string(),
            user_id: user_id.map(str::to_string),
        };
        if let Some(view) = self.cache.get::<TitleDetailView>(&key).await {
            return Ok(view);
        }

        let title = self
            .catalog
            .get_title(title_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Title {title_id}")))?;
        if title.status != TitleStatus::Published {
            return Err(AppError::Forbidden(format!(
                "Title {title_id} is not published"
            )));
        }

        let firsts = self
            .catalog
            .first_episodes(std::slice::from_ref(&title.id))
            .await?;
        let progress = match user_id {
            Some(id) => self
                .watch
                .on_title(id, title_id)
                .await?
                .iter()
                .map(EpisodeProgress::from)
                .collect(),
            None => Vec::new(),
        };

        let view = TitleDetailView {
            title: TitleSummary::from(&title),
            first_episode: firsts.get(title_id).map(EpisodeSummary::from),
            progress,
        };

        let mut tags = vec![CacheTag::Title(title_id.to_string())];
        if let Some(id) = user_id {
            tags.push(CacheTag::User(id.to_string()));
        }
        self.cache.set_with_tags(&key, &view, self.ttls.medium, &tags);
        Ok(view)
    }

    /// Episode details with the chosen stream URL
    ///
    /// A premium title requires a premium user; unpublished episodes are
    /// invisible outside the admin surface.
    pub async fn episode_detail(
        &self,
        episode_id: &str,
        user_id: Option<&str>,
        quality: Option<&str>,
    ) -> AppResult<EpisodeDetailView> {
        let episode = self
            .catalog
            .get_episode(episode_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Episode {episode_id}")))?;
        if episode.status != TitleStatus::Published {
            return Err(AppError::Forbidden(format!(
                "Episode {episode_id} is not published"
            )));
        }

        let title = self
            .catalog
            .get_title(&episode.title_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Title {}", episode.title_id)))?;
        if title.is_premium {
            let premium_user = match user_id {
                Some(id) => self
                    .users
                    .get(id)
                    .await?
                    .map(|u| u.is_premium)
                    .unwrap_or(false),
                None => false,
            };
            if !premium_user {
                return Err(AppError::PaymentRequired(format!(
                    "Title {} requires a premium subscription",
                    title.id
                )));
            }
        }

        let stream_url = stream_url_for(&episode, quality);
        let progress = match user_id {
            Some(id) => self
                .watch
                .get(id, episode_id)
                .await?
                .as_ref()
                .map(EpisodeProgress::from),
            None => None,
        };

        Ok(EpisodeDetailView {
            stream_url,
            preload_enabled: episode.streaming_options.preload_enabled,
            episode: EpisodeSummary::from(&episode),
            progress,
        })
    }

    /// Season-filtered, paginated episode listing with progress overlay
    pub async fn list_episodes(
        &self,
        title_id: &str,
        season: Option<u32>,
        page: usize,
        limit: usize,
        user_id: Option<&str>,
    ) -> AppResult<EpisodeListing> {
        let title = self
            .catalog
            .get_title(title_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Title {title_id}")))?;
        if title.status != TitleStatus::Published {
            return Err(AppError::Forbidden(format!(
                "Title {title_id} is not published"
            )));
        }

        let limit = limit.clamp(1, self.feed_max_page);
        let page = page.max(1);
        let episodes = self
            .catalog
            .list_episodes(title_id, season, (page - 1) * limit, limit)
            .await?;

        let mut progress: Vec<EpisodeProgress> = match user_id {
            Some(id) => {
                let ids: Vec<String> = episodes.iter().map(|e| e.id.clone()).collect();
                self.watch
                    .for_episodes(id, &ids)
                    .await?
                    .values()
                    .map(EpisodeProgress::from)
                    .collect()
            }
            None => Vec::new(),
        };
        progress.sort_by_key(|p| (p.season_number, p.episode_number));

        Ok(EpisodeListing {
            episodes: episodes.iter().map(EpisodeSummary::from).collect(),
            progress,
            page,
            limit,
        })
    }

    /// Smart prefetch entry point, proxied here so routes depend on one
    /// service
    pub async fn smart_prefetch(
        &self,
        user_id: &str,
        title_id: &str,
        current: (u32, u32),
    ) -> AppResult<crate::models::PrefetchBlock> {
        self.prefetch.smart_plan(user_id, title_id, current).await
    }
}

/// Requested variant, else the 720p-first default policy
fn stream_url_for(episode: &Episode, quality: Option<&str>) -> String {
    if let Some(q) = quality {
        if let Some(v) = episode.variant(q) {
            return v.url.clone();
        }
    }
    episode.stream_url().to_string()
}
