use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::db::{Cache, CacheKey, CacheTag};
use crate::error::AppResult;
use crate::models::{Card, Episode, PrefetchBlock, PrefetchEpisode, ProgressOverlay};
use crate::store::{CatalogStore, WatchStore};

/// Title-level plans stay valid for ~20 minutes
const TITLE_PLAN_TTL: u64 = 1200;
/// Per-user plans stay valid for ~10 minutes
const USER_PLAN_TTL: u64 = 600;
/// Smart-mode window for session behavior
const BINGE_WINDOW_DAYS: i64 = 7;

/// Megabytes per minute of playback for each quality tier
fn quality_multiplier(quality: &str) -> f64 {
    match quality.to_ascii_lowercase().as_str() {
        "480p" => 0.5,
        "720p" => 1.2,
        "1080p" => 2.5,
        "4k" | "2160p" => 6.0,
        _ => 1.0,
    }
}

#[derive(Debug, Clone)]
pub struct PrefetchConfig {
    /// Cards per page that receive a plan
    pub cards: usize,
    /// Upcoming episodes planned per card
    pub episodes_per_card: usize,
    /// Warm-up quality tier the estimate is computed against
    pub quality: String,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            cards: 7,
            episodes_per_card: 5,
            quality: "480p".to_string(),
        }
    }
}

/// Plans low-bandwidth warm-up downloads for upcoming episodes
///
/// Clients buffer the next few episodes at the cheapest rendition while the
/// user decides whether to keep watching; the planner sizes that spend and
/// caches the result per title and per user.
pub struct PrefetchPlanner {
    catalog: Arc<dyn CatalogStore>,
    watch: Arc<dyn WatchStore>,
    cache: Cache,
    config: PrefetchConfig,
}

impl PrefetchPlanner {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        watch: Arc<dyn WatchStore>,
        cache: Cache,
        config: PrefetchConfig,
    ) -> Self {
        Self {
            catalog,
            watch,
            cache,
            config,
        }
    }

    fn build_block(&self, episodes: &[Episode]) -> PrefetchBlock {
        let count = episodes.len() as u32;
        let entries: Vec<PrefetchEpisode> = episodes
            .iter()
            .enumerate()
            .map(|(i, e)| PrefetchEpisode {
                episode_id: e.id.clone(),
                season_number: e.season_number,
                episode_number: e.episode_number,
                title: e.title.clone(),
                duration: e.duration,
                prefetch_url: e.prefetch_url().to_string(),
                stream_url: e.stream_url().to_string(),
                priority: count - i as u32,
                progress: None,
            })
            .collect();

        let estimated_total_mb = estimate_mb(episodes, &self.config.quality);

        PrefetchBlock {
            episodes: entries,
            quality: self.config.quality.clone(),
            estimated_total_mb,
        }
    }

    /// Upcoming-episode plan for one title, cached title-wide
    ///
    /// The cached plan carries no user state; the progress overlay is
    /// applied per request from a single batched read.
    pub async fn plan_for_title(
        &self,
        title_id: &str,
        after: (u32, u32),
        user_id: Option<&str>,
    ) -> AppResult<PrefetchBlock> {
        let key = CacheKey::PrefetchTitle {
            title_id: title_id.to_string(),
        };

        let mut block = match self.cache.get::<PrefetchBlock>(&key).await {
            Some(cached) => cached,
            None => {
                let episodes = self
                    .catalog
                    .episodes_after(title_id, after, self.config.episodes_per_card)
                    .await?;
                let block = self.build_block(&episodes);

                let mut tags = vec![CacheTag::Title(title_id.to_string())];
                if let Some(u) = user_id {
                    tags.push(CacheTag::User(u.to_string()));
                }
                self.cache.set_with_tags(&key, &block, TITLE_PLAN_TTL, &tags);
                block
            }
        };

        if let Some(user) = user_id {
            self.overlay_progress(user, &mut block).await?;
        }
        Ok(block)
    }

    /// Fills the progress overlay from one batched watch-record read
    async fn overlay_progress(&self, user_id: &str, block: &mut PrefetchBlock) -> AppResult<()> {
        let ids: Vec<String> = block.episodes.iter().map(|e| e.episode_id.clone()).collect();
        if ids.is_empty() {
            return Ok(());
        }
        let records = self.watch.for_episodes(user_id, &ids).await?;
        for entry in &mut block.episodes {
            if let Some(record) = records.get(&entry.episode_id) {
                entry.progress = Some(ProgressOverlay {
                    current_position: record.current_position,
                    percentage_watched: record.percentage_watched,
                    is_completed: record.is_completed,
                });
            }
        }
        Ok(())
    }

    /// Attaches plans to the leading cards of a feed page
    ///
    /// A failed plan degrades to an empty block on that card; the page
    /// itself never fails on prefetch.
    pub async fn attach_plans(&self, cards: &mut [Card], user_id: Option<&str>) {
        let take = self.config.cards.min(cards.len());
        for card in cards.iter_mut().take(take) {
            let after = (
                card.first_episode.season_number,
                card.first_episode.episode_number,
            );
            match self.plan_for_title(&card.title.id, after, user_id).await {
                Ok(block) => card.prefetch = Some(block),
                Err(e) => {
                    tracing::warn!(
                        title_id = %card.title.id,
                        error = %e,
                        "prefetch planning failed, attaching empty block"
                    );
                    card.prefetch = Some(PrefetchBlock {
                        quality: self.config.quality.clone(),
                        ..Default::default()
                    });
                }
            }
        }
    }

    /// Binge-aware plan: depth follows the user's recent episodes-per-session
    ///
    /// Fewer than 2 episodes per session plans 2 ahead; more than 5 plans 7;
    /// anything between plans 3.
    pub async fn smart_plan(
        &self,
        user_id: &str,
        title_id: &str,
        current: (u32, u32),
    ) -> AppResult<PrefetchBlock> {
        let now = Utc::now();
        let stamp = now.timestamp() / USER_PLAN_TTL as i64;
        let key = CacheKey::PrefetchUser {
            user_id: user_id.to_string(),
            stamp,
        };

        if let Some(cached) = self.cache.get::<PrefetchBlock>(&key).await {
            return Ok(cached);
        }

        let depth = {
            let recent = self
                .watch
                .recent(user_id, now - Duration::days(BINGE_WINDOW_DAYS))
                .await?;
            let episodes = recent.len();
            let sessions = recent
                .iter()
                .map(|r| r.session_info.last_watched_at.date_naive())
                .collect::<std::collections::HashSet<_>>()
                .len()
                .max(1);
            let per_session = episodes as f64 / sessions as f64;
            if per_session < 2.0 {
                2
            } else if per_session > 5.0 {
                7
            } else {
                3
            }
        };

        let episodes = self.catalog.episodes_after(title_id, current, depth).await?;
        let mut block = self.build_block(&episodes);
        self.overlay_progress(user_id, &mut block).await?;

        self.cache.set_with_tags(
            &key,
            &block,
            USER_PLAN_TTL,
            &[
                CacheTag::User(user_id.to_string()),
                CacheTag::Title(title_id.to_string()),
            ],
        );

        Ok(block)
    }
}

/// `Σ duration_minutes · multiplier(quality)` over the planned episodes
fn estimate_mb(episodes: &[Episode], quality: &str) -> f64 {
    let multiplier = quality_multiplier(quality);
    episodes
        .iter()
        .map(|e| (e.duration as f64 / 60.0) * multiplier)
        .sum()
}
