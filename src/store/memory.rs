use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::error::AppResult;
use crate::models::{Episode, Title, TitleStatus, TitleType, User, WatchRecord, WatchStatus};

use super::{CatalogStore, TitleOrder, TitleQuery, UserStore, WatchStore};

/// Inner maps guarded by one lock; reads clone out so no lock is held
/// across await points
#[derive(Default)]
struct Inner {
    titles: HashMap<String, Title>,
    episodes: HashMap<String, Episode>,
    users: HashMap<String, User>,
    /// Keyed by `(user_id, episode_id)`
    watch: HashMap<(String, String), WatchRecord>,
}

/// In-process store backing tests and single-node development
///
/// Implements every repository trait over plain hash maps with the same
/// ordering and filter semantics as the Mongo-backed store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_title(&self, title: Title) {
        self.inner.write().await.titles.insert(title.id.clone(), title);
    }

    pub async fn insert_episode(&self, episode: Episode) {
        let mut inner = self.inner.write().await;
        if let Some(title) = inner.titles.get_mut(&episode.title_id) {
            if !title.episode_ids.contains(&episode.id) {
                title.episode_ids.push(episode.id.clone());
            }
        }
        inner.episodes.insert(episode.id.clone(), episode);
    }

    pub async fn insert_user(&self, user: User) {
        self.inner.write().await.users.insert(user.id.clone(), user);
    }

    fn sort_titles(titles: &mut [Title], order: TitleOrder) {
        match order {
            TitleOrder::PriorityThenPopularity => titles.sort_by(|a, b| {
                b.feed
                    .feed_priority
                    .cmp(&a.feed.feed_priority)
                    .then(
                        b.analytics
                            .popularity_score
                            .total_cmp(&a.analytics.popularity_score),
                    )
                    .then(a.id.cmp(&b.id))
            }),
            TitleOrder::TrendingScore => titles.sort_by(|a, b| {
                b.analytics
                    .trending_score
                    .total_cmp(&a.analytics.trending_score)
                    .then(a.id.cmp(&b.id))
            }),
            TitleOrder::Popularity => titles.sort_by(|a, b| {
                b.analytics
                    .popularity_score
                    .total_cmp(&a.analytics.popularity_score)
                    .then(a.id.cmp(&b.id))
            }),
            TitleOrder::Newest => titles.sort_by(|a, b| {
                b.published_at
                    .cmp(&a.published_at)
                    .then(a.id.cmp(&b.id))
            }),
        }
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn find_titles(
        &self,
        query: &TitleQuery,
        order: TitleOrder,
        limit: usize,
    ) -> AppResult<Vec<Title>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Title> = inner
            .titles
            .values()
            .filter(|t| query.matches(t))
            .cloned()
            .collect();
        drop(inner);

        Self::sort_titles(&mut out, order);
        out.truncate(limit);
        Ok(out)
    }

    async fn get_title(&self, id: &str) -> AppResult<Option<Title>> {
        Ok(self.inner.read().await.titles.get(id).cloned())
    }

    async fn titles_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Title>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.titles.get(id).map(|t| (id.clone(), t.clone())))
            .collect())
    }

    async fn search_titles(
        &self,
        q: &str,
        genre: Option<&str>,
        language: Option<&str>,
        title_type: Option<TitleType>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<Title>> {
        let needle = q.to_lowercase();
        let inner = self.inner.read().await;
        let mut out: Vec<Title> = inner
            .titles
            .values()
            .filter(|t| t.status == TitleStatus::Published)
            .filter(|t| {
                genre.is_none_or(|g| t.genres.iter().any(|x| x.eq_ignore_ascii_case(g)))
            })
            .filter(|t| {
                language.is_none_or(|l| t.languages.iter().any(|x| x.eq_ignore_ascii_case(l)))
            })
            .filter(|t| title_type.is_none_or(|ty| t.title_type == ty))
            .filter(|t| {
                t.title.to_lowercase().contains(&needle)
                    || t.description.to_lowercase().contains(&needle)
                    || t.tags.iter().any(|x| x.to_lowercase().contains(&needle))
                    || t.cast.iter().any(|x| x.to_lowercase().contains(&needle))
                    || t.director.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect();
        drop(inner);

        Self::sort_titles(&mut out, TitleOrder::Popularity);
        Ok(out.into_iter().skip(skip).take(limit).collect())
    }

    async fn similar_titles(&self, to: &Title, limit: usize) -> AppResult<Vec<Title>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Title> = inner
            .titles
            .values()
            .filter(|t| t.id != to.id && t.status == TitleStatus::Published)
            .filter(|t| {
                (!to.category.is_empty() && t.category.eq_ignore_ascii_case(&to.category))
                    || t.genres
                        .iter()
                        .any(|g| to.genres.iter().any(|x| x.eq_ignore_ascii_case(g)))
                    || t.cast
                        .iter()
                        .any(|c| to.cast.iter().any(|x| x.eq_ignore_ascii_case(c)))
                    || (!to.director.is_empty()
                        && t.director.eq_ignore_ascii_case(&to.director))
            })
            .cloned()
            .collect();
        drop(inner);

        Self::sort_titles(&mut out, TitleOrder::Popularity);
        out.truncate(limit);
        Ok(out)
    }

    async fn get_episode(&self, id: &str) -> AppResult<Option<Episode>> {
        Ok(self.inner.read().await.episodes.get(id).cloned())
    }

    async fn episodes_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Episode>> {
        let inner = self.inner.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| inner.episodes.get(id).map(|e| (id.clone(), e.clone())))
            .collect())
    }

    async fn first_episodes(&self, title_ids: &[String]) -> AppResult<HashMap<String, Episode>> {
        let wanted: HashSet<&String> = title_ids.iter().collect();
        let inner = self.inner.read().await;
        let mut out: HashMap<String, Episode> = HashMap::new();
        for episode in inner.episodes.values() {
            if episode.status != TitleStatus::Published || !wanted.contains(&episode.title_id) {
                continue;
            }
            match out.get(&episode.title_id) {
                Some(existing) if existing.ordinal() <= episode.ordinal() => {}
                _ => {
                    out.insert(episode.title_id.clone(), episode.clone());
                }
            }
        }
        Ok(out)
    }

    async fn episodes_after(
        &self,
        title_id: &str,
        after: (u32, u32),
        limit: usize,
    ) -> AppResult<Vec<Episode>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Episode> = inner
            .episodes
            .values()
            .filter(|e| {
                e.title_id == title_id
                    && e.status == TitleStatus::Published
                    && e.ordinal() > after
            })
            .cloned()
            .collect();
        drop(inner);

        out.sort_by_key(|e| e.ordinal());
        out.truncate(limit);
        Ok(out)
    }

    async fn list_episodes(
        &self,
        title_id: &str,
        season: Option<u32>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<Episode>> {
        let inner = self.inner.read().await;
        let mut out: Vec<Episode> = inner
            .episodes
            .values()
            .filter(|e| e.title_id == title_id && e.status == TitleStatus::Published)
            .filter(|e| season.is_none_or(|s| e.season_number == s))
            .cloned()
            .collect();
        drop(inner);

        out.sort_by_key(|e| e.ordinal());
        Ok(out.into_iter().skip(skip).take(limit).collect())
    }

    async fn set_title_rating(&self, title_id: &str, average: f64, total: u64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(title) = inner.titles.get_mut(title_id) {
            title.analytics.average_rating = average;
            title.analytics.total_ratings = total;
        }
        Ok(())
    }

    async fn set_title_completion_rate(&self, title_id: &str, rate: f64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(title) = inner.titles.get_mut(title_id) {
            title.analytics.completion_rate = rate.clamp(0.0, 100.0);
        }
        Ok(())
    }

    async fn set_episode_completion_rate(&self, episode_id: &str, rate: f64) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(episode) = inner.episodes.get_mut(episode_id) {
            episode.analytics.completion_rate = rate.clamp(0.0, 100.0);
        }
        Ok(())
    }

    async fn bump_title_counters(
        &self,
        title_id: &str,
        views: i64,
        likes: i64,
        shares: i64,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(title) = inner.titles.get_mut(title_id) {
            title.analytics.total_views = saturating_add(title.analytics.total_views, views);
            title.analytics.total_likes = saturating_add(title.analytics.total_likes, likes);
            title.analytics.total_shares = saturating_add(title.analytics.total_shares, shares);
        }
        Ok(())
    }

    async fn bump_episode_counters(
        &self,
        episode_id: &str,
        views: i64,
        likes: i64,
        shares: i64,
        watch_time: i64,
    ) -> AppResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(episode) = inner.episodes.get_mut(episode_id) {
            episode.analytics.total_views = saturating_add(episode.analytics.total_views, views);
            episode.analytics.total_likes = saturating_add(episode.analytics.total_likes, likes);
            episode.analytics.total_shares = saturating_add(episode.analytics.total_shares, shares);
            episode.analytics.total_watch_time =
                saturating_add(episode.analytics.total_watch_time, watch_time);
        }
        Ok(())
    }
}

/// Counter adjustment that never underflows below zero
fn saturating_add(current: u64, delta: i64) -> u64 {
    if delta >= 0 {
        current.saturating_add(delta as u64)
    } else {
        current.saturating_sub(delta.unsigned_abs())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn get(&self, user_id: &str) -> AppResult<Option<User>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn upsert(&self, user: &User) -> AppResult<()> {
        self.inner
            .write()
            .await
            .users
            .insert(user.id.clone(), user.clone());
        Ok(())
    }
}

#[async_trait]
impl WatchStore for MemoryStore {
    async fn get(&self, user_id: &str, episode_id: &str) -> AppResult<Option<WatchRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .watch
            .get(&(user_id.to_string(), episode_id.to_string()))
            .cloned())
    }

    async fn upsert(&self, record: &WatchRecord) -> AppResult<()> {
        self.inner.write().await.watch.insert(
            (record.user_id.clone(), record.episode_id.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn watched_title_ids(&self, user_id: &str) -> AppResult<HashSet<String>> {
        Ok(self
            .inner
            .read()
            .await
            .watch
            .values()
            .filter(|w| w.user_id == user_id)
            .map(|w| w.title_id.clone())
            .collect())
    }

    async fn continue_watching(
        &self,
        user_id: &str,
        min_pct: f64,
        max_pct: f64,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        let inner = self.inner.read().await;
        let mut out: Vec<WatchRecord> = inner
            .watch
            .values()
            .filter(|w| w.user_id == user_id && w.in_continue_band(min_pct, max_pct))
            .cloned()
            .collect();
        drop(inner);

        out.sort_by(|a, b| {
            b.session_info
                .last_watched_at
                .cmp(&a.session_info.last_watched_at)
                .then(a.episode_id.cmp(&b.episode_id))
        });
        out.truncate(limit);
        Ok(out)
    }

    async fn on_title(&self, user_id: &str, title_id: &str) -> AppResult<Vec<WatchRecord>> {
        let inner = self.inner.read().await;
        let mut out: Vec<WatchRecord> = inner
            .watch
            .values()
            .filter(|w| w.user_id == user_id && w.title_id == title_id)
            .cloned()
            .collect();
        drop(inner);

        out.sort_by_key(|w| (w.season_number, w.episode_number));
        Ok(out)
    }

    async fn for_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> AppResult<HashMap<String, WatchRecord>> {
        let inner = self.inner.read().await;
        Ok(episode_ids
            .iter()
            .filter_map(|id| {
                inner
                    .watch
                    .get(&(user_id.to_string(), id.clone()))
                    .map(|w| (id.clone(), w.clone()))
            })
            .collect())
    }

    async fn recent(&self, user_id: &str, since: DateTime<Utc>) -> AppResult<Vec<WatchRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .watch
            .values()
            .filter(|w| w.user_id == user_id && w.session_info.last_watched_at >= since)
            .cloned()
            .collect())
    }

    async fn list(
        &self,
        user_id: &str,
        status: Option<WatchStatus>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        let inner = self.inner.read().await;
        let mut out: Vec<WatchRecord> = inner
            .watch
            .values()
            .filter(|w| w.user_id == user_id)
            .filter(|w| status.is_none_or(|s| w.status == s))
            .cloned()
            .collect();
        drop(inner);

        out.sort_by(|a, b| {
            b.session_info
                .last_watched_at
                .cmp(&a.session_info.last_watched_at)
                .then(a.episode_id.cmp(&b.episode_id))
        });
        Ok(out.into_iter().skip(skip).take(limit).collect())
    }

    async fn delete_history(
        &self,
        user_id: &str,
        title_id: Option<&str>,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<u64> {
        let mut inner = self.inner.write().await;
        let doomed: Vec<(String, String)> = inner
            .watch
            .values()
            .filter(|w| w.user_id == user_id)
            .filter(|w| title_id.is_none_or(|t| w.title_id == t))
            .filter(|w| before.is_none_or(|b| w.session_info.last_watched_at < b))
            .map(|w| (w.user_id.clone(), w.episode_id.clone()))
            .collect();

        let removed = doomed.len() as u64;
        for key in doomed {
            inner.watch.remove(&key);
        }
        Ok(removed)
    }
}
