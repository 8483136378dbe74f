use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{Episode, Title, TitleStatus, TitleType, User, WatchRecord, WatchStatus};

pub mod memory;
pub mod mongo;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

/// Composable title filter; the base predicate of every candidate pool
///
/// Empty vectors mean "no constraint". `genres_any` / `languages_any` match
/// when the title shares at least one entry.
#[derive(Debug, Clone, Default)]
pub struct TitleQuery {
    pub statuses: Vec<TitleStatus>,
    pub in_random_feed: Option<bool>,
    pub exclude_ids: HashSet<String>,
    pub genres_any: Vec<String>,
    pub languages_any: Vec<String>,
    pub published_after: Option<DateTime<Utc>>,
    pub featured: Option<bool>,
    pub editors_pick: Option<bool>,
    pub category: Option<String>,
}

impl TitleQuery {
    /// `status = published ∧ feed.isInRandomFeed`
    pub fn published_in_feed() -> Self {
        Self {
            statuses: vec![TitleStatus::Published],
            in_random_feed: Some(true),
            ..Default::default()
        }
    }

    /// `status = published` without the feed flag, for editorial rails
    pub fn published() -> Self {
        Self {
            statuses: vec![TitleStatus::Published],
            ..Default::default()
        }
    }

    /// Whether a title passes this filter
    pub fn matches(&self, title: &Title) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&title.status) {
            return false;
        }
        if let Some(flag) = self.in_random_feed {
            if title.feed.is_in_random_feed != flag {
                return false;
            }
        }
        if self.exclude_ids.contains(&title.id) {
            return false;
        }
        if !self.genres_any.is_empty()
            && !title
                .genres
                .iter()
                .any(|g| self.genres_any.iter().any(|p| p.eq_ignore_ascii_case(g)))
        {
            return false;
        }
        if !self.languages_any.is_empty()
            && !title
                .languages
                .iter()
                .any(|l| self.languages_any.iter().any(|p| p.eq_ignore_ascii_case(l)))
        {
            return false;
        }
        if let Some(after) = self.published_after {
            match title.published_at {
                Some(p) if p >= after => {}
                _ => return false,
            }
        }
        if let Some(f) = self.featured {
            if title.feed.is_featured != f {
                return false;
            }
        }
        if let Some(e) = self.editors_pick {
            if title.feed.is_editors_pick != e {
                return false;
            }
        }
        if let Some(cat) = &self.category {
            if !title.category.eq_ignore_ascii_case(cat) {
                return false;
            }
        }
        true
    }
}

/// Sort applied to a title query; ties always break by id
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleOrder {
    /// `feed.feedPriority DESC, analytics.popularityScore DESC`
    PriorityThenPopularity,
    /// `analytics.trendingScore DESC`
    TrendingScore,
    /// `analytics.popularityScore DESC`
    Popularity,
    /// `publishedAt DESC`
    Newest,
}

/// Read/write access to titles and episodes
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn find_titles(
        &self,
        query: &TitleQuery,
        order: TitleOrder,
        limit: usize,
    ) -> AppResult<Vec<Title>>;

    async fn get_title(&self, id: &str) -> AppResult<Option<Title>>;

    /// Batched title lookup keyed by id
    async fn titles_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Title>>;

    /// Case-insensitive substring search over title, description, tags,
    /// cast and director, ordered by popularity
    async fn search_titles(
        &self,
        q: &str,
        genre: Option<&str>,
        language: Option<&str>,
        title_type: Option<TitleType>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<Title>>;

    /// Same category or any shared genre, cast member or director,
    /// excluding the source title, ordered by popularity
    async fn similar_titles(&self, to: &Title, limit: usize) -> AppResult<Vec<Title>>;

    async fn get_episode(&self, id: &str) -> AppResult<Option<Episode>>;

    /// Batched episode lookup keyed by id
    async fn episodes_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Episode>>;

    /// Lowest published `(season, episode)` per title, in one batch
    async fn first_episodes(&self, title_ids: &[String]) -> AppResult<HashMap<String, Episode>>;

    /// Published episodes of a title strictly after the given ordinal,
    /// in `(season, episode)` order
    async fn episodes_after(
        &self,
        title_id: &str,
        after: (u32, u32),
        limit: usize,
    ) -> AppResult<Vec<Episode>>;

    async fn list_episodes(
        &self,
        title_id: &str,
        season: Option<u32>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<Episode>>;

    /// Writes `averageRating` and `totalRatings` together
    async fn set_title_rating(&self, title_id: &str, average: f64, total: u64) -> AppResult<()>;

    /// Writes the completed-view fraction, in `[0, 100]`
    async fn set_title_completion_rate(&self, title_id: &str, rate: f64) -> AppResult<()>;

    /// Writes the completed-view fraction, in `[0, 100]`
    async fn set_episode_completion_rate(&self, episode_id: &str, rate: f64) -> AppResult<()>;

    /// Adjusts title counters; negative deltas saturate at zero
    async fn bump_title_counters(
        &self,
        title_id: &str,
        views: i64,
        likes: i64,
        shares: i64,
    ) -> AppResult<()>;

    /// Adjusts episode counters; negative deltas saturate at zero
    async fn bump_episode_counters(
        &self,
        episode_id: &str,
        views: i64,
        likes: i64,
        shares: i64,
        watch_time: i64,
    ) -> AppResult<()>;
}

/// Read/write access to user profiles
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn get(&self, user_id: &str) -> AppResult<Option<User>>;
    async fn upsert(&self, user: &User) -> AppResult<()>;
}

/// Read/write access to watch records
///
/// The store itself is a plain keyed collection; per-record write
/// serialization is the progress service's job.
#[async_trait]
pub trait WatchStore: Send + Sync {
    async fn get(&self, user_id: &str, episode_id: &str) -> AppResult<Option<WatchRecord>>;

    async fn upsert(&self, record: &WatchRecord) -> AppResult<()>;

    /// Distinct title ids the user has any record against
    async fn watched_title_ids(&self, user_id: &str) -> AppResult<HashSet<String>>;

    /// Records inside the continue-watching band, most recent first
    async fn continue_watching(
        &self,
        user_id: &str,
        min_pct: f64,
        max_pct: f64,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>>;

    /// All records on one title, in episode order
    async fn on_title(&self, user_id: &str, title_id: &str) -> AppResult<Vec<WatchRecord>>;

    /// Batched lookup keyed by episode id
    async fn for_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> AppResult<HashMap<String, WatchRecord>>;

    /// Records last touched at or after `since`
    async fn recent(&self, user_id: &str, since: DateTime<Utc>) -> AppResult<Vec<WatchRecord>>;

    /// Paginated history, most recent first, optionally filtered by status
    async fn list(
        &self,
        user_id: &str,
        status: Option<WatchStatus>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>>;

    /// Bulk delete; returns the number of removed records
    async fn delete_history(
        &self,
        user_id: &str,
        title_id: Option<&str>,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<u64>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FeedSettings, TitleAnalytics};
    use chrono::Duration;

    fn title(id: &str) -> Title {
        Title {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            genres: vec!["drama".into()],
            languages: vec!["en".into()],
            title_type: TitleType::Series,
            category: "originals".into(),
            age_rating: String::new(),
            tags: Vec::new(),
            cast: Vec::new(),
            director: String::new(),
            published_at: Some(Utc::now()),
            status: TitleStatus::Published,
            is_premium: false,
            analytics: TitleAnalytics::default(),
            feed: FeedSettings::default(),
            episode_ids: Vec::new(),
        }
    }

    #[test]
    fn test_base_predicate() {
        let q = TitleQuery::published_in_feed();
        assert!(q.matches(&title("a")));

        let mut draft = title("b");
        draft.status = TitleStatus::Draft;
        assert!(!q.matches(&draft));

        let mut out_of_feed = title("c");
        out_of_feed.feed.is_in_random_feed = false;
        assert!(!q.matches(&out_of_feed));
    }

    #[test]
    fn test_exclusion_and_preference_filters() {
        let mut q = TitleQuery::published_in_feed();
        q.exclude_ids.insert("a".into());
        assert!(!q.matches(&title("a")));
        assert!(q.matches(&title("b")));

        q.genres_any = vec!["Comedy".into()];
        assert!(!q.matches(&title("b")));

        q.genres_any = vec!["Drama".into()];
        assert!(q.matches(&title("b")));
    }

    #[test]
    fn test_published_after_requires_date() {
        let mut q = TitleQuery::published_in_feed();
        q.published_after = Some(Utc::now() - Duration::days(7));
        assert!(q.matches(&title("a")));

        let mut old = title("b");
        old.published_at = Some(Utc::now() - Duration::days(30));
        assert!(!q.matches(&old));

        let mut undated = title("c");
        undated.published_at = None;
        assert!(!q.matches(&undated));
    }
}
