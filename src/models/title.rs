use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of content a title represents
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum TitleType {
    Movie,
    Series,
    WebSeries,
}

/// Publication lifecycle of a title
///
/// Only `Published` titles are visible to the feed pipeline; everything else
/// is owned by the admin subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TitleStatus {
    Draft,
    Published,
    Archived,
    Private,
}

/// Aggregated engagement counters maintained on each title
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TitleAnalytics {
    pub total_views: u64,
    pub total_likes: u64,
    pub total_shares: u64,
    /// Mean of all user ratings, in `[0, 5]`
    pub average_rating: f64,
    pub total_ratings: u64,
    pub popularity_score: f64,
    /// Maintained by an external pipeline; the feed only reads it
    pub trending_score: f64,
    /// Fraction of views that reached completion, in `[0, 100]`
    pub completion_rate: f64,
}

/// Feed placement controls set by editors
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FeedSettings {
    pub is_in_random_feed: bool,
    /// Editorial priority, 1 (lowest) to 10 (highest)
    pub feed_priority: u8,
    pub feed_weight: f64,
    pub is_featured: bool,
    pub is_editors_pick: bool,
    pub geographic_restrictions: Vec<String>,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            is_in_random_feed: true,
            feed_priority: 1,
            feed_weight: 0.0,
            is_featured: false,
            is_editors_pick: false,
            geographic_restrictions: Vec::new(),
        }
    }
}

/// A movie, series or web-series in the catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Title {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(rename = "type")]
    pub title_type: TitleType,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub age_rating: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub cast: Vec<String>,
    #[serde(default)]
    pub director: String,
    pub published_at: Option<DateTime<Utc>>,
    pub status: TitleStatus,
    #[serde(default)]
    pub is_premium: bool,
    #[serde(default)]
    pub analytics: TitleAnalytics,
    #[serde(default)]
    pub feed: FeedSettings,
    /// Episodes in playback order; the first entry is the feed card
    #[serde(default)]
    pub episode_ids: Vec<String>,
}

impl Title {
    /// Whether the title can appear in any feed pool
    pub fn is_feed_eligible(&self) -> bool {
        self.status == TitleStatus::Published && self.feed.is_in_random_feed
    }

    /// Days elapsed since publication, or `None` for unpublished titles
    pub fn days_since_published(&self, now: DateTime<Utc>) -> Option<i64> {
        self.published_at.map(|p| (now - p).num_days())
    }

    /// On-demand popularity recomputation
    ///
    /// Blends view volume, engagement and recency. The recency component is
    /// clamped to zero when `published_at` is absent.
    pub fn compute_popularity(&self, now: DateTime<Utc>) -> f64 {
        let views = (self.analytics.total_views as f64 + 1.0).ln();
        let engagement = (self.analytics.total_likes as f64 * 2.0
            + self.analytics.total_shares as f64 * 3.0
            + 1.0)
            .ln();
        let rating = self.analytics.average_rating * 10.0;
        let recency = match self.days_since_published(now) {
            Some(days) if days >= 0 => (30.0 - days as f64).max(0.0),
            _ => 0.0,
        };
        views * 10.0 + engagement * 5.0 + rating + recency
    }
}

/// Compact title projection embedded in feed cards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TitleSummary {
    pub id: String,
    pub title: String,
    pub description: String,
    pub genres: Vec<String>,
    pub languages: Vec<String>,
    #[serde(rename = "type")]
    pub title_type: TitleType,
    pub category: String,
    pub age_rating: String,
    pub average_rating: f64,
    pub total_views: u64,
    pub total_likes: u64,
    pub episode_count: usize,
}

impl From<&Title> for TitleSummary {
    fn from(t: &Title) -> Self {
        Self {
            id: t.id.clone(),
            title: t.title.clone(),
            description: t.description.clone(),
            genres: t.genres.clone(),
            languages: t.languages.clone(),
            title_type: t.title_type,
            category: t.category.clone(),
            age_rating: t.age_rating.clone(),
            average_rating: t.analytics.average_rating,
            total_views: t.analytics.total_views,
            total_likes: t.analytics.total_likes,
            episode_count: t.episode_ids.len(),
        }
    }
}
