use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::error::AppResult;
use crate::models::{FeedSource, Title, UserPreferences};
use crate::store::{CatalogStore, TitleOrder, TitleQuery};

/// Trending pool looks back this many days
pub const TRENDING_WINDOW_DAYS: i64 = 7;
/// Fresh pool looks back this many days
pub const FRESH_WINDOW_DAYS: i64 = 30;

/// A candidate title stamped with the pool that produced it
#[derive(Debug, Clone)]
pub struct SourcedTitle {
    pub title: Title,
    pub source: FeedSource,
}

/// How many candidates each pool contributes for a page of size `total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub personalized: usize,
    pub trending: usize,
    pub popular: usize,
    pub fresh: usize,
}

impl PoolCounts {
    /// 40/30/20/10 split, each rounded up so small pages still draw from
    /// every pool
    pub fn for_page(total: usize) -> Self {
        let share = |ratio: f64| ((total as f64) * ratio).ceil() as usize;
        Self {
            personalized: share(0.4),
            trending: share(0.3),
            popular: share(0.2),
            fresh: share(0.1),
        }
    }
}

/// Runs the four candidate pools concurrently and concatenates their output
/// in attribution order: personalized, trending, popular, fresh
///
/// Each pool applies the shared base predicate plus its own clause and
/// ordering; none blocks the others. The caller owns the deadline.
pub async fn gather_candidates(
    catalog: Arc<dyn CatalogStore>,
    base: &TitleQuery,
    preferences: &UserPreferences,
    counts: PoolCounts,
    now: DateTime<Utc>,
) -> AppResult<Vec<SourcedTitle>> {
    let mut personalized_query = base.clone();
    // Empty preferences degrade to the bare base predicate
    if !preferences.is_empty() {
        personalized_query.genres_any = preferences.preferred_genres.clone();
        personalized_query.languages_any = preferences.preferred_languages.clone();
    }

    let mut trending_query = base.clone();
    trending_query.published_after = Some(now - Duration::days(TRENDING_WINDOW_DAYS));

    let popular_query = base.clone();

    let mut fresh_query = base.clone();
    fresh_query.published_after = Some(now - Duration::days(FRESH_WINDOW_DAYS));

    let (personalized, trending, popular, fresh) = tokio::try_join!(
        catalog.find_titles(
            &personalized_query,
            TitleOrder::PriorityThenPopularity,
            counts.personalized,
        ),
        catalog.find_titles(&trending_query, TitleOrder::TrendingScore, counts.trending),
        catalog.find_titles(&popular_query, TitleOrder::Popularity, counts.popular),
        catalog.find_titles(&fresh_query, TitleOrder::Newest, counts.fresh),
    )?;

    tracing::debug!(
        personalized = personalized.len(),
        trending = trending.len(),
        popular = popular.len(),
        fresh = fresh.len(),
        "candidate pools gathered"
    );

    let tag = |titles: Vec<Title>, source: FeedSource| {
        titles
            .into_iter()
            .map(move |title| SourcedTitle { title, source })
    };

    Ok(tag(personalized, FeedSource::Personalized)
        .chain(tag(trending, FeedSource::Trending))
        .chain(tag(popular, FeedSource::Popular))
        .chain(tag(fresh, FeedSource::Fresh))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TitleStatus, TitleType};
    use crate::store::MemoryStore;

    fn title(id: &str, genres: &[&str], published_days_ago: i64, trending: f64) -> Title {
        Title {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            genres: genres.iter().map(|s| s.to_string()).collect(),
            languages: vec!["en".into()],
            title_type: TitleType::Series,
            category: String::new(),
            age_rating: String::new(),
            tags: Vec::new(),
            cast: Vec::new(),
            director: String::new(),
            published_at: Some(Utc::now() - Duration::days(published_days_ago)),
            status: TitleStatus::Published,
            is_premium: false,
            analytics: crate::models::TitleAnalytics {
                trending_score: trending,
                ..Default::default()
            },
            feed: Default::default(),
            episode_ids: Vec::new(),
        }
    }

    #[test]
    fn test_split_ratios_round_up() {
        let counts = PoolCounts::for_page(20);
        assert_eq!(
            counts,
            PoolCounts {
                personalized: 8,
                trending: 6,
                popular: 4,
                fresh: 2
            }
        );

        let small = PoolCounts::for_page(4);
        assert_eq!(
            small,
            PoolCounts {
                personalized: 2,
                trending: 2,
                popular: 1,
                fresh: 1
            }
        );
    }

    #[tokio::test]
    async fn test_pools_tag_and_window() {
        let store = Arc::new(MemoryStore::new());
        store.insert_title(title("old", &["drama"], 90, 5.0)).await;
        store.insert_title(title("new", &["drama"], 2, 1.0)).await;

        let candidates = gather_candidates(
            store.clone() as Arc<dyn CatalogStore>,
            &TitleQuery::published_in_feed(),
            &UserPreferences::default(),
            PoolCounts::for_page(10),
            Utc::now(),
        )
        .await
        .unwrap();

        // Trending and fresh pools only admit the recent title
        let trending: Vec<&str> = candidates
            .iter()
            .filter(|c| c.source == FeedSource::Trending)
            .map(|c| c.title.id.as_str())
            .collect();
        assert_eq!(trending, vec!["new"]);

        let fresh: Vec<&str> = candidates
            .iter()
            .filter(|c| c.source == FeedSource::Fresh)
            .map(|c| c.title.id.as_str())
            .collect();
        assert_eq!(fresh, vec!["new"]);

        // Popular sees both
        assert_eq!(
            candidates
                .iter()
                .filter(|c| c.source == FeedSource::Popular)
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_personalized_pool_filters_by_preferences() {
        let store = Arc::new(MemoryStore::new());
        store.insert_title(title("d1", &["drama"], 2, 0.0)).await;
        store.insert_title(title("c1", &["comedy"], 2, 0.0)).await;

        let prefs = UserPreferences {
            preferred_genres: vec!["comedy".into()],
            preferred_languages: vec!["en".into()],
            ..Default::default()
        };

        let candidates = gather_candidates(
            store.clone() as Arc<dyn CatalogStore>,
            &TitleQuery::published_in_feed(),
            &prefs,
            PoolCounts::for_page(10),
            Utc::now(),
        )
        .await
        .unwrap();

        let personalized: Vec<&str> = candidates
            .iter()
            .filter(|c| c.source == FeedSource::Personalized)
            .map(|c| c.title.id.as_str())
            .collect();
        assert_eq!(personalized, vec!["c1"]);
    }

    #[tokio::test]
    async fn test_empty_preferences_drop_the_filter() {
        let store = Arc::new(MemoryStore::new());
        store.insert_title(title("d1", &["drama"], 2, 0.0)).await;
        store.insert_title(title("c1", &["comedy"], 2, 0.0)).await;

        let candidates = gather_candidates(
            store.clone() as Arc<dyn CatalogStore>,
            &TitleQuery::published_in_feed(),
            &UserPreferences::default(),
            PoolCounts::for_page(10),
            Utc::now(),
        )
        .await
        .unwrap();

        assert_eq!(
            candidates
                .iter()
                .filter(|c| c.source == FeedSource::Personalized)
                .count(),
            2
        );
    }
}
