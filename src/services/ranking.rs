use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;

use crate::config::ScoringWeights;
use crate::models::{FeedSource, Title, UserPreferences};

use super::pools::SourcedTitle;

/// A candidate carrying its computed feed score
#[derive(Debug, Clone)]
pub struct ScoredTitle {
    pub title: Title,
    pub source: FeedSource,
    pub score: f64,
}

/// Keeps the first occurrence of each title id
///
/// The concatenation order personalized → trending → popular → fresh makes
/// this keep the strongest source attribution.
pub fn dedupe(candidates: Vec<SourcedTitle>) -> Vec<SourcedTitle> {
    let mut seen: HashSet<String> = HashSet::with_capacity(candidates.len());
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.title.id.clone()))
        .collect()
}

/// Deterministic part of the scoring function; jitter is added by the caller
pub fn base_score(
    title: &Title,
    preferences: &UserPreferences,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
) -> f64 {
    let a = &title.analytics;
    let mut score = weights.popularity * a.popularity_score + weights.trending * a.trending_score;

    score += weights.priority * title.feed.feed_priority as f64;
    score += weights.feed_weight * title.feed.feed_weight;

    if title
        .genres
        .iter()
        .any(|g| preferences.preferred_genres.iter().any(|p| p.eq_ignore_ascii_case(g)))
    {
        score += weights.genre_match;
    }
    if title.languages.iter().any(|l| {
        preferences
            .preferred_languages
            .iter()
            .any(|p| p.eq_ignore_ascii_case(l))
    }) {
        score += weights.language_match;
    }

    match title.days_since_published(now) {
        Some(days) if days < 7 => score += weights.fresh_week,
        Some(days) if days < 30 => score += weights.fresh_month,
        _ => {}
    }

    score += weights.completion * a.completion_rate;
    score
}

/// Dedup, score, sort, diversify
///
/// The sort establishes a quality tier set; the Fisher–Yates shuffle that
/// follows breaks positional repetition within it, so two identical requests
/// produce differently ordered pages. Both steps are intentional and run in
/// that order.
pub fn rank<R: Rng>(
    candidates: Vec<SourcedTitle>,
    preferences: &UserPreferences,
    weights: &ScoringWeights,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<ScoredTitle> {
    let mut scored: Vec<ScoredTitle> = dedupe(candidates)
        .into_iter()
        .map(|c| {
            let mut score = base_score(&c.title, preferences, weights, now);
            if weights.jitter > 0.0 {
                score += rng.gen_range(0.0..weights.jitter);
            }
            ScoredTitle {
                title: c.title,
                source: c.source,
                score,
            }
        })
        .collect();

    scored.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.title.id.cmp(&b.title.id)));
    scored.shuffle(rng);
    scored
}

/// `[offset, offset + limit)` window of the ranked list
pub fn page_slice(ranked: Vec<ScoredTitle>, offset: usize, limit: usize) -> Vec<ScoredTitle> {
    ranked.into_iter().skip(offset).take(limit).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TitleAnalytics, TitleStatus, TitleType};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn title(id: &str, popularity: f64, genres: &[&str]) -> Title {
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
            published_at: None,
            status: TitleStatus::Published,
            is_premium: false,
            analytics: TitleAnalytics {
                popularity_score: popularity,
                ..Default::default()
            },
            feed: Default::default(),
            episode_ids: Vec::new(),
        }
    }

    fn sourced(id: &str, popularity: f64, source: FeedSource) -> SourcedTitle {
        SourcedTitle {
            title: title(id, popularity, &["drama"]),
            source,
        }
    }

    fn no_jitter() -> ScoringWeights {
        ScoringWeights {
            jitter: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_dedupe_keeps_first_attribution() {
        let candidates = vec![
            sourced("a", 1.0, FeedSource::Personalized),
            sourced("b", 1.0, FeedSource::Trending),
            sourced("a", 1.0, FeedSource::Popular),
        ];
        let deduped = dedupe(candidates);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].source, FeedSource::Personalized);
    }

    #[test]
    fn test_genre_and_language_boosts() {
        let weights = no_jitter();
        let prefs = UserPreferences {
            preferred_genres: vec!["Drama".into()],
            preferred_languages: vec!["EN".into()],
            ..Default::default()
        };
        let now = Utc::now();

        let boosted = base_score(&title("a", 0.0, &["drama"]), &prefs, &weights, now);
        let plain = base_score(&title("a", 0.0, &[]), &prefs, &weights, now);

        // Genre (+20) and language (+15) both match case-insensitively;
        // the plain title still gets the language boost.
        assert_eq!(boosted - plain, weights.genre_match);
    }

    #[test]
    fn test_recency_tiers() {
        let weights = no_jitter();
        let prefs = UserPreferences::default();
        let now = Utc::now();

        let mut this_week = title("a", 0.0, &[]);
        this_week.published_at = Some(now - chrono::Duration::days(2));
        let mut this_month = title("b", 0.0, &[]);
        this_month.published_at = Some(now - chrono::Duration::days(20));
        let mut old = title("c", 0.0, &[]);
        old.published_at = Some(now - chrono::Duration::days(90));
        let undated = title("d", 0.0, &[]);

        let base = base_score(&undated, &prefs, &weights, now);
        assert_eq!(
            base_score(&this_week, &prefs, &weights, now) - base,
            weights.fresh_week
        );
        assert_eq!(
            base_score(&this_month, &prefs, &weights, now) - base,
            weights.fresh_month
        );
        assert_eq!(base_score(&old, &prefs, &weights, now), base);
    }

    #[test]
    fn test_rank_scores_dominant_title_highest() {
        let prefs = UserPreferences {
            preferred_genres: vec!["drama".into()],
            ..Default::default()
        };
        let candidates = vec![
            sourced("t1", 100.0, FeedSource::Personalized),
            sourced("t2", 50.0, FeedSource::Popular),
            sourced("t3", 30.0, FeedSource::Popular),
            sourced("t4", 10.0, FeedSource::Fresh),
        ];

        let mut rng = StdRng::seed_from_u64(7);
        let ranked = rank(candidates, &prefs, &no_jitter(), Utc::now(), &mut rng);

        assert_eq!(ranked.len(), 4);
        let t1 = ranked.iter().find(|s| s.title.id == "t1").unwrap();
        for other in ranked.iter().filter(|s| s.title.id != "t1") {
            assert!(t1.score > other.score);
        }
    }

    #[test]
    fn test_shuffle_varies_order_across_calls() {
        let prefs = UserPreferences::default();
        let weights = ScoringWeights::default();
        let now = Utc::now();

        let make = || {
            (0..12)
                .map(|i| sourced(&format!("t{i}"), i as f64, FeedSource::Popular))
                .collect::<Vec<_>>()
        };

        let mut rng_a = StdRng::seed_from_u64(1);
        let mut rng_b = StdRng::seed_from_u64(2);
        let order_a: Vec<String> = rank(make(), &prefs, &weights, now, &mut rng_a)
            .into_iter()
            .map(|s| s.title.id)
            .collect();
        let order_b: Vec<String> = rank(make(), &prefs, &weights, now, &mut rng_b)
            .into_iter()
            .map(|s| s.title.id)
            .collect();

        // Identical inputs, different orderings
        assert_ne!(order_a, order_b);

        let mut sorted_a = order_a.clone();
        let mut sorted_b = order_b.clone();
        sorted_a.sort();
        sorted_b.sort();
        assert_eq!(sorted_a, sorted_b);
    }

    #[test]
    fn test_page_slice() {
        let prefs = UserPreferences::default();
        let mut rng = StdRng::seed_from_u64(3);
        let ranked = rank(
            (0..10)
                .map(|i| sourced(&format!("t{i}"), i as f64, FeedSource::Popular))
                .collect(),
            &prefs,
            &no_jitter(),
            Utc::now(),
            &mut rng,
        );

        let page = page_slice(ranked.clone(), 4, 3);
        assert_eq!(page.len(), 3);
        assert_eq!(page[0].title.id, ranked[4].title.id);

        let past_end = page_slice(ranked, 9, 5);
        assert_eq!(past_end.len(), 1);
    }
}
