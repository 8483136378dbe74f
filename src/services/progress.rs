use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{Duration, Utc};
use serde_json::json;
use tokio::sync::OwnedMutexGuard;

use crate::db::{Cache, CacheTag};
use crate::error::{AppError, AppResult};
use crate::models::{WatchRecord, WatchStatus};
use crate::services::analytics::{AnalyticsEvent, AnalyticsHandle, EventType};
use crate::store::{CatalogStore, WatchStore};

/// Per-key async locks serializing writes to one record
///
/// The map grows with the set of keys written this process lifetime; entries
/// are a single `Arc<Mutex>` each.
#[derive(Clone, Default)]
pub struct KeyLocks {
    inner: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl KeyLocks {
    pub async fn acquire(&self, key: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().expect("lock map poisoned");
            map.entry(key.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

/// Engagement counter deltas reported with a progress update
#[derive(Debug, Clone, Copy, Default)]
pub struct EngagementDelta {
    pub pauses: u64,
    pub seeks: u64,
    pub buffering_ms: u64,
}

/// Progress, rating, like and history operations over watch records
///
/// Writes to a single `(user, episode)` record are serialized through
/// [`KeyLocks`]; the rating recomputation and the title aggregate write
/// share a per-title critical section. Reads never take a lock and may see
/// a slightly stale record.
pub struct ProgressService {
    catalog: Arc<dyn CatalogStore>,
    watch: Arc<dyn WatchStore>,
    cache: Cache,
    analytics: AnalyticsHandle,
    completion_threshold: f64,
    continue_min: f64,
    continue_max: f64,
    locks: KeyLocks,
}

impl ProgressService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        watch: Arc<dyn WatchStore>,
        cache: Cache,
        analytics: AnalyticsHandle,
        completion_threshold: f64,
        continue_min: f64,
        continue_max: f64,
    ) -> Self {
        Self {
            catalog,
            watch,
            cache,
            analytics,
            completion_threshold,
            continue_min,
            continue_max,
            locks: KeyLocks::default(),
        }
    }

    fn record_key(user_id: &str, episode_id: &str) -> String {
        format!("w:{user_id}:{episode_id}")
    }

    /// Loads the record or creates it from the episode; must run under the
    /// record lock
    async fn load_or_create(
        &self,
        user_id: &str,
        episode_id: &str,
        watched_via: &str,
    ) -> AppResult<(WatchRecord, bool)> {
        if let Some(record) = self.watch.get(user_id, episode_id).await? {
            return Ok((record, false));
        }

        let episode = self
            .catalog
            .get_episode(episode_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Episode {episode_id}")))?;

        let record = WatchRecord::new(
            user_id,
            &episode.title_id,
            episode_id,
            episode.ordinal(),
            episode.duration as f64,
            watched_via,
            Utc::now(),
        );
        Ok((record, true))
    }

    /// Recomputes completed-view fractions after one record crosses the
    /// completion threshold
    async fn apply_completion_effects(&self, record: &WatchRecord) {
        // Fraction of views that completed; one more completion just landed
        let _guard = self
            .locks
            .acquire(&format!("cr:{}", record.episode_id))
            .await;

        if let Ok(Some(episode)) = self.catalog.get_episode(&record.episode_id).await {
            let views = episode.analytics.total_views.max(1) as f64;
            let completed = episode.analytics.completion_rate * views / 100.0 + 1.0;
            let rate = (completed / views * 100.0).clamp(0.0, 100.0);
            if let Err(e) = self
                .catalog
                .set_episode_completion_rate(&record.episode_id, rate)
                .await
            {
                tracing::warn!(error = %e, episode_id = %record.episode_id, "completion rate update failed");
            }
        }

        if let Ok(Some(title)) = self.catalog.get_title(&record.title_id).await {
            let views = title.analytics.total_views.max(1) as f64;
            let completed = title.analytics.completion_rate * views / 100.0 + 1.0;
            let rate = (completed / views * 100.0).clamp(0.0, 100.0);
            if let Err(e) = self
                .catalog
                .set_title_completion_rate(&record.title_id, rate)
                .await
            {
                tracing::warn!(error = %e, title_id = %record.title_id, "completion rate update failed");
            }
        }

        self.analytics.track(
            AnalyticsEvent::of(EventType::VideoEnd)
                .user(Some(&record.user_id))
                .content(&record.title_id)
                .episode(&record.episode_id)
                .data(json!({ "percentageWatched": record.percentage_watched })),
        );
    }

    async fn invalidate_user(&self, user_id: &str) {
        self.cache
            .invalidate_by_tags(&[CacheTag::User(user_id.to_string())])
            .await;
    }

    /// Begins or resumes playback of an episode
    pub async fn start_watching(
        &self,
        user_id: &str,
        episode_id: &str,
        watched_via: &str,
    ) -> AppResult<WatchRecord> {
        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, created) = self.load_or_create(user_id, episode_id, watched_via).await?;
        let now = Utc::now();
        record.session_info.last_watched_at = now;
        if !record.is_completed {
            record.status = WatchStatus::Watching;
        }

        if created {
            self.catalog
                .bump_episode_counters(episode_id, 1, 0, 0, 0)
                .await?;
            self.catalog
                .bump_title_counters(&record.title_id, 1, 0, 0)
                .await?;
            self.analytics.track(
                AnalyticsEvent::of(EventType::VideoStart)
                    .user(Some(user_id))
                    .content(&record.title_id)
                    .episode(episode_id)
                    .data(json!({ "watchedVia": watched_via })),
            );
        }

        self.watch.upsert(&record).await?;
        self.invalidate_user(user_id).await;
        Ok(record)
    }

    /// Applies a position update; creates the record on first contact
    ///
    /// Position never decreases, completion is stamped exactly once, and the
    /// session accounting folds `session_seconds` into the running average.
    pub async fn update_progress(
        &self,
        user_id: &str,
        episode_id: &str,
        position: f64,
        session_seconds: Option<u64>,
        engagement: EngagementDelta,
    ) -> AppResult<WatchRecord> {
        if position < 0.0 || !position.is_finite() {
            return Err(AppError::Validation("currentPosition must be a non-negative number".into()));
        }

        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, _created) = self.load_or_create(user_id, episode_id, "feed").await?;
        let was_completed = record.is_completed;

        if !record.is_completed {
            record.status = WatchStatus::Watching;
        }
        record.apply_position(position, self.completion_threshold, Utc::now());

        if let Some(seconds) = session_seconds {
            record.record_session(seconds);
            self.catalog
                .bump_episode_counters(episode_id, 0, 0, 0, seconds as i64)
                .await?;
        }
        record.engagement.pause_count += engagement.pauses;
        record.engagement.seek_count += engagement.seeks;
        record.engagement.buffering_time += engagement.buffering_ms;

        self.watch.upsert(&record).await?;

        if record.is_completed && !was_completed {
            self.apply_completion_effects(&record).await;
        }

        self.invalidate_user(user_id).await;
        Ok(record)
    }

    /// Adds engagement counters without moving the playhead
    pub async fn add_engagement(
        &self,
        user_id: &str,
        episode_id: &str,
        delta: EngagementDelta,
    ) -> AppResult<WatchRecord> {
        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, _created) = self.load_or_create(user_id, episode_id, "feed").await?;
        record.engagement.pause_count += delta.pauses;
        record.engagement.seek_count += delta.seeks;
        record.engagement.buffering_time += delta.buffering_ms;

        self.watch.upsert(&record).await?;
        self.invalidate_user(user_id).await;
        Ok(record)
    }

    /// Marks the episode finished regardless of the playhead
    ///
    /// Idempotent: a second call neither re-stamps `completedAt` nor
    /// recounts the completion.
    pub async fn mark_completed(
        &self,
        user_id: &str,
        episode_id: &str,
        final_position: Option<f64>,
    ) -> AppResult<WatchRecord> {
        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, _created) = self.load_or_create(user_id, episode_id, "feed").await?;
        let was_completed = record.is_completed;

        let target = final_position
            .unwrap_or(record.total_duration)
            .max(record.total_duration);
        record.apply_position(target, self.completion_threshold, Utc::now());

        self.watch.upsert(&record).await?;

        if record.is_completed && !was_completed {
            self.apply_completion_effects(&record).await;
        }

        self.invalidate_user(user_id).await;
        Ok(record)
    }

    /// Flips the like flag; the episode and title counters move with it and
    /// never drop below zero
    pub async fn toggle_like(&self, user_id: &str, episode_id: &str) -> AppResult<WatchRecord> {
        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, _created) = self.load_or_create(user_id, episode_id, "feed").await?;
        record.liked = !record.liked;
        let delta = if record.liked { 1 } else { -1 };

        self.watch.upsert(&record).await?;
        self.catalog
            .bump_episode_counters(episode_id, 0, delta, 0, 0)
            .await?;
        self.catalog
            .bump_title_counters(&record.title_id, 0, delta, 0)
            .await?;

        if record.liked {
            self.analytics.track(
                AnalyticsEvent::of(EventType::Like)
                    .user(Some(user_id))
                    .content(&record.title_id)
                    .episode(episode_id),
            );
        }

        self.cache
            .invalidate_by_tags(&[CacheTag::Title(record.title_id.clone())])
            .await;
        Ok(record)
    }

    /// Records a share; shares only ever accumulate
    pub async fn share(
        &self,
        user_id: &str,
        episode_id: &str,
        share_method: &str,
    ) -> AppResult<WatchRecord> {
        let _guard = self
            .locks
            .acquire(&Self::record_key(user_id, episode_id))
            .await;

        let (mut record, _created) = self.load_or_create(user_id, episode_id, "feed").await?;
        record.shared = true;

        self.watch.upsert(&record).await?;
        self.catalog
            .bump_episode_counters(episode_id, 0, 0, 1, 0)
            .await?;
        self.catalog
            .bump_title_counters(&record.title_id, 0, 0, 1)
            .await?;

        self.analytics.track(
            AnalyticsEvent::of(EventType::Share)
                .user(Some(user_id))
                .content(&record.title_id)
                .episode(episode_id)
                .data(json!({ "method": share_method })),
        );

        self.cache
            .invalidate_by_tags(&[CacheTag::Title(record.title_id.clone())])
            .await;
        Ok(record)
    }

    /// Rates the title; requires a prior watch record on any of its episodes
    ///
    /// Returns the new `(averageRating, totalRatings)` aggregate. The
    /// replacement formula shifts the mean by exactly `(r1 − r0) / N`.
    pub async fn set_rating(
        &self,
        user_id: &str,
        title_id: &str,
        rating: u8,
    ) -> AppResult<(f64, u64)> {
        if !(1..=5).contains(&rating) {
            return Err(AppError::Validation("rating must be between 1 and 5".into()));
        }

        let records = self.watch.on_title(user_id, title_id).await?;
        if records.is_empty() {
            return Err(AppError::Conflict(format!(
                "Cannot rate {title_id} without watching it first"
            )));
        }

        // The aggregate recomputation and the write share one critical
        // section per title, otherwise concurrent raters drift the mean.
        let _guard = self.locks.acquire(&format!("r:{title_id}")).await;

        let title = self
            .catalog
            .get_title(title_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Title {title_id}")))?;

        let previous = records.iter().find_map(|r| r.rating);

        // The rating rides on the record that carried it before, or the most
        // recently watched one.
        let mut carrier = records
            .iter()
            .find(|r| r.rating.is_some())
            .or_else(|| {
                records
                    .iter()
                    .max_by_key(|r| r.session_info.last_watched_at)
            })
            .cloned()
            .expect("records checked non-empty");

        {
            let record_guard = self
                .locks
                .acquire(&Self::record_key(user_id, &carrier.episode_id))
                .await;
            carrier.rating = Some(rating);
            self.watch.upsert(&carrier).await?;
            drop(record_guard);
        }

        let avg = title.analytics.average_rating;
        let n = title.analytics.total_ratings;
        let (new_avg, new_total) = match previous {
            Some(r0) if n > 0 => {
                let n_f = n as f64;
                (((avg * n_f) - r0 as f64 + rating as f64) / n_f, n)
            }
            _ => {
                let n_f = n as f64;
                (((avg * n_f) + rating as f64) / (n_f + 1.0), n + 1)
            }
        };
        let new_avg = new_avg.clamp(0.0, 5.0);

        self.catalog
            .set_title_rating(title_id, new_avg, new_total)
            .await?;

        self.cache
            .invalidate_by_tags(&[
                CacheTag::User(user_id.to_string()),
                CacheTag::Title(title_id.to_string()),
            ])
            .await;

        Ok((new_avg, new_total))
    }

    /// Records between the continue-watching bounds, most recent first
    pub async fn continue_watching(
        &self,
        user_id: &str,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        self.watch
            .continue_watching(user_id, self.continue_min, self.continue_max, limit)
            .await
    }

    /// Ordered per-episode progress across one title
    pub async fn progress_on_title(
        &self,
        user_id: &str,
        title_id: &str,
    ) -> AppResult<Vec<WatchRecord>> {
        self.watch.on_title(user_id, title_id).await
    }

    /// Paginated watch history
    pub async fn list_history(
        &self,
        user_id: &str,
        status: Option<WatchStatus>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        self.watch.list(user_id, status, skip, limit).await
    }

    /// Bulk delete of watch history, optionally scoped to a title or an age
    pub async fn clear_history(
        &self,
        user_id: &str,
        title_id: Option<&str>,
        older_than_days: Option<i64>,
    ) -> AppResult<u64> {
        let before = older_than_days.map(|days| Utc::now() - Duration::days(days));
        let removed = self.watch.delete_history(user_id, title_id, before).await?;

        self.invalidate_user(user_id).await;
        tracing::info!(user_id, removed, "watch history cleared");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        Episode, FeedSettings, Title, TitleAnalytics, TitleStatus, TitleType,
    };
    use crate::services::analytics::{AnalyticsHandle, RecordingSink};
    use crate::store::MemoryStore;

    fn title(id: &str) -> Title {
        Title {
            id: id.into(),
            title: id.into(),
            description: String::new(),
            genres: Vec::new(),
            languages: Vec::new(),
            title_type: TitleType::Series,
            category: String::new(),
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

    fn episode(id: &str, title_id: &str, number: u32, duration: u32) -> Episode {
        Episode {
            id: id.into(),
            title_id: title_id.into(),
            season_number: 1,
            episode_number: number,
            title: id.into(),
            duration,
            thumbnail_url: String::new(),
            video_url: String::new(),
            quality_variants: Vec::new(),
            status: TitleStatus::Published,
            streaming_options: Default::default(),
            analytics: Default::default(),
        }
    }

    async fn service() -> (ProgressService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        store.insert_title(title("t1")).await;
        store.insert_episode(episode("e1", "t1", 1, 100)).await;
        store.insert_episode(episode("e2", "t1", 2, 100)).await;

        let (cache, _handle) = Cache::in_memory();
        let (analytics, _worker) = AnalyticsHandle::spawn(Arc::new(RecordingSink::default()));
        let svc = ProgressService::new(
            store.clone(),
            store.clone(),
            cache,
            analytics,
            80.0,
            5.0,
            80.0,
        );
        (svc, store)
    }

    #[tokio::test]
    async fn test_update_progress_unknown_episode() {
        let (svc, _store) = service().await;
        let err = svc
            .update_progress("u1", "nope", 10.0, None, EngagementDelta::default())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_completion_at_eighty_percent() {
        let (svc, _store) = service().await;

        let record = svc
            .update_progress("u1", "e1", 85.0, None, EngagementDelta::default())
            .await
            .unwrap();
        assert_eq!(record.percentage_watched, 85.0);
        assert!(record.is_completed);
        assert_eq!(record.status, WatchStatus::Completed);
        let stamp = record.session_info.completed_at.unwrap();

        // A later, lower position neither rewinds nor re-stamps
        let record = svc
            .update_progress("u1", "e1", 40.0, None, EngagementDelta::default())
            .await
            .unwrap();
        assert_eq!(record.current_position, 85.0);
        assert_eq!(record.session_info.completed_at, Some(stamp));
    }

    #[tokio::test]
    async fn test_mark_completed_idempotent() {
        let (svc, _store) = service().await;

        let first = svc.mark_completed("u1", "e1", Some(90.0)).await.unwrap();
        assert!(first.is_completed);
        let stamp = first.session_info.completed_at.unwrap();

        let second = svc.mark_completed("u1", "e1", None).await.unwrap();
        assert_eq!(second.session_info.completed_at, Some(stamp));
    }

    #[tokio::test]
    async fn test_engagement_counters_accumulate() {
        let (svc, _store) = service().await;
        svc.add_engagement(
            "u1",
            "e1",
            EngagementDelta {
                pauses: 2,
                seeks: 1,
                buffering_ms: 300,
            },
        )
        .await
        .unwrap();
        let record = svc
            .add_engagement(
                "u1",
                "e1",
                EngagementDelta {
                    pauses: 1,
                    seeks: 0,
                    buffering_ms: 200,
                },
            )
            .await
            .unwrap();

        assert_eq!(record.engagement.pause_count, 3);
        assert_eq!(record.engagement.seek_count, 1);
        assert_eq!(record.engagement.buffering_time, 500);
    }

    #[tokio::test]
    async fn test_toggle_like_round_trip() {
        let (svc, store) = service().await;
        store
            .bump_episode_counters("e1", 0, 10, 0, 0)
            .await
            .unwrap();

        let liked = svc.toggle_like("u1", "e1").await.unwrap();
        assert!(liked.liked);
        let e = store.get_episode("e1").await.unwrap().unwrap();
        assert_eq!(e.analytics.total_likes, 11);

        let unliked = svc.toggle_like("u1", "e1").await.unwrap();
        assert!(!unliked.liked);
        let e = store.get_episode("e1").await.unwrap().unwrap();
        assert_eq!(e.analytics.total_likes, 10);
    }

    #[tokio::test]
    async fn test_rating_requires_watch() {
        let (svc, _store) = service().await;
        let err = svc.set_rating("u1", "t1", 5).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_rating_new_and_replacement() {
        let (svc, store) = service().await;

        // Seed the title with an existing aggregate of four ratings at 3.0
        store.set_title_rating("t1", 3.0, 4).await.unwrap();
        svc.update_progress("u1", "e1", 10.0, None, EngagementDelta::default())
            .await
            .unwrap();

        let (avg, total) = svc.set_rating("u1", "t1", 5).await.unwrap();
        assert!((avg - 3.4).abs() < 1e-9);
        assert_eq!(total, 5);

        // Replacing 5 with 1 shifts the mean by (1 - 5) / 5
        let (avg, total) = svc.set_rating("u1", "t1", 1).await.unwrap();
        assert!((avg - 2.6).abs() < 1e-9);
        assert_eq!(total, 5);
    }

    #[tokio::test]
    async fn test_rating_out_of_range() {
        let (svc, _store) = service().await;
        assert!(matches!(
            svc.set_rating("u1", "t1", 0).await.unwrap_err(),
            AppError::Validation(_)
        ));
        assert!(matches!(
            svc.set_rating("u1", "t1", 6).await.unwrap_err(),
            AppError::Validation(_)
        ));
    }

    #[tokio::test]
    async fn test_continue_watching_band() {
        let (svc, _store) = service().await;

        svc.update_progress("u1", "e1", 4.0, None, EngagementDelta::default())
            .await
            .unwrap();
        svc.update_progress("u1", "e2", 50.0, None, EngagementDelta::default())
            .await
            .unwrap();

        let items = svc.continue_watching("u1", 10).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].episode_id, "e2");
    }

    #[tokio::test]
    async fn test_clear_history_scoped_to_title() {
        let (svc, store) = service().await;
        store.insert_title(title("t2")).await;
        store.insert_episode(episode("x1", "t2", 1, 100)).await;

        svc.update_progress("u1", "e1", 10.0, None, EngagementDelta::default())
            .await
            .unwrap();
        svc.update_progress("u1", "x1", 10.0, None, EngagementDelta::default())
            .await
            .unwrap();

        let removed = svc.clear_history("u1", Some("t1"), None).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(svc.list_history("u1", None, 0, 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_average_tracks_updates() {
        let (svc, _store) = service().await;
        svc.update_progress("u1", "e1", 10.0, Some(60), EngagementDelta::default())
            .await
            .unwrap();
        let record = svc
            .update_progress("u1", "e1", 20.0, Some(120), EngagementDelta::default())
            .await
            .unwrap();
        assert_eq!(record.session_info.total_sessions, 3);
        assert!(record.session_info.average_session_length > 0.0);
    }

    #[tokio::test]
    async fn test_concurrent_updates_serialize() {
        let (svc, _store) = service().await;
        let svc = Arc::new(svc);

        let mut handles = Vec::new();
        for i in 0..20u32 {
            let svc = svc.clone();
            handles.push(tokio::spawn(async move {
                svc.update_progress(
                    "u1",
                    "e1",
                    (i as f64) * 2.0,
                    None,
                    EngagementDelta {
                        pauses: 1,
                        ..Default::default()
                    },
                )
                .await
                .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let record = svc
            .update_progress("u1", "e1", 0.0, None, EngagementDelta::default())
            .await
            .unwrap();
        // Highest position wins and every engagement delta landed
        assert_eq!(record.current_position, 38.0);
        assert_eq!(record.engagement.pause_count, 20);
    }
}
