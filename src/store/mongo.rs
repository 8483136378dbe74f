use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use chrono::{DateTime, Utc};
use futures_util::TryStreamExt;
use mongodb::options::{FindOptions, IndexOptions, ReplaceOptions};
use mongodb::Collection;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MongoClient, EPISODES, TITLES, USERS, WATCH_RECORDS};
use crate::error::AppResult;
use crate::models::{Episode, Title, TitleStatus, TitleType, User, WatchRecord, WatchStatus};

use super::{CatalogStore, TitleOrder, TitleQuery, UserStore, WatchStore};

/// Title document with a denormalized epoch-millis sort key
///
/// Chrono timestamps serialize as RFC 3339 strings, which do not range-query
/// reliably; the mirror field carries the same instant as a number.
#[derive(Debug, Serialize, Deserialize)]
struct TitleDoc {
    #[serde(flatten)]
    title: Title,
    #[serde(rename = "publishedMs")]
    published_ms: Option<i64>,
}

impl From<Title> for TitleDoc {
    fn from(title: Title) -> Self {
        let published_ms = title.published_at.map(|d| d.timestamp_millis());
        Self {
            title,
            published_ms,
        }
    }
}

impl IntoIndexes for TitleDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (
                doc! { "status": 1, "feed.isInRandomFeed": 1, "feed.feedPriority": -1 },
                None,
            ),
            (doc! { "genres": 1 }, None),
            (doc! { "languages": 1 }, None),
            (doc! { "publishedMs": -1 }, None),
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EpisodeDoc {
    #[serde(flatten)]
    episode: Episode,
}

impl IntoIndexes for EpisodeDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "titleId": 1, "status": 1 }, None),
            (
                doc! { "titleId": 1, "seasonNumber": 1, "episodeNumber": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
        ]
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct UserDoc {
    #[serde(flatten)]
    user: User,
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "id": 1 },
            Some(IndexOptions::builder().unique(true).build()),
        )]
    }
}

/// Watch record document with a denormalized last-watched sort key
#[derive(Debug, Serialize, Deserialize)]
struct WatchDoc {
    #[serde(flatten)]
    record: WatchRecord,
    #[serde(rename = "lastWatchedMs")]
    last_watched_ms: i64,
}

impl From<WatchRecord> for WatchDoc {
    fn from(record: WatchRecord) -> Self {
        let last_watched_ms = record.session_info.last_watched_at.timestamp_millis();
        Self {
            record,
            last_watched_ms,
        }
    }
}

impl IntoIndexes for WatchDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "userId": 1, "episodeId": 1 },
                Some(IndexOptions::builder().unique(true).build()),
            ),
            (doc! { "userId": 1, "lastWatchedMs": -1 }, None),
            (doc! { "titleId": 1, "isCompleted": 1 }, None),
        ]
    }
}

/// Mongo-backed implementation of every repository trait
#[derive(Clone)]
pub struct MongoStore {
    titles: Collection<TitleDoc>,
    episodes: Collection<EpisodeDoc>,
    users: Collection<UserDoc>,
    watch: Collection<WatchDoc>,
}

impl MongoStore {
    /// Binds collections and ensures their indexes
    pub async fn new(client: &MongoClient) -> AppResult<Self> {
        client.apply_indexes::<TitleDoc>(TITLES).await?;
        client.apply_indexes::<EpisodeDoc>(EPISODES).await?;
        client.apply_indexes::<UserDoc>(USERS).await?;
        client.apply_indexes::<WatchDoc>(WATCH_RECORDS).await?;

        Ok(Self {
            titles: client.collection(TITLES),
            episodes: client.collection(EPISODES),
            users: client.collection(USERS),
            watch: client.collection(WATCH_RECORDS),
        })
    }

    fn title_filter(query: &TitleQuery) -> Document {
        let mut filter = Document::new();

        if !query.statuses.is_empty() {
            let statuses: Vec<Bson> = query
                .statuses
                .iter()
                .map(|s| bson::to_bson(s).unwrap_or(Bson::Null))
                .collect();
            filter.insert("status", doc! { "$in": statuses });
        }
        if let Some(flag) = query.in_random_feed {
            filter.insert("feed.isInRandomFeed", flag);
        }
        if !query.exclude_ids.is_empty() {
            let ids: Vec<&String> = query.exclude_ids.iter().collect();
            filter.insert("id", doc! { "$nin": ids });
        }
        if !query.genres_any.is_empty() {
            filter.insert("genres", doc! { "$in": &query.genres_any });
        }
        if !query.languages_any.is_empty() {
            filter.insert("languages", doc! { "$in": &query.languages_any });
        }
        if let Some(after) = query.published_after {
            filter.insert("publishedMs", doc! { "$gte": after.timestamp_millis() });
        }
        if let Some(f) = query.featured {
            filter.insert("feed.isFeatured", f);
        }
        if let Some(e) = query.editors_pick {
            filter.insert("feed.isEditorsPick", e);
        }
        if let Some(cat) = &query.category {
            filter.insert("category", cat);
        }

        filter
    }

    fn title_sort(order: TitleOrder) -> Document {
        match order {
            TitleOrder::PriorityThenPopularity => {
                doc! { "feed.feedPriority": -1, "analytics.popularityScore": -1, "id": 1 }
            }
            TitleOrder::TrendingScore => doc! { "analytics.trendingScore": -1, "id": 1 },
            TitleOrder::Popularity => doc! { "analytics.popularityScore": -1, "id": 1 },
            TitleOrder::Newest => doc! { "publishedMs": -1, "id": 1 },
        }
    }

    async fn collect_titles(
        &self,
        filter: Document,
        sort: Document,
        skip: u64,
        limit: usize,
    ) -> AppResult<Vec<Title>> {
        let options = FindOptions::builder()
            .sort(sort)
            .skip(skip)
            .limit(limit as i64)
            .build();

        let docs: Vec<TitleDoc> = self
            .titles
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;

        Ok(docs.into_iter().map(|d| d.title).collect())
    }
}

/// Escapes a user-supplied fragment for use inside a `$regex`
fn regex_escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if r"\.+*?()|[]{}^$".contains(c) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn published_status() -> Bson {
    bson::to_bson(&TitleStatus::Published).unwrap_or_else(|_| Bson::String("published".into()))
}

#[async_trait]
impl CatalogStore for MongoStore {
    async fn find_titles(
        &self,
        query: &TitleQuery,
        order: TitleOrder,
        limit: usize,
    ) -> AppResult<Vec<Title>> {
        self.collect_titles(Self::title_filter(query), Self::title_sort(order), 0, limit)
            .await
    }

    async fn get_title(&self, id: &str) -> AppResult<Option<Title>> {
        let doc = self.titles.find_one(doc! { "id": id }).await?;
        Ok(doc.map(|d| d.title))
    }

    async fn titles_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Title>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs: Vec<TitleDoc> = self
            .titles
            .find(doc! { "id": { "$in": ids } })
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| (d.title.id.clone(), d.title))
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
        let pattern = regex_escape(q);
        let regex = doc! { "$regex": &pattern, "$options": "i" };

        let mut filter = doc! {
            "status": published_status(),
            "$or": [
                { "title": regex.clone() },
                { "description": regex.clone() },
                { "tags": regex.clone() },
                { "cast": regex.clone() },
                { "director": regex },
            ],
        };
        if let Some(g) = genre {
            filter.insert("genres", doc! { "$in": [g] });
        }
        if let Some(l) = language {
            filter.insert("languages", doc! { "$in": [l] });
        }
        if let Some(ty) = title_type {
            filter.insert("type", bson::to_bson(&ty).unwrap_or(Bson::Null));
        }

        self.collect_titles(
            filter,
            Self::title_sort(TitleOrder::Popularity),
            skip as u64,
            limit,
        )
        .await
    }

    async fn similar_titles(&self, to: &Title, limit: usize) -> AppResult<Vec<Title>> {
        let mut clauses: Vec<Document> = Vec::new();
        if !to.category.is_empty() {
            clauses.push(doc! { "category": &to.category });
        }
        if !to.genres.is_empty() {
            clauses.push(doc! { "genres": { "$in": &to.genres } });
        }
        if !to.cast.is_empty() {
            clauses.push(doc! { "cast": { "$in": &to.cast } });
        }
        if !to.director.is_empty() {
            clauses.push(doc! { "director": &to.director });
        }
        if clauses.is_empty() {
            return Ok(Vec::new());
        }

        let filter = doc! {
            "status": published_status(),
            "id": { "$ne": &to.id },
            "$or": clauses,
        };

        self.collect_titles(filter, Self::title_sort(TitleOrder::Popularity), 0, limit)
            .await
    }

    async fn get_episode(&self, id: &str) -> AppResult<Option<Episode>> {
        let doc = self.episodes.find_one(doc! { "id": id }).await?;
        Ok(doc.map(|d| d.episode))
    }

    async fn episodes_by_ids(&self, ids: &[String]) -> AppResult<HashMap<String, Episode>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs: Vec<EpisodeDoc> = self
            .episodes
            .find(doc! { "id": { "$in": ids } })
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| (d.episode.id.clone(), d.episode))
            .collect())
    }

    async fn first_episodes(&self, title_ids: &[String]) -> AppResult<HashMap<String, Episode>> {
        if title_ids.is_empty() {
            return Ok(HashMap::new());
        }

        // One aggregation instead of a find per card
        let pipeline = vec![
            doc! { "$match": {
                "titleId": { "$in": title_ids },
                "status": published_status(),
            }},
            doc! { "$sort": { "titleId": 1, "seasonNumber": 1, "episodeNumber": 1 } },
            doc! { "$group": { "_id": "$titleId", "first": { "$first": "$$ROOT" } } },
        ];

        let results: Vec<Document> = self.episodes.aggregate(pipeline).await?.try_collect().await?;

        let mut out = HashMap::new();
        for group in results {
            if let Ok(first) = group.get_document("first") {
                match bson::from_document::<Episode>(first.clone()) {
                    Ok(episode) => {
                        out.insert(episode.title_id.clone(), episode);
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping undecodable episode document");
                    }
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
        let (season, number) = after;
        let filter = doc! {
            "titleId": title_id,
            "status": published_status(),
            "$or": [
                { "seasonNumber": { "$gt": season } },
                { "seasonNumber": season, "episodeNumber": { "$gt": number } },
            ],
        };
        let options = FindOptions::builder()
            .sort(doc! { "seasonNumber": 1, "episodeNumber": 1 })
            .limit(limit as i64)
            .build();

        let docs: Vec<EpisodeDoc> = self
            .episodes
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.episode).collect())
    }

    async fn list_episodes(
        &self,
        title_id: &str,
        season: Option<u32>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<Episode>> {
        let mut filter = doc! { "titleId": title_id, "status": published_status() };
        if let Some(s) = season {
            filter.insert("seasonNumber", s);
        }
        let options = FindOptions::builder()
            .sort(doc! { "seasonNumber": 1, "episodeNumber": 1 })
            .skip(skip as u64)
            .limit(limit as i64)
            .build();

        let docs: Vec<EpisodeDoc> = self
            .episodes
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.episode).collect())
    }

    async fn set_title_rating(&self, title_id: &str, average: f64, total: u64) -> AppResult<()> {
        self.titles
            .update_one(
                doc! { "id": title_id },
                doc! { "$set": {
                    "analytics.averageRating": average,
                    "analytics.totalRatings": total as i64,
                }},
            )
            .await?;
        Ok(())
    }

    async fn set_title_completion_rate(&self, title_id: &str, rate: f64) -> AppResult<()> {
        self.titles
            .update_one(
                doc! { "id": title_id },
                doc! { "$set": { "analytics.completionRate": rate.clamp(0.0, 100.0) } },
            )
            .await?;
        Ok(())
    }

    async fn set_episode_completion_rate(&self, episode_id: &str, rate: f64) -> AppResult<()> {
        self.episodes
            .update_one(
                doc! { "id": episode_id },
                doc! { "$set": { "analytics.completionRate": rate.clamp(0.0, 100.0) } },
            )
            .await?;
        Ok(())
    }

    async fn bump_title_counters(
        &self,
        title_id: &str,
        views: i64,
        likes: i64,
        shares: i64,
    ) -> AppResult<()> {
        // Pipeline update so negative deltas floor at zero
        let update = vec![doc! { "$set": {
            "analytics.totalViews": floor_add("$analytics.totalViews", views),
            "analytics.totalLikes": floor_add("$analytics.totalLikes", likes),
            "analytics.totalShares": floor_add("$analytics.totalShares", shares),
        }}];
        self.titles.update_one(doc! { "id": title_id }, update).await?;
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
        let update = vec![doc! { "$set": {
            "analytics.totalViews": floor_add("$analytics.totalViews", views),
            "analytics.totalLikes": floor_add("$analytics.totalLikes", likes),
            "analytics.totalShares": floor_add("$analytics.totalShares", shares),
            "analytics.totalWatchTime": floor_add("$analytics.totalWatchTime", watch_time),
        }}];
        self.episodes
            .update_one(doc! { "id": episode_id }, update)
            .await?;
        Ok(())
    }
}

/// `max(0, field + delta)` as an aggregation expression
fn floor_add(field: &str, delta: i64) -> Document {
    doc! { "$max": [0i64, { "$add": [{ "$ifNull": [field, 0i64] }, delta] }] }
}

#[async_trait]
impl UserStore for MongoStore {
    async fn get(&self, user_id: &str) -> AppResult<Option<User>> {
        let doc = self.users.find_one(doc! { "id": user_id }).await?;
        Ok(doc.map(|d| d.user))
    }

    async fn upsert(&self, user: &User) -> AppResult<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.users
            .replace_one(
                doc! { "id": &user.id },
                UserDoc { user: user.clone() },
            )
            .with_options(options)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl WatchStore for MongoStore {
    async fn get(&self, user_id: &str, episode_id: &str) -> AppResult<Option<WatchRecord>> {
        let doc = self
            .watch
            .find_one(doc! { "userId": user_id, "episodeId": episode_id })
            .await?;
        Ok(doc.map(|d| d.record))
    }

    async fn upsert(&self, record: &WatchRecord) -> AppResult<()> {
        let options = ReplaceOptions::builder().upsert(true).build();
        self.watch
            .replace_one(
                doc! { "userId": &record.user_id, "episodeId": &record.episode_id },
                WatchDoc::from(record.clone()),
            )
            .with_options(options)
            .await?;
        Ok(())
    }

    async fn watched_title_ids(&self, user_id: &str) -> AppResult<HashSet<String>> {
        let values = self
            .watch
            .distinct("titleId", doc! { "userId": user_id })
            .await?;
        Ok(values
            .into_iter()
            .filter_map(|v| match v {
                Bson::String(s) => Some(s),
                _ => None,
            })
            .collect())
    }

    async fn continue_watching(
        &self,
        user_id: &str,
        min_pct: f64,
        max_pct: f64,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        let filter = doc! {
            "userId": user_id,
            "status": { "$in": ["watching", "paused"] },
            "percentageWatched": { "$gt": min_pct, "$lt": max_pct },
        };
        let options = FindOptions::builder()
            .sort(doc! { "lastWatchedMs": -1 })
            .limit(limit as i64)
            .build();

        let docs: Vec<WatchDoc> = self
            .watch
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.record).collect())
    }

    async fn on_title(&self, user_id: &str, title_id: &str) -> AppResult<Vec<WatchRecord>> {
        let options = FindOptions::builder()
            .sort(doc! { "seasonNumber": 1, "episodeNumber": 1 })
            .build();
        let docs: Vec<WatchDoc> = self
            .watch
            .find(doc! { "userId": user_id, "titleId": title_id })
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.record).collect())
    }

    async fn for_episodes(
        &self,
        user_id: &str,
        episode_ids: &[String],
    ) -> AppResult<HashMap<String, WatchRecord>> {
        if episode_ids.is_empty() {
            return Ok(HashMap::new());
        }
        let docs: Vec<WatchDoc> = self
            .watch
            .find(doc! { "userId": user_id, "episodeId": { "$in": episode_ids } })
            .await?
            .try_collect()
            .await?;
        Ok(docs
            .into_iter()
            .map(|d| (d.record.episode_id.clone(), d.record))
            .collect())
    }

    async fn recent(&self, user_id: &str, since: DateTime<Utc>) -> AppResult<Vec<WatchRecord>> {
        let docs: Vec<WatchDoc> = self
            .watch
            .find(doc! {
                "userId": user_id,
                "lastWatchedMs": { "$gte": since.timestamp_millis() },
            })
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.record).collect())
    }

    async fn list(
        &self,
        user_id: &str,
        status: Option<WatchStatus>,
        skip: usize,
        limit: usize,
    ) -> AppResult<Vec<WatchRecord>> {
        let mut filter = doc! { "userId": user_id };
        if let Some(s) = status {
            filter.insert("status", bson::to_bson(&s).unwrap_or(Bson::Null));
        }
        let options = FindOptions::builder()
            .sort(doc! { "lastWatchedMs": -1 })
            .skip(skip as u64)
            .limit(limit as i64)
            .build();

        let docs: Vec<WatchDoc> = self
            .watch
            .find(filter)
            .with_options(options)
            .await?
            .try_collect()
            .await?;
        Ok(docs.into_iter().map(|d| d.record).collect())
    }

    async fn delete_history(
        &self,
        user_id: &str,
        title_id: Option<&str>,
        before: Option<DateTime<Utc>>,
    ) -> AppResult<u64> {
        let mut filter = doc! { "userId": user_id };
        if let Some(t) = title_id {
            filter.insert("titleId", t);
        }
        if let Some(b) = before {
            filter.insert("lastWatchedMs", doc! { "$lt": b.timestamp_millis() });
        }
        let result = self.watch.delete_many(filter).await?;
        Ok(result.deleted_count)
    }
}
