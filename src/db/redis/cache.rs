use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use redis::AsyncCommands;
use redis::Client;
use tokio::sync::mpsc;

/// Prefix applied to every key and tag set this process owns
///
/// Pattern deletion refuses anything outside this namespace so a wildcard
/// can never reach keys belonging to unrelated systems on the same backend.
pub const NAMESPACE: &str = "rf:";

/// Tag-set keys live under their own sub-prefix
const TAG_PREFIX: &str = "rf:tag:";

/// Tag sets outlive their members by at least this long, seconds
const TAG_SET_MIN_TTL: u64 = 86_400;

/// Typed cache keys; `Display` renders the namespaced wire key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheKey {
    Feed {
        user_id: Option<String>,
        limit: usize,
        offset: usize,
        genre: Option<String>,
        language: Option<String>,
        exclude_watched: bool,
    },
    Trending {
        limit: usize,
        timeframe_days: i64,
    },
    Featured,
    EditorsPicks,
    PopularByGenre {
        genre: String,
        language: Option<String>,
        limit: usize,
    },
    ContinueWatching {
        user_id: String,
    },
    Similar {
        title_id: String,
        limit: usize,
    },
    Search {
        fingerprint: String,
    },
    TitleDetail {
        title_id: String,
        user_id: Option<String>,
    },
    EpisodeDetail {
        episode_id: String,
    },
    PrefetchTitle {
        title_id: String,
    },
    PrefetchUser {
        user_id: String,
        stamp: i64,
    },
}

impl Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{NAMESPACE}")?;
        match self {
            CacheKey::Feed {
                user_id,
                limit,
                offset,
                genre,
                language,
                exclude_watched,
            } => write!(
                f,
                "feed:{}:{}:{}:{}:{}:{}",
                user_id.as_deref().unwrap_or("anon"),
                limit,
                offset,
                genre.as_deref().unwrap_or("-"),
                language.as_deref().unwrap_or("-"),
                exclude_watched,
            ),
            CacheKey::Trending {
                limit,
                timeframe_days,
            } => write!(f, "trending:{timeframe_days}:{limit}"),
            CacheKey::Featured => write!(f, "featured"),
            CacheKey::EditorsPicks => write!(f, "editors-picks"),
            CacheKey::PopularByGenre {
                genre,
                language,
                limit,
            } => write!(
                f,
                "popular:{}:{}:{}",
                genre.to_lowercase(),
                language.as_deref().unwrap_or("-"),
                limit,
            ),
            CacheKey::ContinueWatching { user_id } => write!(f, "continue:{user_id}"),
            CacheKey::Similar { title_id, limit } => write!(f, "similar:{title_id}:{limit}"),
            CacheKey::Search { fingerprint } => write!(f, "search:{}", fingerprint.to_lowercase()),
            CacheKey::TitleDetail { title_id, user_id } => write!(
                f,
                "title:{}:{}",
                title_id,
                user_id.as_deref().unwrap_or("anon")
            ),
            CacheKey::EpisodeDetail { episode_id } => write!(f, "episode:{episode_id}"),
            CacheKey::PrefetchTitle { title_id } => write!(f, "prefetch:episode:{title_id}"),
            CacheKey::PrefetchUser { user_id, stamp } => {
                write!(f, "prefetch:{user_id}:{stamp}")
            }
        }
    }
}

/// Symbolic tag for bulk invalidation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheTag {
    User(String),
    Title(String),
    Feed,
}

impl Display for CacheTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheTag::User(id) => write!(f, "user:{id}"),
            CacheTag::Title(id) => write!(f, "title:{id}"),
            CacheTag::Feed => write!(f, "feed"),
        }
    }
}

impl CacheTag {
    fn set_key(&self) -> String {
        format!("{TAG_PREFIX}{self}")
    }
}

/// Creates a Redis client for caching
pub fn create_redis_client(redis_url: &str) -> anyhow::Result<Client> {
    let client = Client::open(redis_url)?;
    Ok(client)
}

/// Message for asynchronous cache writes
struct CacheWriteMessage {
    key: String,
    value: String,
    ttl: u64,
    tags: Vec<CacheTag>,
}

/// Expiring entry in the process-local backend
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// Process-local cache backend
///
/// Serves as the fallback when Redis is not configured and as the backend
/// for tests. Locks are held only for hash-map operations, never across
/// await points.
#[derive(Default)]
pub struct MemoryBackend {
    entries: Mutex<HashMap<String, MemoryEntry>>,
    tags: Mutex<HashMap<String, HashSet<String>>>,
}

impl MemoryBackend {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        match entries.get(key) {
            Some(e) if e.expires_at > Instant::now() => Some(e.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: String, value: String, ttl: u64, tags: &[CacheTag]) {
        {
            let mut tag_map = self.tags.lock().expect("cache lock poisoned");
            for tag in tags {
                tag_map
                    .entry(tag.set_key())
                    .or_default()
                    .insert(key.clone());
            }
        }
        self.entries.lock().expect("cache lock poisoned").insert(
            key,
            MemoryEntry {
                value,
                expires_at: Instant::now() + Duration::from_secs(ttl),
            },
        );
    }

    fn delete(&self, key: &str) {
        self.entries.lock().expect("cache lock poisoned").remove(key);
    }

    fn delete_matching(&self, pattern: &str) -> usize {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let before = entries.len();
        entries.retain(|k, _| !glob_match(pattern, k));
        before - entries.len()
    }

    fn invalidate_tags(&self, tags: &[CacheTag]) -> usize {
        let members: Vec<String> = {
            let mut tag_map = self.tags.lock().expect("cache lock poisoned");
            tags.iter()
                .filter_map(|t| tag_map.remove(&t.set_key()))
                .flatten()
                .collect()
        };
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        let mut removed = 0;
        for key in members {
            if entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        removed
    }
}

/// Minimal glob matcher supporting `*` wildcards, enough for the Redis
/// `KEYS`-style patterns the cache emits
fn glob_match(pattern: &str, input: &str) -> bool {
    let segments: Vec<&str> = pattern.split('*').collect();
    if segments.len() == 1 {
        return pattern == input;
    }

    let mut rest = input;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(r) => rest = r,
                None => return false,
            }
        } else if i == segments.len() - 1 {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

enum Backend {
    Redis(Client),
    Memory(Arc<MemoryBackend>),
}

/// Unified cache surface over Redis with a process-local fallback
///
/// Every operation is best-effort: a backend failure is logged and surfaces
/// as a miss (reads) or a no-op (writes and deletes). Callers must stay
/// correct with the cache entirely unavailable.
///
/// A miss is distinct from a cached nil: the backend stores JSON, so a key
/// holding `null` round-trips as a present value while a missing key is
/// `None`.
#[derive(Clone)]
pub struct Cache {
    backend: Arc<Backend>,
    write_tx: Option<mpsc::UnboundedSender<CacheWriteMessage>>,
}

/// Handle for gracefully shutting down the cache writer
pub struct CacheWriterHandle {
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl CacheWriterHandle {
    /// Signals the writer task to flush pending writes and stop
    pub async fn shutdown(self) {
        if let Some(tx) = self.shutdown_tx {
            let _ = tx.send(()).await;
            tracing::info!("Cache writer shutdown signal sent");
        }
    }
}

impl Cache {
    /// Redis-backed cache with an async write background task
    ///
    /// Writes are funneled through a channel to a background task so cache
    /// population never blocks a request.
    pub fn with_redis(redis_client: Client) -> (Self, CacheWriterHandle) {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);

        let client = redis_client.clone();
        tokio::spawn(async move {
            Self::cache_writer_task(client, write_rx, shutdown_rx).await;
        });

        let cache = Self {
            backend: Arc::new(Backend::Redis(redis_client)),
            write_tx: Some(write_tx),
        };

        (
            cache,
            CacheWriterHandle {
                shutdown_tx: Some(shutdown_tx),
            },
        )
    }

    /// Process-local cache; writes are synchronous
    pub fn in_memory() -> (Self, CacheWriterHandle) {
        (
            Self {
                backend: Arc::new(Backend::Memory(Arc::new(MemoryBackend::default()))),
                write_tx: None,
            },
            CacheWriterHandle { shutdown_tx: None },
        )
    }

    /// Background task that processes cache write messages
    ///
    /// On shutdown signal, drains every remaining message before exiting.
    async fn cache_writer_task(
        client: Client,
        mut write_rx: mpsc::UnboundedReceiver<CacheWriteMessage>,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        tracing::info!("Cache writer task started");

        loop {
            tokio::select! {
                Some(msg) = write_rx.recv() => {
                    if let Err(e) = Self::write_to_redis(&client, msg).await {
                        tracing::warn!(error = %e, "Cache write failed");
                    }
                }
                _ = shutdown_rx.recv() => {
                    write_rx.close();
                    let mut flushed = 0usize;
                    while let Some(msg) = write_rx.recv().await {
                        if let Err(e) = Self::write_to_redis(&client, msg).await {
                            tracing::warn!(error = %e, "Cache flush write failed");
                        } else {
                            flushed += 1;
                        }
                    }
                    tracing::info!(flushed, "Cache writer task stopped");
                    break;
                }
            }
        }
    }

    /// Writes a single entry and its tag-set memberships to Redis
    async fn write_to_redis(client: &Client, msg: CacheWriteMessage) -> redis::RedisResult<()> {
        let mut conn = client.get_multiplexed_async_connection().await?;
        let _: () = conn.set_ex(&msg.key, &msg.value, msg.ttl).await?;
        for tag in &msg.tags {
            let set_key = tag.set_key();
            let _: () = conn.sadd(&set_key, &msg.key).await?;
            let _: () = conn.expire(&set_key, msg.ttl.max(TAG_SET_MIN_TTL) as i64).await?;
        }
        Ok(())
    }

    /// Retrieves and deserializes a value; `None` means miss
    pub async fn get<T: serde::de::DeserializeOwned>(&self, key: &CacheKey) -> Option<T> {
        let wire_key = key.to_string();
        let raw = match self.backend.as_ref() {
            Backend::Memory(mem) => mem.get(&wire_key),
            Backend::Redis(client) => match client.get_multiplexed_async_connection().await {
                Ok(mut conn) => match conn.get::<_, Option<String>>(&wire_key).await {
                    Ok(v) => v,
                    Err(e) => {
                        tracing::warn!(key = %wire_key, error = %e, "Cache read failed");
                        None
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "Cache connection failed");
                    None
                }
            },
        };

        raw.and_then(|json| match serde_json::from_str(&json) {
            Ok(v) => Some(v),
            Err(e) => {
                tracing::warn!(key = %wire_key, error = %e, "Cache entry failed to deserialize");
                None
            }
        })
    }

    /// Stores a value without tags
    pub fn set<T: serde::Serialize>(&self, key: &CacheKey, value: &T, ttl: u64) {
        self.set_with_tags(key, value, ttl, &[]);
    }

    /// Stores a value and records its membership in each tag set
    ///
    /// Redis writes go through the background writer and return immediately;
    /// the memory backend writes synchronously.
    pub fn set_with_tags<T: serde::Serialize>(
        &self,
        key: &CacheKey,
        value: &T,
        ttl: u64,
        tags: &[CacheTag],
    ) {
        let json = match serde_json::to_string(value) {
            Ok(j) => j,
            Err(e) => {
                tracing::warn!(error = %e, "Cache serialization failed");
                return;
            }
        };
        let wire_key = key.to_string();

        match self.backend.as_ref() {
            Backend::Memory(mem) => mem.set(wire_key, json, ttl, tags),
            Backend::Redis(_) => {
                let msg = CacheWriteMessage {
                    key: wire_key,
                    value: json,
                    ttl,
                    tags: tags.to_vec(),
                };
                if let Some(tx) = &self.write_tx {
                    if tx.send(msg).is_err() {
                        tracing::warn!("Cache writer channel closed");
                    }
                }
            }
        }
    }

    /// Removes a single entry
    pub async fn delete(&self, key: &CacheKey) {
        let wire_key = key.to_string();
        match self.backend.as_ref() {
            Backend::Memory(mem) => mem.delete(&wire_key),
            Backend::Redis(client) => {
                if let Ok(mut conn) = client.get_multiplexed_async_connection().await {
                    if let Err(e) = conn.del::<_, ()>(&wire_key).await {
                        tracing::warn!(key = %wire_key, error = %e, "Cache delete failed");
                    }
                }
            }
        }
    }

    /// Removes every key matching a glob pattern
    ///
    /// The pattern must stay inside this process's namespace; anything else
    /// is refused. Prefer tag invalidation for per-user or per-title
    /// eviction.
    pub async fn delete_pattern(&self, pattern: &str) {
        if !pattern.starts_with(NAMESPACE) {
            tracing::warn!(pattern, "Refusing pattern delete outside cache namespace");
            return;
        }

        match self.backend.as_ref() {
            Backend::Memory(mem) => {
                let removed = mem.delete_matching(pattern);
                tracing::debug!(pattern, removed, "Pattern delete");
            }
            Backend::Redis(client) => {
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cache connection failed");
                        return;
                    }
                };
                let keys: Vec<String> = match conn.keys(pattern).await {
                    Ok(k) => k,
                    Err(e) => {
                        tracing::warn!(pattern, error = %e, "Cache pattern scan failed");
                        return;
                    }
                };
                if keys.is_empty() {
                    return;
                }
                if let Err(e) = conn.del::<_, ()>(&keys).await {
                    tracing::warn!(pattern, error = %e, "Cache pattern delete failed");
                }
            }
        }
    }

    /// Deletes every entry belonging to any of the given tags, and the tag
    /// sets themselves
    pub async fn invalidate_by_tags(&self, tags: &[CacheTag]) {
        match self.backend.as_ref() {
            Backend::Memory(mem) => {
                let removed = mem.invalidate_tags(tags);
                tracing::debug!(?tags, removed, "Tag invalidation");
            }
            Backend::Redis(client) => {
                let mut conn = match client.get_multiplexed_async_connection().await {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::warn!(error = %e, "Cache connection failed");
                        return;
                    }
                };

                let mut doomed: Vec<String> = Vec::new();
                for tag in tags {
                    let set_key = tag.set_key();
                    match conn.smembers::<_, Vec<String>>(&set_key).await {
                        Ok(members) => doomed.extend(members),
                        Err(e) => {
                            tracing::warn!(tag = %tag, error = %e, "Tag set read failed");
                        }
                    }
                    doomed.push(set_key);
                }

                if doomed.is_empty() {
                    return;
                }
                if let Err(e) = conn.del::<_, ()>(&doomed).await {
                    tracing::warn!(?tags, error = %e, "Tag invalidation failed");
                }
            }
        }
    }
}
