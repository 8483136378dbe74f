use serde::Deserialize;

/// Application configuration loaded from environment variables
///
/// Every field has a default so the binary boots with an empty environment;
/// the snapshot is read once at startup and never mutated.
#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// MongoDB connection URI
    #[serde(default = "default_mongodb_uri")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[serde(default = "default_mongodb_db")]
    pub mongodb_db: String,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Serve everything from the in-process memory backends instead of
    /// Mongo/Redis; used for local development
    #[serde(default)]
    pub use_memory_backends: bool,

    // Cache TTLs, seconds
    #[serde(default = "default_ttl_short")]
    pub cache_ttl_short: u64,
    #[serde(default = "default_ttl_medium")]
    pub cache_ttl_medium: u64,
    #[serde(default = "default_ttl_long")]
    pub cache_ttl_long: u64,
    #[serde(default = "default_ttl_very_long")]
    pub cache_ttl_very_long: u64,

    /// Percentage at which an episode counts as completed
    #[serde(default = "default_completion_threshold")]
    pub completion_threshold: f64,

    /// Continue-watching band, exclusive bounds in percent
    #[serde(default = "default_continue_min")]
    pub continue_watching_min: f64,
    #[serde(default = "default_continue_max")]
    pub continue_watching_max: f64,

    /// Cards per page that receive a prefetch plan
    #[serde(default = "default_prefetch_cards")]
    pub prefetch_cards: usize,
    /// Upcoming episodes planned per card
    #[serde(default = "default_prefetch_episodes")]
    pub prefetch_episodes_per_card: usize,
    /// Preferred warm-up quality tier
    #[serde(default = "default_prefetch_quality")]
    pub prefetch_quality: String,

    #[serde(default = "default_feed_max_page")]
    pub feed_max_page_size: usize,
    #[serde(default = "default_search_max_page")]
    pub search_max_page_size: usize,

    /// Deadline for the candidate-pool fan-out, milliseconds
    #[serde(default = "default_pool_deadline_ms")]
    pub pool_deadline_ms: u64,

    // Scoring weights; tuned per catalog shape, so configuration rather
    // than constants
    #[serde(default = "default_w_popularity")]
    pub score_w_popularity: f64,
    #[serde(default = "default_w_trending")]
    pub score_w_trending: f64,
    #[serde(default = "default_w_priority")]
    pub score_w_priority: f64,
    #[serde(default = "default_w_feed_weight")]
    pub score_w_feed_weight: f64,
    #[serde(default = "default_w_genre_match")]
    pub score_w_genre_match: f64,
    #[serde(default = "default_w_language_match")]
    pub score_w_language_match: f64,
    #[serde(default = "default_w_fresh_week")]
    pub score_w_fresh_week: f64,
    #[serde(default = "default_w_fresh_month")]
    pub score_w_fresh_month: f64,
    #[serde(default = "default_w_completion")]
    pub score_w_completion: f64,
    /// Upper bound of the uniform jitter term; zero disables jitter
    #[serde(default = "default_jitter")]
    pub score_jitter: f64,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_mongodb_uri() -> String {
    "mongodb://localhost:27017".to_string()
}

fn default_mongodb_db() -> String {
    "reelfeed".to_string()
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_ttl_short() -> u64 {
    300
}

fn default_ttl_medium() -> u64 {
    1800
}

fn default_ttl_long() -> u64 {
    3600
}

fn default_ttl_very_long() -> u64 {
    7200
}

fn default_completion_threshold() -> f64 {
    80.0
}

fn default_continue_min() -> f64 {
    5.0
}

fn default_continue_max() -> f64 {
    80.0
}

fn default_prefetch_cards() -> usize {
    7
}

fn default_prefetch_episodes() -> usize {
    5
}

fn default_prefetch_quality() -> String {
    "480p".to_string()
}

fn default_feed_max_page() -> usize {
    100
}

fn default_search_max_page() -> usize {
    100
}

fn default_pool_deadline_ms() -> u64 {
    2000
}

fn default_w_popularity() -> f64 {
    0.3
}

fn default_w_trending() -> f64 {
    0.2
}

fn default_w_priority() -> f64 {
    10.0
}

fn default_w_feed_weight() -> f64 {
    5.0
}

fn default_w_genre_match() -> f64 {
    20.0
}

fn default_w_language_match() -> f64 {
    15.0
}

fn default_w_fresh_week() -> f64 {
    10.0
}

fn default_w_fresh_month() -> f64 {
    5.0
}

fn default_w_completion() -> f64 {
    0.1
}

fn default_jitter() -> f64 {
    10.0
}

/// Weight set for the feed scoring function
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub popularity: f64,
    pub trending: f64,
    pub priority: f64,
    pub feed_weight: f64,
    pub genre_match: f64,
    pub language_match: f64,
    pub fresh_week: f64,
    pub fresh_month: f64,
    pub completion: f64,
    pub jitter: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            popularity: default_w_popularity(),
            trending: default_w_trending(),
            priority: default_w_priority(),
            feed_weight: default_w_feed_weight(),
            genre_match: default_w_genre_match(),
            language_match: default_w_language_match(),
            fresh_week: default_w_fresh_week(),
            fresh_month: default_w_fresh_month(),
            completion: default_w_completion(),
            jitter: default_jitter(),
        }
    }
}

/// Cache TTL tiers, seconds
#[derive(Debug, Clone, Copy)]
pub struct CacheTtls {
    pub short: u64,
    pub medium: u64,
    pub long: u64,
    pub very_long: u64,
}

impl Default for CacheTtls {
    fn default() -> Self {
        Self {
            short: default_ttl_short(),
            medium: default_ttl_medium(),
            long: default_ttl_long(),
            very_long: default_ttl_very_long(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        envy::from_env::<Config>().map_err(|e| anyhow::anyhow!("Failed to load config: {}", e))
    }

    pub fn scoring_weights(&self) -> ScoringWeights {
        ScoringWeights {
            popularity: self.score_w_popularity,
            trending: self.score_w_trending,
            priority: self.score_w_priority,
            feed_weight: self.score_w_feed_weight,
            genre_match: self.score_w_genre_match,
            language_match: self.score_w_language_match,
            fresh_week: self.score_w_fresh_week,
            fresh_month: self.score_w_fresh_month,
            completion: self.score_w_completion,
            jitter: self.score_jitter,
        }
    }

    pub fn cache_ttls(&self) -> CacheTtls {
        CacheTtls {
            short: self.cache_ttl_short,
            medium: self.cache_ttl_medium,
            long: self.cache_ttl_long,
            very_long: self.cache_ttl_very_long,
        }
    }
}
