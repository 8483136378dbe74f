use serde::{Deserialize, Serialize};

/// How aggressively the client may spend bandwidth on this user's behalf
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DataUsage {
    Low,
    Medium,
    High,
}

impl Default for DataUsage {
    fn default() -> Self {
        DataUsage::Medium
    }
}

/// Viewing preferences, usually collected during onboarding
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserPreferences {
    pub preferred_genres: Vec<String>,
    pub preferred_languages: Vec<String>,
    pub auto_play: bool,
    pub data_usage: DataUsage,
}

impl Default for UserPreferences {
    fn default() -> Self {
        Self {
            preferred_genres: Vec::new(),
            preferred_languages: Vec::new(),
            auto_play: true,
            data_usage: DataUsage::default(),
        }
    }
}

impl UserPreferences {
    /// True when neither genre nor language preferences are set, in which
    /// case the personalized pool drops its preference filters
    pub fn is_empty(&self) -> bool {
        self.preferred_genres.is_empty() && self.preferred_languages.is_empty()
    }
}

/// Per-genre view counter used for favorite-genre reporting
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenreCount {
    pub genre: String,
    pub count: u64,
}

/// Rolled-up viewing statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserAnalytics {
    /// Seconds watched across all sessions
    pub total_watch_time: u64,
    pub videos_watched: u64,
    /// Seconds
    pub average_session_duration: f64,
    pub favorite_genres: Vec<GenreCount>,
}

/// Swipe and reaction counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UserEngagement {
    pub likes: u64,
    pub shares: u64,
    pub swipe_right: u64,
    pub swipe_left: u64,
    /// Mean completion percentage across watched videos, in `[0, 100]`
    pub average_video_completion: f64,
}

/// A viewer, typically anonymous and identified by a stable device-bound id
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub preferences: UserPreferences,
    #[serde(default)]
    pub analytics: UserAnalytics,
    #[serde(default)]
    pub engagement: UserEngagement,
    #[serde(default)]
    pub is_premium: bool,
}

impl User {
    pub fn anonymous(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            preferences: UserPreferences::default(),
            analytics: UserAnalytics::default(),
            engagement: UserEngagement::default(),
            is_premium: false,
        }
    }
}
