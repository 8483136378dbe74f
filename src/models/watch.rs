use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Completion threshold: a record at or past this percentage counts as a
/// finished view
pub const DEFAULT_COMPLETION_THRESHOLD: f64 = 80.0;

/// Playback state of a watch record
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum WatchStatus {
    Watching,
    Completed,
    Dropped,
    Paused,
}

/// Session bookkeeping for one `(user, episode)` pair
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub started_at: DateTime<Utc>,
    pub last_watched_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub total_sessions: u64,
    /// Seconds, running mean over all sessions
    pub average_session_length: f64,
}

/// Interaction counters, monotonic and commutative under batched updates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WatchEngagement {
    /// Seconds of active playback in the most recent session
    pub session_duration: u64,
    pub pause_count: u64,
    pub seek_count: u64,
    /// Milliseconds spent buffering
    pub buffering_time: u64,
}

/// Progress state for one user on one episode
///
/// At most one record exists per `(user_id, episode_id)`. `current_position`
/// never decreases; completion is stamped exactly once.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRecord {
    pub user_id: String,
    pub title_id: String,
    pub episode_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    /// Seconds into the episode, monotonic non-decreasing
    pub current_position: f64,
    /// Seconds, copied from the episode at creation
    pub total_duration: f64,
    /// `100 * current_position / total_duration`, clamped to `[0, 100]`
    pub percentage_watched: f64,
    pub is_completed: bool,
    pub status: WatchStatus,
    #[serde(default)]
    pub watched_via: String,
    pub rating: Option<u8>,
    #[serde(default)]
    pub liked: bool,
    #[serde(default)]
    pub shared: bool,
    pub session_info: SessionInfo,
    #[serde(default)]
    pub engagement: WatchEngagement,
}

impl WatchRecord {
    /// Fresh record at position zero
    pub fn new(
        user_id: impl Into<String>,
        title_id: impl Into<String>,
        episode_id: impl Into<String>,
        ordinal: (u32, u32),
        total_duration: f64,
        watched_via: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            title_id: title_id.into(),
            episode_id: episode_id.into(),
            season_number: ordinal.0,
            episode_number: ordinal.1,
            current_position: 0.0,
            total_duration,
            percentage_watched: 0.0,
            is_completed: false,
            status: WatchStatus::Watching,
            watched_via: watched_via.into(),
            rating: None,
            liked: false,
            shared: false,
            session_info: SessionInfo {
                started_at: now,
                last_watched_at: now,
                completed_at: None,
                total_sessions: 1,
                average_session_length: 0.0,
            },
            engagement: WatchEngagement::default(),
        }
    }

    /// Advances playback position, enforcing monotonicity and the completion
    /// threshold
    ///
    /// A position below the current one is ignored. Crossing the threshold
    /// stamps `completed_at` once; later calls leave the stamp untouched.
    pub fn apply_position(&mut self, position: f64, threshold: f64, now: DateTime<Utc>) {
        let clamped = position.clamp(0.0, self.total_duration);
        if clamped > self.current_position {
            self.current_position = clamped;
        }
        self.percentage_watched = if self.total_duration > 0.0 {
            (100.0 * self.current_position / self.total_duration).clamp(0.0, 100.0)
        } else {
            0.0
        };
        self.session_info.last_watched_at = now;

        if self.percentage_watched >= threshold && !self.is_completed {
            self.is_completed = true;
            self.status = WatchStatus::Completed;
            self.session_info.completed_at = Some(now);
        }
    }

    /// Folds one more session into the running average session length
    pub fn record_session(&mut self, session_seconds: u64) {
        let n = self.session_info.total_sessions as f64;
        self.session_info.average_session_length =
            (self.session_info.average_session_length * n + session_seconds as f64) / (n + 1.0);
        self.session_info.total_sessions += 1;
        self.engagement.session_duration = session_seconds;
    }

    /// Whether the record falls inside the continue-watching band
    pub fn in_continue_band(&self, min_pct: f64, max_pct: f64) -> bool {
        matches!(self.status, WatchStatus::Watching | WatchStatus::Paused)
            && self.percentage_watched > min_pct
            && self.percentage_watched < max_pct
    }
}
