use serde::{Deserialize, Serialize};

use super::{EpisodeSummary, TitleSummary};

/// Which candidate pool produced a card
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FeedSource {
    Personalized,
    Trending,
    Popular,
    Fresh,
}

/// Progress overlay for an episode the user has already started
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressOverlay {
    pub current_position: f64,
    pub percentage_watched: f64,
    pub is_completed: bool,
}

/// One upcoming episode inside a prefetch plan
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrefetchEpisode {
    pub episode_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: String,
    /// Seconds
    pub duration: u32,
    /// Lowest-bandwidth rendition for warm-up buffering
    pub prefetch_url: String,
    /// Rendition the player switches to once playback starts
    pub stream_url: String,
    /// Descending from the episode nearest the current one
    pub priority: u32,
    pub progress: Option<ProgressOverlay>,
}

/// Bandwidth plan for the next few episodes of one card
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PrefetchBlock {
    pub episodes: Vec<PrefetchEpisode>,
    /// Quality tier the estimate was computed against
    pub quality: String,
    /// Estimated transfer cost of the whole block, in megabytes
    pub estimated_total_mb: f64,
}

/// One item of a feed page
///
/// The algorithm metadata (`_feedSource`, `_algorithmScore`, `_prefetch`)
/// lives here rather than on the title: it describes this placement, not
/// the catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub title: TitleSummary,
    pub first_episode: EpisodeSummary,
    #[serde(rename = "_feedSource")]
    pub feed_source: FeedSource,
    #[serde(rename = "_algorithmScore")]
    pub algorithm_score: f64,
    #[serde(rename = "_prefetch", skip_serializing_if = "Option::is_none")]
    pub prefetch: Option<PrefetchBlock>,
}

/// Derived, never persisted: an ordered window of cards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedPage {
    pub cards: Vec<Card>,
    pub limit: usize,
    pub offset: usize,
    /// Whether another page likely exists past this one
    pub has_more: bool,
}
