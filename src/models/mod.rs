mod episode;
mod feed;
mod title;
mod user;
mod watch;

pub use episode::{Episode, EpisodeAnalytics, EpisodeSummary, QualityVariant, StreamingOptions};
pub use feed::{Card, FeedPage, FeedSource, PrefetchBlock, PrefetchEpisode, ProgressOverlay};
pub use title::{FeedSettings, Title, TitleAnalytics, TitleStatus, TitleSummary, TitleType};
pub use user::{DataUsage, GenreCount, User, UserAnalytics, UserEngagement, UserPreferences};
pub use watch::{
    SessionInfo, WatchEngagement, WatchRecord, WatchStatus, DEFAULT_COMPLETION_THRESHOLD,
};
