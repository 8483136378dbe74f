use serde::{Deserialize, Serialize};

/// One encoded rendition of an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityVariant {
    /// Resolution label: `480p`, `720p`, `1080p`, `4k`
    pub resolution: String,
    pub url: String,
    #[serde(default)]
    pub file_size: u64,
    #[serde(default)]
    pub bitrate: u32,
}

/// Client-side buffering hints attached to an episode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamingOptions {
    pub preload_enabled: bool,
    /// Seconds of media the client should preload
    pub preload_duration: u32,
    pub chunk_size: u32,
    pub adaptive_bitrate: bool,
}

impl Default for StreamingOptions {
    fn default() -> Self {
        Self {
            preload_enabled: true,
            preload_duration: 10,
            chunk_size: 1024 * 1024,
            adaptive_bitrate: true,
        }
    }
}

/// Per-episode playback counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EpisodeAnalytics {
    pub total_views: u64,
    pub total_likes: u64,
    pub total_shares: u64,
    /// Seconds watched across all users
    pub total_watch_time: u64,
    /// Fraction of views that reached completion, in `[0, 100]`
    pub completion_rate: f64,
    /// Positions (seconds) where viewers most often abandon playback
    pub drop_off_points: Vec<u32>,
}

/// A single playable episode of a title
///
/// `(season_number, episode_number)` is unique within a title and defines
/// playback sequencing; adjacency is always computed from that pair rather
/// than stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Episode {
    pub id: String,
    pub title_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: String,
    /// Duration in seconds
    pub duration: u32,
    #[serde(default)]
    pub thumbnail_url: String,
    /// Master playback URL; used when no variant matches a quality request
    #[serde(default)]
    pub video_url: String,
    #[serde(default)]
    pub quality_variants: Vec<QualityVariant>,
    pub status: super::TitleStatus,
    #[serde(default)]
    pub streaming_options: StreamingOptions,
    #[serde(default)]
    pub analytics: EpisodeAnalytics,
}

impl Episode {
    /// Sequencing key within the parent title
    pub fn ordinal(&self) -> (u32, u32) {
        (self.season_number, self.episode_number)
    }

    /// Variant with the given resolution label, if present
    pub fn variant(&self, resolution: &str) -> Option<&QualityVariant> {
        self.quality_variants
            .iter()
            .find(|v| v.resolution.eq_ignore_ascii_case(resolution))
    }

    /// Lowest-bandwidth URL for warm-up buffering
    ///
    /// Prefers 480p, falls back to the lowest resolution present, then to
    /// the master URL.
    pub fn prefetch_url(&self) -> &str {
        if let Some(v) = self.variant("480p") {
            return &v.url;
        }
        self.quality_variants
            .iter()
            .min_by_key(|v| resolution_rank(&v.resolution))
            .map(|v| v.url.as_str())
            .unwrap_or(&self.video_url)
    }

    /// Default streaming URL: 720p if present, else the first variant,
    /// else the master URL
    pub fn stream_url(&self) -> &str {
        if let Some(v) = self.variant("720p") {
            return &v.url;
        }
        self.quality_variants
            .first()
            .map(|v| v.url.as_str())
            .unwrap_or(&self.video_url)
    }
}

/// Orders resolution labels from lowest to highest bandwidth
fn resolution_rank(resolution: &str) -> u32 {
    match resolution.to_ascii_lowercase().as_str() {
        "240p" => 0,
        "360p" => 1,
        "480p" => 2,
        "720p" => 3,
        "1080p" => 4,
        "4k" | "2160p" => 5,
        _ => u32::MAX,
    }
}

/// Compact episode projection embedded in feed cards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EpisodeSummary {
    pub id: String,
    pub title_id: String,
    pub season_number: u32,
    pub episode_number: u32,
    pub title: String,
    pub duration: u32,
    pub thumbnail_url: String,
    pub stream_url: String,
}

impl From<&Episode> for EpisodeSummary {
    fn from(e: &Episode) -> Self {
        Self {
            id: e.id.clone(),
            title_id: e.title_id.clone(),
            season_number: e.season_number,
            episode_number: e.episode_number,
            title: e.title.clone(),
            duration: e.duration,
            thumbnail_url: e.thumbnail_url.clone(),
            stream_url: e.stream_url().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TitleStatus;

    fn episode_with_variants(resolutions: &[&str]) -> Episode {
        Episode {
            id: "e1".into(),
            title_id: "t1".into(),
            season_number: 1,
            episode_number: 1,
            title: "Pilot".into(),
            duration: 600,
            thumbnail_url: String::new(),
            video_url: "https://cdn.example/master.m3u8".into(),
            quality_variants: resolutions
                .iter()
                .map(|r| QualityVariant {
                    resolution: r.to_string(),
                    url: format!("https://cdn.example/{r}.m3u8"),
                    file_size: 0,
                    bitrate: 0,
                })
                .collect(),
            status: TitleStatus::Published,
            streaming_options: StreamingOptions::default(),
            analytics: EpisodeAnalytics::default(),
        }
    }

    #[test]
    fn test_prefetch_url_prefers_480p() {
        let e = episode_with_variants(&["1080p", "480p", "720p"]);
        assert_eq!(e.prefetch_url(), "https://cdn.example/480p.m3u8");
    }

    #[test]
    fn test_prefetch_url_falls_back_to_lowest() {
        let e = episode_with_variants(&["1080p", "720p"]);
        assert_eq!(e.prefetch_url(), "https://cdn.example/720p.m3u8");
    }

    #[test]
    fn test_prefetch_url_falls_back_to_master() {
        let e = episode_with_variants(&[]);
        assert_eq!(e.prefetch_url(), "https://cdn.example/master.m3u8");
    }

    #[test]
    fn test_stream_url_prefers_720p() {
        let e = episode_with_variants(&["480p", "720p", "1080p"]);
        assert_eq!(e.stream_url(), "https://cdn.example/720p.m3u8");
    }

    #[test]
    fn test_stream_url_falls_back_to_first_variant() {
        let e = episode_with_variants(&["1080p", "480p"]);
        assert_eq!(e.stream_url(), "https://cdn.example/1080p.m3u8");
    }

    #[test]
    fn test_ordinal_ordering() {
        let mut a = episode_with_variants(&[]);
        a.season_number = 2;
        a.episode_number = 1;
        let b = episode_with_variants(&[]);
        assert!(b.ordinal() < a.ordinal());
    }
}
