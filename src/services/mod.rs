pub mod analytics;
pub mod feed;
pub mod pools;
pub mod prefetch;
pub mod progress;
pub mod ranking;

pub use analytics::{AnalyticsHandle, AnalyticsSink, AnalyticsWorkerHandle, LogSink};
pub use feed::{FeedOptions, FeedParams, FeedService, SearchParams};
pub use prefetch::{PrefetchConfig, PrefetchPlanner};
pub use progress::{EngagementDelta, ProgressService};
