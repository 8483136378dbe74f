use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// Everything a client or the pipeline can report
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    VideoStart,
    VideoEnd,
    VideoPause,
    VideoResume,
    SwipeLeft,
    SwipeRight,
    TapEpisode,
    Like,
    Share,
    AppOpen,
    AppClose,
    SessionStart,
    SessionEnd,
    ContentView,
    Search,
    Error,
    BufferStart,
    BufferEnd,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventCategory {
    UserInteraction,
    VideoPlayback,
    Navigation,
    Engagement,
    Performance,
}

impl EventType {
    /// Default category for this event kind
    pub fn category(self) -> EventCategory {
        use EventType::*;
        match self {
            VideoStart | VideoEnd | VideoPause | VideoResume => EventCategory::VideoPlayback,
            SwipeLeft | SwipeRight | TapEpisode => EventCategory::UserInteraction,
            Like | Share => EventCategory::Engagement,
            AppOpen | AppClose | SessionStart | SessionEnd | ContentView | Search => {
                EventCategory::Navigation
            }
            Error | BufferStart | BufferEnd => EventCategory::Performance,
        }
    }
}

/// One analytics emission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyticsEvent {
    pub user_id: Option<String>,
    pub event_type: EventType,
    pub category: EventCategory,
    pub content_id: Option<String>,
    pub episode_id: Option<String>,
    pub session_id: Option<String>,
    #[serde(default)]
    pub event_data: serde_json::Value,
    pub device_info: Option<serde_json::Value>,
    pub location: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnalyticsEvent {
    pub fn of(event_type: EventType) -> Self {
        Self {
            user_id: None,
            event_type,
            category: event_type.category(),
            content_id: None,
            episode_id: None,
            session_id: None,
            event_data: serde_json::Value::Null,
            device_info: None,
            location: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: Option<&str>) -> Self {
        self.user_id = user_id.map(str::to_string);
        self
    }

    pub fn content(mut self, content_id: &str) -> Self {
        self.content_id = Some(content_id.to_string());
        self
    }

    pub fn episode(mut self, episode_id: &str) -> Self {
        self.episode_id = Some(episode_id.to_string());
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.event_data = data;
        self
    }
}

/// Destination for drained analytics events
pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &AnalyticsEvent);
}

/// Production sink: structured log lines, picked up by the ingestion side
#[derive(Default)]
pub struct LogSink;

impl AnalyticsSink for LogSink {
    fn record(&self, event: &AnalyticsEvent) {
        tracing::info!(
            target: "analytics",
            event = ?event.event_type,
            category = ?event.category,
            user_id = event.user_id.as_deref().unwrap_or("anon"),
            content_id = event.content_id.as_deref().unwrap_or(""),
            "analytics event"
        );
    }
}

/// Test sink that keeps every event for assertions
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<AnalyticsEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<AnalyticsEvent> {
        self.events.lock().expect("sink lock poisoned").clone()
    }
}

impl AnalyticsSink for RecordingSink {
    fn record(&self, event: &AnalyticsEvent) {
        self.events
            .lock()
            .expect("sink lock poisoned")
            .push(event.clone());
    }
}

/// Non-blocking tracker handed to every service
///
/// `track` enqueues and returns immediately; a background task drains the
/// channel into the sink so analytics can never stall or fail a request.
#[derive(Clone)]
pub struct AnalyticsHandle {
    tx: mpsc::UnboundedSender<AnalyticsEvent>,
}

/// Handle for flushing the dispatcher on shutdown
pub struct AnalyticsWorkerHandle {
    shutdown_tx: mpsc::Sender<()>,
}

impl AnalyticsWorkerHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        tracing::info!("Analytics dispatcher shutdown signal sent");
    }
}

impl AnalyticsHandle {
    /// Spawns the dispatcher task draining into `sink`
    pub fn spawn(sink: Arc<dyn AnalyticsSink>) -> (Self, AnalyticsWorkerHandle) {
        let (tx, mut rx) = mpsc::unbounded_channel::<AnalyticsEvent>();
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);

        tokio::spawn(async move {
            tracing::info!("Analytics dispatcher started");
            loop {
                tokio::select! {
                    Some(event) = rx.recv() => sink.record(&event),
                    _ = shutdown_rx.recv() => {
                        rx.close();
                        let mut flushed = 0usize;
                        while let Some(event) = rx.recv().await {
                            sink.record(&event);
                            flushed += 1;
                        }
                        tracing::info!(flushed, "Analytics dispatcher stopped");
                        break;
                    }
                }
            }
        });

        (Self { tx }, AnalyticsWorkerHandle { shutdown_tx })
    }

    /// Fire-and-forget; a closed channel is logged and absorbed
    pub fn track(&self, event: AnalyticsEvent) {
        if self.tx.send(event).is_err() {
            tracing::warn!("Analytics channel closed, event dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_mapping() {
        assert_eq!(
            EventType::VideoStart.category(),
            EventCategory::VideoPlayback
        );
        assert_eq!(EventType::Like.category(), EventCategory::Engagement);
        assert_eq!(EventType::Search.category(), EventCategory::Navigation);
        assert_eq!(EventType::BufferStart.category(), EventCategory::Performance);
        assert_eq!(
            EventType::SwipeRight.category(),
            EventCategory::UserInteraction
        );
    }

    #[test]
    fn test_event_type_wire_format() {
        assert_eq!(
            serde_json::to_string(&EventType::ContentView).unwrap(),
            "\"content_view\""
        );
    }

    #[tokio::test]
    async fn test_events_reach_sink() {
        let sink = Arc::new(RecordingSink::default());
        let (handle, worker) = AnalyticsHandle::spawn(sink.clone());

        handle.track(AnalyticsEvent::of(EventType::ContentView).user(Some("u1")));
        handle.track(AnalyticsEvent::of(EventType::Search));

        // Shutdown flushes the queue before the task exits
        worker.shutdown().await;
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, EventType::ContentView);
        assert_eq!(events[0].user_id.as_deref(), Some("u1"));
    }
}
