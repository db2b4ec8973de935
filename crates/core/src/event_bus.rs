//! Notification bus — trait for emitting campaign lifecycle events to
//! live observers.
//!
//! Modules accept an `Arc<dyn NotificationSink>` and fire events without
//! awaiting delivery; the bus is strictly fire-and-forget.

use crate::types::{CampaignStatus, OptimizationRun, PerformanceSnapshot};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

/// Campaign lifecycle events observable from outside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Notification {
    StatusChange {
        campaign_id: Uuid,
        status: CampaignStatus,
        detail: Option<String>,
    },
    OptimizationRun {
        run: OptimizationRun,
    },
    PerformanceSnapshot {
        snapshot: PerformanceSnapshot,
    },
    CampaignUpdate {
        campaign_id: Uuid,
        fields: serde_json::Value,
    },
}

/// Trait for emitting lifecycle notifications. Implementations route
/// events to websockets, message queues, or webhooks.
pub trait NotificationSink: Send + Sync {
    fn emit(&self, event: Notification);
}

/// No-op sink for tests and headless deployments.
pub struct NoOpSink;

impl NotificationSink for NoOpSink {
    fn emit(&self, _event: Notification) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<Notification>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<Notification> {
        self.events.lock().expect("notification mutex poisoned").clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().expect("notification mutex poisoned").len()
    }

    pub fn count_status_changes(&self, status: CampaignStatus) -> usize {
        self.events
            .lock()
            .expect("notification mutex poisoned")
            .iter()
            .filter(|e| matches!(e, Notification::StatusChange { status: s, .. } if *s == status))
            .count()
    }

    pub fn clear(&self) {
        self.events.lock().expect("notification mutex poisoned").clear();
    }
}

impl NotificationSink for CaptureSink {
    fn emit(&self, event: Notification) {
        self.events.lock().expect("notification mutex poisoned").push(event);
    }
}

/// Convenience: create a no-op bus for modules that don't need one.
pub fn noop_sink() -> Arc<dyn NotificationSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::VideoMetrics;
    use chrono::Utc;

    #[test]
    fn test_capture_sink() {
        let sink = capture_sink();
        assert_eq!(sink.count(), 0);

        let campaign_id = Uuid::new_v4();
        sink.emit(Notification::StatusChange {
            campaign_id,
            status: CampaignStatus::Testing,
            detail: None,
        });
        sink.emit(Notification::PerformanceSnapshot {
            snapshot: PerformanceSnapshot {
                id: Uuid::new_v4(),
                campaign_id,
                variant_id: None,
                metrics: VideoMetrics::default(),
                captured_at: Utc::now(),
            },
        });

        assert_eq!(sink.count(), 2);
        assert_eq!(sink.count_status_changes(CampaignStatus::Testing), 1);
        assert_eq!(sink.count_status_changes(CampaignStatus::Settled), 0);

        sink.clear();
        assert_eq!(sink.count(), 0);
    }

    #[test]
    fn test_noop_sink() {
        let sink = noop_sink();
        // Should not panic
        sink.emit(Notification::CampaignUpdate {
            campaign_id: Uuid::new_v4(),
            fields: serde_json::json!({"iteration": 2}),
        });
    }
}
