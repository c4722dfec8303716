//! Event types for the Vinylia event system
//!
//! Provides shared event definitions and the EventBus used to surface
//! synchronizer activity (including user-facing notifications) to views.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::models::StoryId;

/// Vinylia sync event types
///
/// Events are broadcast via EventBus and can be serialized for logging or
/// forwarding to a UI shell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SyncEvent {
    /// Membership populated from the backend at session start
    MembershipLoaded {
        /// Number of stories the user has resonated with
        count: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Optimistic resonance write applied to the local cache
    ///
    /// Triggers:
    /// - Story cards: re-render the resonance button immediately
    ResonanceApplied {
        story_id: StoryId,
        /// Membership value written optimistically
        resonated: bool,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Remote call succeeded and the cache was replaced with server state
    ResonanceReconciled {
        story_id: StoryId,
        /// Whether the server reports the story as resonated after the refresh
        resonated: bool,
        /// Fresh aggregate count for the story, when it could be fetched
        resonance_count: Option<u64>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Remote call failed and the optimistic write was rolled back
    ///
    /// This is the transient user-facing notification; emitted exactly once
    /// per failed toggle.
    ResonanceFailed {
        story_id: StoryId,
        /// Human-readable reason
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Toggle refused before touching the cache (stale input or in flight)
    MutationRejected {
        story_id: StoryId,
        reason: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Story text persisted by the auto-saver
    StoryAutosaved {
        story_id: StoryId,
        /// Length of the saved content in characters
        length: usize,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Story auto-save failed; the text stays editable and unsaved
    StoryAutosaveFailed {
        story_id: StoryId,
        message: String,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Session ended; membership discarded
    SessionEnded {
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl SyncEvent {
    /// Get event type as string for filtering
    pub fn event_type(&self) -> &str {
        match self {
            SyncEvent::MembershipLoaded { .. } => "MembershipLoaded",
            SyncEvent::ResonanceApplied { .. } => "ResonanceApplied",
            SyncEvent::ResonanceReconciled { .. } => "ResonanceReconciled",
            SyncEvent::ResonanceFailed { .. } => "ResonanceFailed",
            SyncEvent::MutationRejected { .. } => "MutationRejected",
            SyncEvent::StoryAutosaved { .. } => "StoryAutosaved",
            SyncEvent::StoryAutosaveFailed { .. } => "StoryAutosaveFailed",
            SyncEvent::SessionEnded { .. } => "SessionEnded",
        }
    }

    /// Story the event concerns, if any
    pub fn story_id(&self) -> Option<&str> {
        match self {
            SyncEvent::ResonanceApplied { story_id, .. }
            | SyncEvent::ResonanceReconciled { story_id, .. }
            | SyncEvent::ResonanceFailed { story_id, .. }
            | SyncEvent::MutationRejected { story_id, .. }
            | SyncEvent::StoryAutosaved { story_id, .. }
            | SyncEvent::StoryAutosaveFailed { story_id, .. } => Some(story_id),
            SyncEvent::MembershipLoaded { .. } | SyncEvent::SessionEnded { .. } => None,
        }
    }

    /// Whether a view should show this as a transient notification
    pub fn is_notification(&self) -> bool {
        matches!(self, SyncEvent::ResonanceFailed { .. })
    }
}

// ========================================
// EventBus Implementation
// ========================================

/// Central event distribution bus for synchronizer events
///
/// The EventBus uses tokio::broadcast internally, providing:
/// - Non-blocking publish (slow subscribers don't block producers)
/// - Multiple concurrent subscribers
/// - Automatic cleanup when subscribers drop
///
/// # Examples
///
/// ```
/// use vinylia_common::events::{EventBus, SyncEvent};
/// use std::sync::Arc;
///
/// let event_bus = Arc::new(EventBus::new(100));
/// let mut rx = event_bus.subscribe();
///
/// event_bus.emit_lossy(SyncEvent::SessionEnded {
///     timestamp: chrono::Utc::now(),
/// });
///
/// assert_eq!(rx.try_recv().unwrap().event_type(), "SessionEnded");
/// ```
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(&self, event: SyncEvent) -> Result<usize, broadcast::error::SendError<SyncEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(story_id: &str) -> SyncEvent {
        SyncEvent::ResonanceFailed {
            story_id: story_id.to_string(),
            message: "Network error: connection reset".to_string(),
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_emit_without_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(failed("s1")).is_err());
        bus.emit_lossy(failed("s1"));
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        assert_eq!(bus.emit(failed("s1")).unwrap(), 2);

        assert_eq!(rx1.try_recv().unwrap().story_id(), Some("s1"));
        assert_eq!(rx2.try_recv().unwrap().event_type(), "ResonanceFailed");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let value = serde_json::to_value(failed("s9")).unwrap();
        assert_eq!(value["type"], "ResonanceFailed");
        assert_eq!(value["story_id"], "s9");

        let back: SyncEvent = serde_json::from_value(value).unwrap();
        assert!(back.is_notification());
    }

    #[test]
    fn test_session_events_have_no_story() {
        let event = SyncEvent::SessionEnded { timestamp: chrono::Utc::now() };
        assert_eq!(event.story_id(), None);
        assert!(!event.is_notification());
    }
}
