//! Event types for the signage agent event system
//!
//! Provides the shared event enum and the broadcast `EventBus`. Sync agents and
//! download workers publish onto the bus; the schedule resolver and the
//! (external) playback layer subscribe.

mod file_types;
mod schedule_types;

pub use file_types::{FileKind, NeededFile};
pub use schedule_types::{DisplayStatus, LayoutRef, OverlayRef};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Agent event types
///
/// Events are broadcast via EventBus and serialize with a `type` tag so the
/// playback layer can consume them over any transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// Resolved layout set lost a previously shown item; playback must switch
    ScheduleChanged {
        layouts: Vec<LayoutRef>,
        timestamp: DateTime<Utc>,
    },

    /// Resolved state updated; current playback undisturbed
    ScheduleRefreshed {
        layouts: Vec<LayoutRef>,
        timestamp: DateTime<Utc>,
    },

    /// Overlay set changed or an overlay needs recreating
    OverlaysChanged {
        overlays: Vec<OverlayRef>,
        timestamp: DateTime<Utc>,
    },

    /// Interrupt layout should pre-empt normal playback now
    InterruptNow {
        layout_id: i64,
        schedule_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// Interrupt pacing is ahead of target; hold pending interrupts
    InterruptPausePending { timestamp: DateTime<Utc> },

    /// No interrupt items are scheduled any more
    InterruptEnd { timestamp: DateTime<Utc> },

    /// A scheduled command entered its execution window
    CommandDue {
        code: String,
        schedule_id: i64,
        timestamp: DateTime<Utc>,
    },

    /// A schedule manifest was fetched and parsed
    ScheduleManifestUpdated {
        checksum: String,
        timestamp: DateTime<Utc>,
    },

    /// A required-files manifest was fetched and diffed
    RequiredFilesUpdated {
        checksum: String,
        queued: usize,
        timestamp: DateTime<Utc>,
    },

    /// A required file finished downloading and verified
    FileCompleted {
        id: String,
        kind: FileKind,
        timestamp: DateTime<Utc>,
    },

    /// Some component needs a file that is not in the library yet
    FileNeeded { file: NeededFile },

    /// Every required file in the current manifest is complete
    FilesProvisioned {
        total: usize,
        timestamp: DateTime<Utc>,
    },

    /// Widget data payload refreshed and written
    WidgetDataUpdated {
        widget_id: String,
        timestamp: DateTime<Utc>,
    },

    /// Registration status reported by the CMS
    RegistrationChanged {
        status: DisplayStatus,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// A sync agent cycle failed
    AgentFailure {
        agent: String,
        error: String,
        consecutive_failures: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Broadcast bus shared by every component
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AgentEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lag rather than block publishers; events beyond the
    /// capacity are dropped for that subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<AgentEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AgentEvent,
    ) -> Result<usize, broadcast::error::SendError<AgentEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: AgentEvent) {
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

    #[test]
    fn test_emit_without_subscribers_errors() {
        let bus = EventBus::new(8);
        let result = bus.emit(AgentEvent::InterruptEnd {
            timestamp: Utc::now(),
        });
        assert!(result.is_err());
        assert_eq!(bus.capacity(), 8);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        bus.emit_lossy(AgentEvent::FileCompleted {
            id: "10".to_string(),
            kind: FileKind::Layout,
            timestamp: Utc::now(),
        });

        match rx.recv().await.unwrap() {
            AgentEvent::FileCompleted { id, kind, .. } => {
                assert_eq!(id, "10");
                assert_eq!(kind, FileKind::Layout);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(AgentEvent::CommandDue {
            code: "reboot".to_string(),
            schedule_id: 4,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(json["type"], "CommandDue");
        assert_eq!(json["code"], "reboot");
    }

    #[test]
    fn test_file_kind_parse() {
        assert_eq!(FileKind::parse("Layout"), Some(FileKind::Layout));
        assert_eq!(FileKind::parse("resource"), Some(FileKind::Resource));
        assert_eq!(FileKind::parse("blob"), None);
        assert_eq!(FileKind::Widget.to_string(), "widget");
    }
}
