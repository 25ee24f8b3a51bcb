//! Broadcast stream of lifecycle events.
//!
//! Every event has a stable `domain:action` name. Delivery is best-effort:
//! a lagging subscriber loses the oldest events, the scheduler never blocks.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::error::HydrationError;
use crate::runner::SliceReport;
use crate::types::{BoundaryId, Priority, TriggerKind};

/// Buffered events per subscriber before the oldest are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HydrationEvent {
    Registered {
        boundary_id: BoundaryId,
        priority: Priority,
        trigger: TriggerKind,
    },
    Started {
        boundary_id: BoundaryId,
        forced: bool,
    },
    Complete {
        boundary_id: BoundaryId,
        #[serde(serialize_with = "crate::metrics::millis::serialize")]
        duration: Duration,
    },
    Failed {
        boundary_id: BoundaryId,
        #[serde(serialize_with = "serialize_error")]
        error: HydrationError,
    },
    Cancelled {
        boundary_id: BoundaryId,
    },
    VisibilityEnter {
        boundary_id: BoundaryId,
        ratio: f64,
    },
    VisibilityExit {
        boundary_id: BoundaryId,
    },
    InteractionReplayed {
        boundary_id: BoundaryId,
        kind: String,
    },
    SliceComplete(SliceReport),
    Paused,
    Resumed,
}

fn serialize_error<S: serde::Serializer>(e: &HydrationError, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(e)
}

impl HydrationEvent {
    /// Stable event name.
    pub fn name(&self) -> &'static str {
        match self {
            HydrationEvent::Registered { .. } => "hydration:registered",
            HydrationEvent::Started { .. } => "hydration:start",
            HydrationEvent::Complete { .. } => "hydration:complete",
            HydrationEvent::Failed { .. } => "hydration:error",
            HydrationEvent::Cancelled { .. } => "hydration:cancelled",
            HydrationEvent::VisibilityEnter { .. } => "visibility:enter",
            HydrationEvent::VisibilityExit { .. } => "visibility:exit",
            HydrationEvent::InteractionReplayed { .. } => "interaction:replayed",
            HydrationEvent::SliceComplete(_) => "scheduler:slice",
            HydrationEvent::Paused => "scheduler:paused",
            HydrationEvent::Resumed => "scheduler:resumed",
        }
    }

    /// Boundary the event concerns, if any.
    pub fn boundary_id(&self) -> Option<&BoundaryId> {
        match self {
            HydrationEvent::Registered { boundary_id, .. }
            | HydrationEvent::Started { boundary_id, .. }
            | HydrationEvent::Complete { boundary_id, .. }
            | HydrationEvent::Failed { boundary_id, .. }
            | HydrationEvent::Cancelled { boundary_id }
            | HydrationEvent::VisibilityEnter { boundary_id, .. }
            | HydrationEvent::VisibilityExit { boundary_id }
            | HydrationEvent::InteractionReplayed { boundary_id, .. } => Some(boundary_id),
            HydrationEvent::SliceComplete(_)
            | HydrationEvent::Paused
            | HydrationEvent::Resumed => None,
        }
    }
}

#[derive(Debug)]
pub(crate) struct EventBus {
    tx: broadcast::Sender<HydrationEvent>,
}

impl EventBus {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn emit(&self, event: HydrationEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<HydrationEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_stable() {
        let id = BoundaryId::from("hero");
        let complete = HydrationEvent::Complete {
            boundary_id: id.clone(),
            duration: Duration::from_millis(3),
        };
        assert_eq!(complete.name(), "hydration:complete");
        let cancelled = HydrationEvent::Cancelled {
            boundary_id: id.clone(),
        };
        assert_eq!(cancelled.name(), "hydration:cancelled");
        assert_eq!(HydrationEvent::Paused.name(), "scheduler:paused");
        assert_eq!(HydrationEvent::VisibilityExit { boundary_id: id }.name(), "visibility:exit");
    }

    #[test]
    fn serializes_with_tag_and_millis() {
        let event = HydrationEvent::Complete {
            boundary_id: BoundaryId::from("nav"),
            duration: Duration::from_millis(42),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "complete");
        assert_eq!(json["boundary_id"], "nav");
        assert_eq!(json["duration"], 42.0);

        let err = HydrationEvent::Failed {
            boundary_id: BoundaryId::from("nav"),
            error: HydrationError::TaskTimeout {
                boundary_id: BoundaryId::from("nav"),
                timeout: Duration::from_millis(5),
            },
        };
        let json = serde_json::to_value(&err).unwrap();
        assert!(json["error"].as_str().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn bus_delivers_to_subscribers() {
        let bus = EventBus::new();
        bus.emit(HydrationEvent::Paused);
        let mut rx = bus.subscribe();
        bus.emit(HydrationEvent::Resumed);
        assert_eq!(rx.recv().await.unwrap().name(), "scheduler:resumed");
    }
}
