//! Workflow event types and the broadcast event bus
//!
//! Every workflow status transition is published on the [`EventBus`] so that
//! status consumers (logs, push channels, tests) can follow a run without
//! polling the workflow store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Import workflow event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ImportEvent {
    /// A run was registered and is about to resolve its configuration
    WorkflowStarted {
        workflow_id: Uuid,
        domain_type: String,
        domain_name: String,
        cob_date: String,
        timestamp: DateTime<Utc>,
    },

    /// The run entered a new phase
    StepChanged {
        workflow_id: Uuid,
        old_status: String,
        new_status: String,
        timestamp: DateTime<Utc>,
    },

    /// The run reached COMPLETED
    WorkflowCompleted {
        workflow_id: Uuid,
        message: String,
        timestamp: DateTime<Utc>,
    },

    /// The run reached FAILED
    WorkflowFailed {
        workflow_id: Uuid,
        step: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },

    /// The run reached CANCELLED
    WorkflowCancelled {
        workflow_id: Uuid,
        step: Option<String>,
        timestamp: DateTime<Utc>,
    },
}

impl ImportEvent {
    /// Workflow this event belongs to
    pub fn workflow_id(&self) -> Uuid {
        match self {
            ImportEvent::WorkflowStarted { workflow_id, .. }
            | ImportEvent::StepChanged { workflow_id, .. }
            | ImportEvent::WorkflowCompleted { workflow_id, .. }
            | ImportEvent::WorkflowFailed { workflow_id, .. }
            | ImportEvent::WorkflowCancelled { workflow_id, .. } => *workflow_id,
        }
    }
}

/// Broadcast bus for [`ImportEvent`]s
///
/// Cloning the bus shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ImportEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with specified channel capacity
    ///
    /// Slow subscribers lose the oldest events once `capacity` is exceeded.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ImportEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ImportEvent,
    ) -> Result<usize, broadcast::error::SendError<ImportEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: ImportEvent) {
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

    fn completed(id: Uuid) -> ImportEvent {
        ImportEvent::WorkflowCompleted {
            workflow_id: id,
            message: "done".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_error() {
        let bus = EventBus::new(4);
        assert!(bus.emit(completed(Uuid::new_v4())).is_err());
    }

    #[test]
    fn test_emit_lossy_does_not_panic_on_full_channel() {
        let bus = EventBus::new(2);
        let _rx = bus.subscribe();
        for _ in 0..10 {
            bus.emit_lossy(completed(Uuid::new_v4()));
        }
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(bus.capacity(), 2);
    }

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        assert_eq!(bus.emit(completed(id)).unwrap(), 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.workflow_id(), id);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let json = serde_json::to_value(completed(Uuid::nil())).unwrap();
        assert_eq!(json["type"], "WorkflowCompleted");
        assert_eq!(json["message"], "done");
    }
}
