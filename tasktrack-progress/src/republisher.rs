//! Status republisher
//!
//! After every persisted mutation the normalized status is published on the
//! progress exchange so task-owning services can mirror it without sharing a
//! database. Fire-and-forget: failures are logged by the publisher only.

use tasktrack_common::events::StatusChangedEvent;
use tasktrack_common::publisher::{EventPublisher, PublishOutcome};

use crate::db::ProgressRecord;

/// Queue name reported in side-channel metadata for status events
pub const DISPATCHER_QUEUE: &str = "progress.dispatcher.queue";

/// Publishes status-changed events for persisted progress rows
#[derive(Clone)]
pub struct StatusRepublisher {
    publisher: EventPublisher,
}

impl StatusRepublisher {
    /// `publisher` must target the progress exchange
    pub fn new(publisher: EventPublisher) -> Self {
        Self {
            publisher: publisher.with_queue_label(DISPATCHER_QUEUE),
        }
    }

    pub fn event_for(record: &ProgressRecord) -> StatusChangedEvent {
        StatusChangedEvent {
            task_id: record.task_id,
            status: record.status,
            progress: record.progress,
            user_id: record.user_id,
            task_type: record.task_type,
        }
    }

    pub async fn publish(&self, record: &ProgressRecord) -> PublishOutcome {
        let event = Self::event_for(record);
        self.publisher
            .publish(record.task_type.status_routing_key(), &event)
            .await
    }
}
