//! Notification events and the emitter that publishes them.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::lookup::Participant;

/// Default topic deadline notifications are published to.
pub const DEFAULT_NOTIFICATION_TOPIC: &str = "task-notifications";

/// Kinds of notification events. Only the deadline kinds are emitted by this
/// crate; the others are listed so downstream consumers share one vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
  DeadlineApproaching,
  DeadlineOverdue,
  TaskAssigned,
  TaskUpdated,
  TaskCompleted,
}

impl EventType {
  pub fn as_str(&self) -> &'static str {
    match self {
      EventType::DeadlineApproaching => "deadline_approaching",
      EventType::DeadlineOverdue => "deadline_overdue",
      EventType::TaskAssigned => "task_assigned",
      EventType::TaskUpdated => "task_updated",
      EventType::TaskCompleted => "task_completed",
    }
  }
}

impl fmt::Display for EventType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// An outbound message. Built per firing per recipient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationEvent {
  pub event_type: EventType,
  pub timestamp: DateTime<FixedOffset>,
  pub data: Map<String, Value>,
}

impl NotificationEvent {
  pub fn new(event_type: EventType, timestamp: DateTime<FixedOffset>) -> Self {
    Self {
      event_type,
      timestamp,
      data: Map::new(),
    }
  }

  /// Adds one entry to `data`.
  pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
    self.data.insert(key.to_string(), value.into());
    self
  }

  /// Copies the recipient's identity into `data`.
  pub fn for_participant(self, participant: &Participant) -> Self {
    self
      .with("user_id", participant.user_id.as_str())
      .with("user_name", participant.user_name.as_str())
      .with("user_email", participant.user_email.as_str())
      .with("user_role", participant.user_role.as_str())
      .with("department", participant.department.as_str())
  }
}

/// Delivers raw event bytes to the bus.
#[async_trait]
pub trait EventTransport: Send + Sync {
  async fn send(&self, topic: &str, key: Option<&str>, payload: Vec<u8>)
    -> Result<(), TransportError>;
}

/// Per-recipient delivery counts for one firing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReport {
  pub sent: usize,
  pub failed: usize,
}

impl DeliveryReport {
  pub fn total(&self) -> usize {
    self.sent + self.failed
  }
}

/// Publishes notification events over an [`EventTransport`].
///
/// Each publish is awaited before the next one starts, so the report for a
/// firing is exact. A failed publish is logged and counted, never raised.
#[derive(Clone)]
pub struct NotificationEmitter {
  transport: Arc<dyn EventTransport>,
  topic: String,
}

impl fmt::Debug for NotificationEmitter {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("NotificationEmitter")
      .field("topic", &self.topic)
      .finish_non_exhaustive()
  }
}

impl NotificationEmitter {
  pub fn new(transport: Arc<dyn EventTransport>, topic: impl Into<String>) -> Self {
    Self {
      transport,
      topic: topic.into(),
    }
  }

  pub fn topic(&self) -> &str {
    &self.topic
  }

  /// Publishes one event. Returns `false` on any encode or transport failure.
  pub async fn publish(
    &self,
    topic: &str,
    event_type: EventType,
    payload: &NotificationEvent,
    key: Option<&str>,
  ) -> bool {
    let bytes = match serde_json::to_vec(payload) {
      Ok(bytes) => bytes,
      Err(e) => {
        warn!(%topic, %event_type, error = %e, "Failed to encode notification event.");
        return false;
      }
    };
    match self.transport.send(topic, key, bytes).await {
      Ok(()) => {
        debug!(%topic, %event_type, key, "Published notification event.");
        true
      }
      Err(e) => {
        warn!(%topic, %event_type, key, error = %e, "Failed to publish notification event.");
        false
      }
    }
  }

  /// Sends `event` once per participant to the configured topic, keyed by
  /// `user_id`.
  pub async fn notify_participants(
    &self,
    event: &NotificationEvent,
    participants: &[Participant],
  ) -> DeliveryReport {
    let mut report = DeliveryReport::default();
    for participant in participants {
      let personal = event.clone().for_participant(participant);
      if self
        .publish(
          &self.topic,
          event.event_type,
          &personal,
          Some(participant.user_id.as_str()),
        )
        .await
      {
        report.sent += 1;
      } else {
        report.failed += 1;
      }
    }
    report
  }
}
