//! tests/notify.rs
//! Notification emitter: per-recipient publishing and delivery accounting.

mod common;

use crate::common::{at, participant, setup_tracing, RecordingTransport};
use duekeeper::{DeliveryReport, EventType, NotificationEmitter, NotificationEvent};
use std::sync::Arc;

#[tokio::test]
async fn each_participant_gets_a_personal_copy() {
  setup_tracing();
  let transport = Arc::new(RecordingTransport::new());
  let emitter = NotificationEmitter::new(transport.clone(), "task-notifications");
  let event = NotificationEvent::new(EventType::DeadlineApproaching, at(2024, 6, 1, 8, 0))
    .with("task_id", "task-3")
    .with("task_name", "Inventory count");

  let report = emitter
    .notify_participants(&event, &[participant("a"), participant("b")])
    .await;
  assert_eq!(report, DeliveryReport { sent: 2, failed: 0 });

  let sent = transport.sent();
  assert_eq!(sent.len(), 2);
  assert_eq!(sent[0].key.as_deref(), Some("a"));
  assert_eq!(sent[0].body["data"]["user_id"], "a");
  assert_eq!(sent[0].body["data"]["user_email"], "a@example.com");
  assert_eq!(sent[1].body["data"]["user_id"], "b");
  assert_eq!(sent[1].body["data"]["task_name"], "Inventory count");
  assert_eq!(sent[1].body["event_type"], "deadline_approaching");
  assert_eq!(sent[1].body["timestamp"], "2024-06-01T08:00:00+08:00");
}

#[tokio::test]
async fn failed_publishes_are_counted_and_the_rest_still_go_out() {
  setup_tracing();
  let transport = Arc::new(RecordingTransport::new());
  transport.fail_for("a");
  let emitter = NotificationEmitter::new(transport.clone(), "task-notifications");
  let event = NotificationEvent::new(EventType::DeadlineOverdue, at(2024, 6, 1, 8, 0));

  let report = emitter
    .notify_participants(&event, &[participant("a"), participant("b"), participant("c")])
    .await;
  assert_eq!(report, DeliveryReport { sent: 2, failed: 1 });
  assert_eq!(report.total(), 3);

  let keys: Vec<_> = transport.sent().into_iter().filter_map(|e| e.key).collect();
  assert_eq!(keys, vec!["b", "c"]);
}

#[tokio::test]
async fn publish_targets_the_given_topic_and_key() {
  setup_tracing();
  let transport = Arc::new(RecordingTransport::new());
  let emitter = NotificationEmitter::new(transport.clone(), "task-notifications");
  let event = NotificationEvent::new(EventType::TaskCompleted, at(2024, 6, 1, 8, 0))
    .with("task_id", "task-3");

  assert!(
    emitter
      .publish("audit", EventType::TaskCompleted, &event, None)
      .await
  );
  let sent = transport.sent();
  assert_eq!(sent[0].topic, "audit");
  assert_eq!(sent[0].key, None);
  assert_eq!(sent[0].body["event_type"], "task_completed");
  assert_eq!(emitter.topic(), "task-notifications");

  // No recipients: nothing is published.
  let report = emitter.notify_participants(&event, &[]).await;
  assert_eq!(report, DeliveryReport::default());
  assert_eq!(transport.sent().len(), 1);
}
