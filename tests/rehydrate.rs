//! tests/rehydrate.rs
//! Startup rehydration: catch-up of missed deadlines and re-arming.

mod common;

use crate::common::{harness, setup_tracing, tz, StaticDirectory};
use chrono::{DateTime, Duration as ChronoDuration, FixedOffset, Utc};
use duekeeper::{
  EngineError, Frequency, JobId, RehydrationReport, ScheduleRecord, ScheduleStatus,
  ScheduleStore,
};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::time::Duration as StdDuration;

fn now_local() -> DateTime<FixedOffset> {
  Utc::now().with_timezone(&tz())
}

fn record(
  schedule_id: &str,
  task_id: &str,
  deadline: DateTime<FixedOffset>,
  status: ScheduleStatus,
) -> ScheduleRecord {
  ScheduleRecord {
    schedule_id: schedule_id.to_string(),
    task_id: task_id.to_string(),
    start: Some(deadline - ChronoDuration::days(1)),
    deadline: Some(deadline),
    status,
    is_recurring: false,
    frequency: None,
    next_occurrence: None,
  }
}

fn weekly(schedule_id: &str, task_id: &str, deadline: DateTime<FixedOffset>) -> ScheduleRecord {
  ScheduleRecord {
    is_recurring: true,
    frequency: Some(Frequency::Weekly.to_string()),
    next_occurrence: Some(deadline + ChronoDuration::days(7)),
    ..record(schedule_id, task_id, deadline, ScheduleStatus::Ongoing)
  }
}

#[tokio::test]
async fn missed_deadline_is_caught_up_on_start() {
  setup_tracing();
  let h = harness(StaticDirectory::with_task("task-7", "Audit", &["u1", "u2"]));
  h.store.seed(record(
    "late",
    "task-7",
    now_local() - ChronoDuration::days(2),
    ScheduleStatus::Ongoing,
  ));
  h.store.seed(record(
    "done",
    "task-7",
    now_local() - ChronoDuration::days(2),
    ScheduleStatus::Completed,
  ));

  let report = h.engine.start().await.unwrap();
  assert_eq!(
    report,
    RehydrationReport {
      records_seen: 2,
      caught_up: 1,
      recurring_armed: 0,
      deadline_watches_armed: 0,
      failures: 0,
    }
  );

  let late = h.store.get_by_id("late").await.unwrap().unwrap();
  assert_eq!(late.status, ScheduleStatus::Overdue);
  let done = h.store.get_by_id("done").await.unwrap().unwrap();
  assert_eq!(done.status, ScheduleStatus::Completed);

  // Give the resumed timer a chance to misfire anything it was handed.
  tokio::time::sleep(StdDuration::from_millis(300)).await;
  let sent = h.transport.sent();
  assert_eq!(sent.len(), 2);
  assert!(sent.iter().all(|e| e.body["event_type"] == "deadline_overdue"
    && e.body["data"]["schedule_id"] == "late"));
  assert_eq!(h.store.updates(), 1);
  assert!(h.engine.list_scheduled_jobs().await.unwrap().is_empty());

  h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn already_regenerated_records_are_not_rearmed() {
  setup_tracing();
  let h = harness(StaticDirectory::default());
  let base = now_local();
  let first = weekly("r-1", "task-r", base + ChronoDuration::days(2));
  // Regenerated from r-1: its deadline is r-1's next occurrence.
  let second = weekly("r-2", "task-r", first.next_occurrence.unwrap());
  let other = weekly("x-1", "task-x", base + ChronoDuration::days(1));
  h.store.seed(second.clone());
  h.store.seed(first);
  h.store.seed(other);

  let report = h.engine.rehydrate().await.unwrap();
  assert_eq!(report.records_seen, 3);
  assert_eq!(report.recurring_armed, 2);
  assert_eq!(report.deadline_watches_armed, 3);
  assert_eq!(report.failures, 0);

  let ids: Vec<JobId> = h
    .engine
    .list_scheduled_jobs()
    .await
    .unwrap()
    .into_iter()
    .map(|j| j.job_id)
    .collect();
  assert!(ids.contains(&JobId::recurring("r-2")));
  assert!(ids.contains(&JobId::recurring("x-1")));
  assert!(!ids.contains(&JobId::recurring("r-1")));
  // Every live record keeps its overdue watch, regenerated or not.
  for sid in ["r-1", "r-2", "x-1"] {
    assert!(ids.contains(&JobId::deadline(sid)), "missing overdue watch for {sid}");
  }
  assert!(ids.contains(&JobId::deadline_approaching("r-2")));
  assert!(!ids.contains(&JobId::deadline_approaching("r-1")));

  let jobs = h.engine.list_scheduled_jobs().await.unwrap();
  let head = jobs
    .iter()
    .find(|j| j.job_id == JobId::recurring("r-2"))
    .unwrap();
  assert_eq!(head.fire_at, second.next_occurrence.unwrap().with_timezone(&Utc));

  h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn rehydrating_twice_does_not_duplicate_jobs() {
  setup_tracing();
  let h = harness(StaticDirectory::default());
  h.store
    .seed(weekly("r-1", "task-r", now_local() + ChronoDuration::days(10)));

  h.engine.rehydrate().await.unwrap();
  let before = h.engine.list_scheduled_jobs().await.unwrap();
  h.engine.rehydrate().await.unwrap();
  let after = h.engine.list_scheduled_jobs().await.unwrap();

  assert_eq!(before.len(), 3);
  assert_eq!(before, after);

  h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_catch_up_leaves_the_overdue_watch_armed() {
  setup_tracing();
  let h = harness(StaticDirectory::with_task("task-7", "Audit", &["u1"]));
  h.store.seed(record(
    "late",
    "task-7",
    now_local() - ChronoDuration::hours(5),
    ScheduleStatus::Ongoing,
  ));
  h.store.fail_updates.store(true, Ordering::SeqCst);

  let report = h.engine.rehydrate().await.unwrap();
  assert_eq!(report.caught_up, 0);
  assert_eq!(report.failures, 1);
  assert_eq!(report.deadline_watches_armed, 1);
  assert!(h.transport.sent().is_empty());

  let jobs = h.engine.list_scheduled_jobs().await.unwrap();
  assert_eq!(jobs.len(), 1);
  assert_eq!(jobs[0].job_id, JobId::deadline("late"));

  // Store is back: the retried firing goes through once dispatch resumes.
  h.store.fail_updates.store(false, Ordering::SeqCst);
  h.engine.resume().await.unwrap();
  tokio::time::sleep(StdDuration::from_millis(500)).await;
  let late = h.store.get_by_id("late").await.unwrap().unwrap();
  assert_eq!(late.status, ScheduleStatus::Overdue);
  assert_eq!(h.transport.sent().len(), 1);

  h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn start_resumes_dispatch_for_rearmed_watches() {
  setup_tracing();
  let h = harness(StaticDirectory::with_task("task-9", "Renewal", &["u1"]));
  h.store.seed(record(
    "soon",
    "task-9",
    now_local() + ChronoDuration::milliseconds(300),
    ScheduleStatus::Ongoing,
  ));

  let report = h.engine.start().await.unwrap();
  assert_eq!(report.caught_up, 0);
  assert_eq!(report.deadline_watches_armed, 1);

  tokio::time::sleep(StdDuration::from_millis(900)).await;
  let soon = h.store.get_by_id("soon").await.unwrap().unwrap();
  assert_eq!(soon.status, ScheduleStatus::Overdue);
  assert_eq!(h.transport.sent().len(), 1);

  h.engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn independent_schedules_on_one_task_are_both_rearmed() -> anyhow::Result<()> {
  setup_tracing();
  let h = harness(StaticDirectory::default());
  // Two weekly schedules of the same task, two days apart: neither is the
  // other's successor.
  h.store
    .seed(weekly("mon", "task-r", now_local() + ChronoDuration::days(2)));
  h.store
    .seed(weekly("wed", "task-r", now_local() + ChronoDuration::days(4)));

  let report = h.engine.rehydrate().await?;
  assert_eq!(report.recurring_armed, 2);
  assert_eq!(report.failures, 0);

  let ids: Vec<JobId> = h
    .engine
    .list_scheduled_jobs()
    .await?
    .into_iter()
    .map(|j| j.job_id)
    .collect();
  assert!(ids.contains(&JobId::recurring("mon")));
  assert!(ids.contains(&JobId::recurring("wed")));

  h.engine.shutdown().await?;
  Ok(())
}

#[tokio::test]
async fn unsupported_frequency_fails_only_its_own_record() -> anyhow::Result<()> {
  setup_tracing();
  let h = harness(StaticDirectory::with_task("task-q", "Quarterly review", &["u1"]));
  let soon = now_local() + ChronoDuration::days(5);
  let missed = now_local() - ChronoDuration::days(1);

  // A listing as the schedule service returns it.
  let listing = json!([
    {
      "schedule_id": "w-1",
      "task_id": "task-a",
      "start": (soon - ChronoDuration::hours(8)).to_rfc3339(),
      "deadline": soon.to_rfc3339(),
      "status": "ongoing",
      "is_recurring": true,
      "frequency": "Weekly",
      "next_occurrence": (soon + ChronoDuration::days(7)).to_rfc3339()
    },
    {
      "schedule_id": "q-1",
      "task_id": "task-q",
      "start": (missed - ChronoDuration::hours(8)).to_rfc3339(),
      "deadline": missed.to_rfc3339(),
      "status": "ongoing",
      "is_recurring": true,
      "frequency": "Quarterly",
      "next_occurrence": (missed + ChronoDuration::days(90)).to_rfc3339()
    },
    {
      "schedule_id": "o-1",
      "task_id": "task-a",
      "start": (soon - ChronoDuration::hours(8)).to_rfc3339(),
      "deadline": soon.to_rfc3339(),
      "status": "ongoing"
    }
  ]);
  let records: Vec<ScheduleRecord> = serde_json::from_value(listing)?;
  assert_eq!(records.len(), 3);
  assert!(matches!(
    records[1].recurrence(),
    Err(EngineError::UnsupportedFrequency(ref value)) if value == "Quarterly"
  ));
  for record in records {
    h.store.seed(record);
  }

  let report = h.engine.rehydrate().await?;
  assert_eq!(
    report,
    RehydrationReport {
      records_seen: 3,
      caught_up: 1,
      recurring_armed: 1,
      deadline_watches_armed: 2,
      failures: 1,
    }
  );

  // The missed deadline was still caught up despite the bad frequency.
  let q = h.store.get_by_id("q-1").await?.expect("q-1 stored");
  assert_eq!(q.status, ScheduleStatus::Overdue);
  assert_eq!(h.transport.sent().len(), 1);

  let ids: Vec<JobId> = h
    .engine
    .list_scheduled_jobs()
    .await?
    .into_iter()
    .map(|j| j.job_id)
    .collect();
  assert!(ids.contains(&JobId::recurring("w-1")));
  assert!(!ids.contains(&JobId::recurring("q-1")));
  assert!(ids.contains(&JobId::deadline("o-1")));

  h.engine.shutdown().await?;
  Ok(())
}
